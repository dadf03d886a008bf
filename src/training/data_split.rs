//! Feature/target separation, label encoding, host-star groups and fold plans

use crate::error::{KoiError, Result};
use crate::training::cross_validation::{CVSplit, CVStrategy, CrossValidator};
use crate::training::models::dataframe_to_array;
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

/// Column holding the host-star identifier
pub const GROUP_COLUMN: &str = "kepid";

/// Maps class names to dense indices in sorted order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    /// Learn the sorted set of distinct labels
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let classes: BTreeSet<String> = labels.iter().map(|s| s.as_ref().to_string()).collect();
        Self {
            classes: classes.into_iter().collect(),
        }
    }

    /// Use an explicit class order
    pub fn from_classes(classes: Vec<String>) -> Self {
        Self { classes }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == label)
    }

    pub fn transform<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|l| {
                self.index_of(l.as_ref())
                    .ok_or_else(|| KoiError::InvalidInput(format!("unseen label '{}'", l.as_ref())))
            })
            .collect()
    }

    pub fn inverse_transform(&self, indices: &[usize]) -> Result<Vec<String>> {
        indices
            .iter()
            .map(|&i| {
                self.classes
                    .get(i)
                    .cloned()
                    .ok_or_else(|| KoiError::InvalidInput(format!("class index {} out of range", i)))
            })
            .collect()
    }
}

/// Everything a trainer needs from the engineered table
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub x: Array2<f64>,
    pub feature_names: Vec<String>,
    pub y: Vec<usize>,
    pub groups: Vec<i64>,
    pub label_encoder: LabelEncoder,
    pub splits: Vec<CVSplit>,
}

impl PreparedData {
    pub fn n_samples(&self) -> usize {
        self.y.len()
    }
}

/// String values of a column, nulls rendered as an empty string
pub fn string_column(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let column = df
        .column(name)
        .map_err(|_| KoiError::FeatureNotFound(name.to_string()))?;
    let cast = column.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

/// Numeric columns other than the target, in table order
pub fn feature_columns(df: &DataFrame, target_column: &str) -> Vec<String> {
    let mut names = Vec::new();
    for column in df.get_columns() {
        if column.name().as_str() == target_column {
            continue;
        }
        if column.dtype().is_primitive_numeric() || column.dtype() == &DataType::Boolean {
            names.push(column.name().to_string());
        } else {
            warn!(column = %column.name(), dtype = %column.dtype(), "Skipping non-numeric column");
        }
    }
    names
}

/// Host-star ids aligned to the engineered rows
///
/// Null ids are dropped. When the engineered table has `diff` more rows than
/// remain, the trailing rows get fresh ids `max + 1 ..= max + diff`.
pub fn resolve_groups(original: &DataFrame, n_engineered: usize) -> Result<Vec<i64>> {
    let column = original
        .column(GROUP_COLUMN)
        .map_err(|_| KoiError::FeatureNotFound(GROUP_COLUMN.to_string()))?;
    let cast = column.cast(&DataType::Int64)?;
    let ids = cast.i64()?;
    let missing = ids.null_count();
    let mut groups: Vec<i64> = ids.into_iter().flatten().collect();
    info!(missing_kepid = missing, valid = groups.len(), "Resolved host-star groups");

    if n_engineered < groups.len() {
        return Err(KoiError::RowMismatch {
            engineered: n_engineered,
            groups: groups.len(),
        });
    }
    let diff = n_engineered - groups.len();
    if diff > 0 {
        warn!(rows = diff, "Appended input rows; assigning temporary kepids");
        let max_id = groups.iter().copied().max().unwrap_or(0);
        groups.extend((1..=diff as i64).map(|k| max_id + k));
    }
    Ok(groups)
}

/// Separate features and target, encode labels, attach groups and plan folds.
/// The feature names are written to `manifest_path` as a JSON array.
pub fn prepare_data_for_training(
    engineered: &DataFrame,
    original: &DataFrame,
    target_column: &str,
    n_splits: usize,
    seed: u64,
    manifest_path: &Path,
) -> Result<PreparedData> {
    if engineered.column(target_column).is_err() {
        return Err(KoiError::FeatureNotFound(target_column.to_string()));
    }
    let labels = string_column(engineered, target_column)?;
    let label_encoder = LabelEncoder::fit(&labels);
    let y = label_encoder.transform(&labels)?;

    let feature_names = feature_columns(engineered, target_column);
    let x = dataframe_to_array(engineered, &feature_names)?;
    info!(rows = x.nrows(), features = x.ncols(), classes = ?label_encoder.classes(), "Dataset prepared");
    for (class, count) in label_encoder.classes().iter().zip(class_counts(&y, label_encoder.n_classes())) {
        info!(class = %class, count, "Class distribution");
    }

    let groups = resolve_groups(original, engineered.height())?;
    let unique_stars = groups.iter().collect::<HashSet<_>>().len();
    info!(
        n_splits,
        kois = x.nrows(),
        unique_stars,
        kois_per_star = x.nrows() as f64 / unique_stars.max(1) as f64,
        "Using StratifiedGroupKFold"
    );

    let splits = group_fold_planner(n_splits, seed).split(x.nrows(), Some(&y), Some(&groups))?;

    save_manifest(&feature_names, manifest_path)?;

    Ok(PreparedData {
        x,
        feature_names,
        y,
        groups,
        label_encoder,
        splits,
    })
}

/// Shuffled stratified group K-fold used by every trainer
pub fn group_fold_planner(n_splits: usize, seed: u64) -> CrossValidator {
    CrossValidator::new(CVStrategy::StratifiedGroupKFold { n_splits, shuffle: true }).with_random_state(seed)
}

/// Fold plan for a subset of rows, indices local to the subset
pub fn plan_subset_folds(
    planner: &CrossValidator,
    y: &[usize],
    groups: &[i64],
    rows: &[usize],
) -> Result<Vec<CVSplit>> {
    let y_sub: Vec<usize> = rows.iter().map(|&i| y[i]).collect();
    let g_sub: Vec<i64> = rows.iter().map(|&i| groups[i]).collect();
    planner.split(rows.len(), Some(&y_sub), Some(&g_sub))
}

/// Count of each label `0..n_classes`
pub fn class_counts(y: &[usize], n_classes: usize) -> Vec<usize> {
    let mut counts = vec![0usize; n_classes];
    for &label in y {
        if label < n_classes {
            counts[label] += 1;
        }
    }
    counts
}

/// Balanced weights `n / (k * count_c)` for each present class
pub fn balanced_class_weights(y: &[usize]) -> HashMap<usize, f64> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for &label in y {
        *counts.entry(label).or_default() += 1;
    }
    let n = y.len() as f64;
    let k = counts.len() as f64;
    counts
        .into_iter()
        .map(|(label, count)| (label, n / (k * count as f64)))
        .collect()
}

/// Per-row weights from [`balanced_class_weights`]
pub fn balanced_sample_weights(y: &[usize]) -> Vec<f64> {
    let weights = balanced_class_weights(y);
    y.iter().map(|label| weights.get(label).copied().unwrap_or(1.0)).collect()
}

/// Write the ordered feature names as a JSON array
pub fn save_manifest(feature_names: &[String], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string(feature_names)?)?;
    info!(features = feature_names.len(), path = %path.display(), "Saved feature manifest");
    Ok(())
}

pub fn load_manifest(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| KoiError::ArtifactNotFound(path.display().to_string()))?;
    Ok(serde_json::from_str(&text)?)
}

/// Matrix in manifest order; missing columns are zero-filled and extras ignored
pub fn align_to_manifest(df: &DataFrame, manifest: &[String]) -> Result<Array2<f64>> {
    let mut x = Array2::zeros((df.height(), manifest.len()));
    let mut missing = Vec::new();
    for (j, name) in manifest.iter().enumerate() {
        match df.column(name) {
            Ok(_) => {
                let col = dataframe_to_array(df, std::slice::from_ref(name))?;
                x.column_mut(j).assign(&col.column(0));
            }
            Err(_) => missing.push(name.as_str()),
        }
    }
    if !missing.is_empty() {
        warn!(missing = ?missing, "Zero-filling columns absent from input");
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tables(n_stars: usize) -> (DataFrame, DataFrame) {
        let classes = ["CANDIDATE", "CONFIRMED", "FALSE POSITIVE"];
        let mut kepid = Vec::new();
        let mut disposition = Vec::new();
        let mut period = Vec::new();
        for star in 0..n_stars {
            for k in 0..(1 + star % 2) {
                kepid.push(1000 + star as i64);
                disposition.push(classes[(star + k) % 3]);
                period.push((star * 3 + k) as f64);
            }
        }
        let original = DataFrame::new(vec![
            Column::new("kepid".into(), &kepid),
            Column::new("koi_disposition".into(), &disposition),
        ])
        .unwrap();
        let engineered = DataFrame::new(vec![
            Column::new("koi_period".into(), &period),
            Column::new("koi_disposition".into(), &disposition),
        ])
        .unwrap();
        (engineered, original)
    }

    #[test]
    fn test_label_encoder_sorted() {
        let enc = LabelEncoder::fit(&["FALSE POSITIVE", "CONFIRMED", "CANDIDATE", "CONFIRMED"]);
        assert_eq!(enc.classes(), &["CANDIDATE", "CONFIRMED", "FALSE POSITIVE"]);
        assert_eq!(enc.transform(&["CONFIRMED"]).unwrap(), vec![1]);
        assert_eq!(enc.inverse_transform(&[2]).unwrap(), vec!["FALSE POSITIVE"]);
        assert!(enc.transform(&["UNKNOWN"]).is_err());
    }

    #[test]
    fn test_prepare_keeps_groups_in_one_fold() {
        let dir = tempdir().unwrap();
        let (engineered, original) = tables(30);
        let manifest = dir.path().join("features.json");
        let data = prepare_data_for_training(&engineered, &original, "koi_disposition", 5, 42, &manifest).unwrap();

        assert_eq!(data.feature_names, vec!["koi_period"]);
        assert_eq!(data.splits.len(), 5);
        let mut fold_of: HashMap<i64, usize> = HashMap::new();
        for split in &data.splits {
            for &i in &split.test_indices {
                let prev = fold_of.insert(data.groups[i], split.fold_idx);
                assert!(prev.is_none() || prev == Some(split.fold_idx));
            }
        }
        assert_eq!(load_manifest(&manifest).unwrap(), data.feature_names);
    }

    #[test]
    fn test_missing_target_and_kepid() {
        let dir = tempdir().unwrap();
        let (engineered, original) = tables(10);
        let manifest = dir.path().join("f.json");
        assert!(matches!(
            prepare_data_for_training(&engineered, &original, "nope", 5, 42, &manifest),
            Err(KoiError::FeatureNotFound(_))
        ));
        let no_kepid = original.drop("kepid").unwrap();
        assert!(matches!(
            prepare_data_for_training(&engineered, &no_kepid, "koi_disposition", 5, 42, &manifest),
            Err(KoiError::FeatureNotFound(c)) if c == "kepid"
        ));
    }

    #[test]
    fn test_resolve_groups_temporary_ids_and_mismatch() {
        let original = DataFrame::new(vec![Column::new("kepid".into(), &[Some(5i64), None, Some(9)])]).unwrap();
        assert_eq!(resolve_groups(&original, 4).unwrap(), vec![5, 9, 10, 11]);
        assert!(matches!(
            resolve_groups(&original, 1),
            Err(KoiError::RowMismatch { engineered: 1, groups: 2 })
        ));
    }

    #[test]
    fn test_balanced_weights() {
        let weights = balanced_class_weights(&[0, 0, 0, 1]);
        assert!((weights[&0] - 4.0 / 6.0).abs() < 1e-12);
        assert!((weights[&1] - 2.0).abs() < 1e-12);
        assert_eq!(balanced_sample_weights(&[1, 0]), vec![1.0, 1.0]);
    }

    #[test]
    fn test_align_to_manifest() {
        let df = DataFrame::new(vec![
            Column::new("b".into(), &[1.0, 2.0]),
            Column::new("extra".into(), &[9.0, 9.0]),
        ])
        .unwrap();
        let manifest = vec!["a".to_string(), "b".to_string()];
        let x = align_to_manifest(&df, &manifest).unwrap();
        assert_eq!(x, ndarray::array![[0.0, 1.0], [0.0, 2.0]]);
    }

    #[test]
    fn test_feature_columns_keep_numeric_and_boolean() {
        let df = DataFrame::new(vec![
            Column::new("koi_period".into(), &[1.0, 2.0]),
            Column::new("koi_tce_plnt_num".into(), &[1i64, 2]),
            Column::new("koi_fpflag_nt".into(), &[0i32, 1]),
            Column::new("is_flagged".into(), &[true, false]),
            Column::new("kepoi_name".into(), &["K1.01", "K1.02"]),
            Column::new("koi_disposition".into(), &["CONFIRMED", "CANDIDATE"]),
        ])
        .unwrap();
        assert_eq!(
            feature_columns(&df, "koi_disposition"),
            vec!["koi_period", "koi_tce_plnt_num", "koi_fpflag_nt", "is_flagged"]
        );
    }
}
