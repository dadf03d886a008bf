//! Cross-validation splitters
//!
//! Labels are class indices (`usize`) and groups are host-star ids (`i64`).
//! `StratifiedGroupKFold` is the fold plan used for every KOI trainer: all
//! rows of a star land in the same validation fold while each fold's class
//! mix stays close to the global one.

use crate::error::{KoiError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Cross-validation strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CVStrategy {
    /// K-Fold cross-validation
    KFold { n_splits: usize, shuffle: bool },
    /// Stratified K-Fold (maintains class distribution)
    StratifiedKFold { n_splits: usize, shuffle: bool },
    /// Group K-Fold (keeps groups together)
    GroupKFold { n_splits: usize },
    /// Stratified Group K-Fold (keeps groups together, balances classes)
    StratifiedGroupKFold { n_splits: usize, shuffle: bool },
}

impl Default for CVStrategy {
    fn default() -> Self {
        CVStrategy::StratifiedGroupKFold { n_splits: 5, shuffle: true }
    }
}

impl CVStrategy {
    pub fn n_splits(&self) -> usize {
        match self {
            CVStrategy::KFold { n_splits, .. }
            | CVStrategy::StratifiedKFold { n_splits, .. }
            | CVStrategy::GroupKFold { n_splits }
            | CVStrategy::StratifiedGroupKFold { n_splits, .. } => *n_splits,
        }
    }
}

/// A single train/test split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Cross-validation splitter
#[derive(Debug, Clone)]
pub struct CrossValidator {
    strategy: CVStrategy,
    random_state: Option<u64>,
}

impl CrossValidator {
    /// Create a new cross-validator
    pub fn new(strategy: CVStrategy) -> Self {
        Self {
            strategy,
            random_state: None,
        }
    }

    /// Set random state for reproducibility
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn strategy(&self) -> &CVStrategy {
        &self.strategy
    }

    /// Generate train/test splits
    pub fn split(
        &self,
        n_samples: usize,
        y: Option<&[usize]>,
        groups: Option<&[i64]>,
    ) -> Result<Vec<CVSplit>> {
        let n_splits = self.strategy.n_splits();
        if n_splits < 2 {
            return Err(KoiError::ValidationError(
                "n_splits must be at least 2".to_string(),
            ));
        }
        if n_samples < n_splits {
            return Err(KoiError::ValidationError(format!(
                "n_samples ({}) must be >= n_splits ({})",
                n_samples, n_splits
            )));
        }
        if let Some(y) = y {
            check_len("y", y.len(), n_samples)?;
        }
        if let Some(g) = groups {
            check_len("groups", g.len(), n_samples)?;
        }

        let folds = match &self.strategy {
            CVStrategy::KFold { shuffle, .. } => self.k_fold(n_samples, n_splits, *shuffle),
            CVStrategy::StratifiedKFold { shuffle, .. } => {
                let y = y.ok_or_else(|| {
                    KoiError::ValidationError("StratifiedKFold requires target array".to_string())
                })?;
                self.stratified_k_fold(y, n_splits, *shuffle)
            }
            CVStrategy::GroupKFold { .. } => {
                let groups = groups.ok_or_else(|| {
                    KoiError::ValidationError("GroupKFold requires groups array".to_string())
                })?;
                self.group_k_fold(groups, n_splits)?
            }
            CVStrategy::StratifiedGroupKFold { shuffle, .. } => {
                let y = y.ok_or_else(|| {
                    KoiError::ValidationError(
                        "StratifiedGroupKFold requires target array".to_string(),
                    )
                })?;
                let groups = groups.ok_or_else(|| {
                    KoiError::ValidationError(
                        "StratifiedGroupKFold requires groups array".to_string(),
                    )
                })?;
                self.stratified_group_k_fold(y, groups, n_splits, *shuffle)?
            }
        };

        if let Some(empty) = folds.iter().position(|f| f.is_empty()) {
            return Err(KoiError::ValidationError(format!(
                "fold {} received no samples",
                empty
            )));
        }

        Ok(folds_to_splits(n_samples, folds))
    }

    fn rng(&self) -> ChaCha8Rng {
        match self.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    fn k_fold(&self, n_samples: usize, n_splits: usize, shuffle: bool) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..n_samples).collect();
        if shuffle {
            indices.shuffle(&mut self.rng());
        }

        let base = n_samples / n_splits;
        let remainder = n_samples % n_splits;
        let mut folds = Vec::with_capacity(n_splits);
        let mut current = 0;
        for fold_idx in 0..n_splits {
            let size = if fold_idx < remainder { base + 1 } else { base };
            folds.push(indices[current..current + size].to_vec());
            current += size;
        }
        folds
    }

    fn stratified_k_fold(&self, y: &[usize], n_splits: usize, shuffle: bool) -> Vec<Vec<usize>> {
        let mut class_indices: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, &class) in y.iter().enumerate() {
            class_indices.entry(class).or_default().push(idx);
        }

        if shuffle {
            let mut rng = self.rng();
            for indices in class_indices.values_mut() {
                indices.shuffle(&mut rng);
            }
        }

        // Offset each class so remainders do not pile up in the first folds
        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_splits];
        let mut offset = 0;
        for indices in class_indices.values() {
            for (i, &idx) in indices.iter().enumerate() {
                folds[(offset + i) % n_splits].push(idx);
            }
            offset = (offset + indices.len()) % n_splits;
        }
        folds
    }

    fn group_k_fold(&self, groups: &[i64], n_splits: usize) -> Result<Vec<Vec<usize>>> {
        let members = group_members(groups);
        if members.len() < n_splits {
            return Err(KoiError::ValidationError(format!(
                "Number of groups ({}) must be >= n_splits ({})",
                members.len(),
                n_splits
            )));
        }

        // Largest groups first, each into the currently lightest fold
        let mut ordered: Vec<&Vec<usize>> = members.values().collect();
        ordered.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_splits];
        for rows in ordered {
            let lightest = (0..n_splits)
                .min_by_key(|&f| folds[f].len())
                .unwrap_or(0);
            folds[lightest].extend_from_slice(rows);
        }
        Ok(folds)
    }

    fn stratified_group_k_fold(
        &self,
        y: &[usize],
        groups: &[i64],
        n_splits: usize,
        shuffle: bool,
    ) -> Result<Vec<Vec<usize>>> {
        let n_classes = y.iter().copied().max().map(|m| m + 1).unwrap_or(0);
        let mut class_totals = vec![0.0f64; n_classes];
        for &c in y {
            class_totals[c] += 1.0;
        }
        if let Some(least) = class_totals.iter().copied().filter(|&c| c > 0.0).reduce(f64::min) {
            if (least as usize) < n_splits {
                warn!(
                    least_populated = least as usize,
                    n_splits, "The least populated class has fewer members than n_splits"
                );
            }
        }

        let members = group_members(groups);
        if members.len() < n_splits {
            return Err(KoiError::ValidationError(format!(
                "Cannot have number of splits n_splits={} greater than the number of groups: {}",
                n_splits,
                members.len()
            )));
        }

        let mut group_rows: Vec<Vec<usize>> = members.into_values().collect();
        if shuffle {
            group_rows.shuffle(&mut self.rng());
        }

        let group_counts: Vec<Vec<f64>> = group_rows
            .iter()
            .map(|rows| {
                let mut counts = vec![0.0; n_classes];
                for &r in rows {
                    counts[y[r]] += 1.0;
                }
                counts
            })
            .collect();

        // Groups with the most uneven class mix are placed first; the sort is
        // stable so the shuffled order breaks ties.
        let mut order: Vec<usize> = (0..group_rows.len()).collect();
        let spread: Vec<f64> = group_counts.iter().map(|c| population_std(c)).collect();
        order.sort_by(|&a, &b| {
            spread[b]
                .partial_cmp(&spread[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut fold_counts = vec![vec![0.0f64; n_classes]; n_splits];
        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_splits];

        for g in order {
            let counts = &group_counts[g];
            let mut best_fold = 0;
            let mut min_eval = f64::INFINITY;
            let mut min_samples = f64::INFINITY;

            for fold in 0..n_splits {
                let eval = placement_score(&fold_counts, fold, counts, &class_totals);
                let samples_in_fold: f64 = fold_counts[fold].iter().sum();
                let better = eval < min_eval
                    || (is_close(eval, min_eval) && samples_in_fold < min_samples);
                if better {
                    best_fold = fold;
                    min_eval = eval;
                    min_samples = samples_in_fold;
                }
            }

            for (acc, c) in fold_counts[best_fold].iter_mut().zip(counts) {
                *acc += c;
            }
            folds[best_fold].extend_from_slice(&group_rows[g]);
        }

        for fold in &mut folds {
            fold.sort_unstable();
        }
        Ok(folds)
    }
}

/// Mean over classes of the std across folds of normalised class counts,
/// evaluated as if `counts` were added to `candidate`.
fn placement_score(
    fold_counts: &[Vec<f64>],
    candidate: usize,
    counts: &[f64],
    class_totals: &[f64],
) -> f64 {
    let n_classes = class_totals.len();
    if n_classes == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for class in 0..n_classes {
        let denom = class_totals[class].max(1.0);
        let column: Vec<f64> = fold_counts
            .iter()
            .enumerate()
            .map(|(f, fc)| {
                let extra = if f == candidate { counts[class] } else { 0.0 };
                (fc[class] + extra) / denom
            })
            .collect();
        total += population_std(&column);
    }
    total / n_classes as f64
}

fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

fn is_close(a: f64, b: f64) -> bool {
    if a.is_infinite() || b.is_infinite() {
        return a == b;
    }
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

/// Row indices of each group, ordered by group id
fn group_members(groups: &[i64]) -> BTreeMap<i64, Vec<usize>> {
    let mut members: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (idx, &g) in groups.iter().enumerate() {
        members.entry(g).or_default().push(idx);
    }
    members
}

fn folds_to_splits(n_samples: usize, folds: Vec<Vec<usize>>) -> Vec<CVSplit> {
    let mut fold_of = vec![0usize; n_samples];
    for (fold_idx, fold) in folds.iter().enumerate() {
        for &i in fold {
            fold_of[i] = fold_idx;
        }
    }
    folds
        .into_iter()
        .enumerate()
        .map(|(fold_idx, test_indices)| CVSplit {
            train_indices: (0..n_samples).filter(|&i| fold_of[i] != fold_idx).collect(),
            test_indices,
            fold_idx,
        })
        .collect()
}

fn check_len(name: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(KoiError::ShapeError {
            expected: format!("{} of length {}", name, expected),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Cross-validation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CVResults {
    /// Scores for each fold
    pub scores: Vec<f64>,
    /// Mean score across folds
    pub mean_score: f64,
    /// Standard deviation of scores
    pub std_score: f64,
    /// Number of folds
    pub n_folds: usize,
}

impl CVResults {
    /// Create CV results from fold scores
    pub fn from_scores(scores: Vec<f64>) -> Self {
        let n_folds = scores.len();
        let mean_score = if n_folds == 0 {
            0.0
        } else {
            scores.iter().sum::<f64>() / n_folds as f64
        };
        let std_score = population_std(&scores);

        Self {
            scores,
            mean_score,
            std_score,
            n_folds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn koi_like(n_stars: usize) -> (Vec<usize>, Vec<i64>) {
        // 1 to 3 KOIs per star, mixed dispositions within multi-planet systems
        let mut y = Vec::new();
        let mut groups = Vec::new();
        for star in 0..n_stars {
            let kois = 1 + star % 3;
            for k in 0..kois {
                y.push((star + k) % 3);
                groups.push(1000 + star as i64);
            }
        }
        (y, groups)
    }

    #[test]
    fn test_k_fold() {
        let cv = CrossValidator::new(CVStrategy::KFold { n_splits: 5, shuffle: false });
        let splits = cv.split(100, None, None).unwrap();

        assert_eq!(splits.len(), 5);
        for split in &splits {
            assert_eq!(split.test_indices.len(), 20);
            assert_eq!(split.train_indices.len(), 80);
        }

        let mut all_test: Vec<usize> = splits.iter().flat_map(|s| s.test_indices.clone()).collect();
        all_test.sort();
        assert_eq!(all_test, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_stratified_k_fold() {
        let y = vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1];
        let cv = CrossValidator::new(CVStrategy::StratifiedKFold { n_splits: 5, shuffle: false });
        let splits = cv.split(10, Some(&y), None).unwrap();

        assert_eq!(splits.len(), 5);
        for split in &splits {
            assert_eq!(split.test_indices.len(), 2);
            let ones = split.test_indices.iter().filter(|&&i| y[i] == 1).count();
            assert_eq!(ones, 1);
        }
    }

    #[test]
    fn test_group_k_fold_keeps_groups() {
        let (_, groups) = koi_like(20);
        let cv = CrossValidator::new(CVStrategy::GroupKFold { n_splits: 4 });
        let splits = cv.split(groups.len(), None, Some(&groups)).unwrap();

        for split in &splits {
            let test: HashSet<i64> = split.test_indices.iter().map(|&i| groups[i]).collect();
            let train: HashSet<i64> = split.train_indices.iter().map(|&i| groups[i]).collect();
            assert!(test.is_disjoint(&train));
        }
    }

    #[test]
    fn test_stratified_group_k_fold_each_group_in_one_fold() {
        let (y, groups) = koi_like(60);
        let cv = CrossValidator::new(CVStrategy::StratifiedGroupKFold { n_splits: 5, shuffle: true })
            .with_random_state(42);
        let splits = cv.split(y.len(), Some(&y), Some(&groups)).unwrap();
        assert_eq!(splits.len(), 5);

        let mut fold_of_group: HashMap<i64, usize> = HashMap::new();
        for split in &splits {
            for &i in &split.test_indices {
                let previous = fold_of_group.insert(groups[i], split.fold_idx);
                assert!(previous.is_none() || previous == Some(split.fold_idx));
            }
            let test: HashSet<i64> = split.test_indices.iter().map(|&i| groups[i]).collect();
            assert!(split.train_indices.iter().all(|&i| !test.contains(&groups[i])));
        }

        let unique: HashSet<i64> = groups.iter().copied().collect();
        assert_eq!(fold_of_group.len(), unique.len());

        let mut covered: Vec<usize> = splits.iter().flat_map(|s| s.test_indices.clone()).collect();
        covered.sort();
        assert_eq!(covered, (0..y.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_stratified_group_k_fold_balances_classes() {
        let (y, groups) = koi_like(150);
        let cv = CrossValidator::new(CVStrategy::StratifiedGroupKFold { n_splits: 5, shuffle: true })
            .with_random_state(7);
        let splits = cv.split(y.len(), Some(&y), Some(&groups)).unwrap();

        for class in 0..3 {
            let total = y.iter().filter(|&&c| c == class).count() as f64;
            for split in &splits {
                let in_fold = split.test_indices.iter().filter(|&&i| y[i] == class).count() as f64;
                let share = in_fold / total;
                assert!((share - 0.2).abs() < 0.08, "class {} share {}", class, share);
            }
        }
    }

    #[test]
    fn test_stratified_group_k_fold_is_deterministic() {
        let (y, groups) = koi_like(40);
        let cv = CrossValidator::new(CVStrategy::StratifiedGroupKFold { n_splits: 5, shuffle: true })
            .with_random_state(42);
        let a = cv.split(y.len(), Some(&y), Some(&groups)).unwrap();
        let b = cv.split(y.len(), Some(&y), Some(&groups)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_too_few_groups() {
        let y = vec![0, 1, 0, 1, 0, 1];
        let groups = vec![1, 1, 2, 2, 3, 3];
        let cv = CrossValidator::new(CVStrategy::StratifiedGroupKFold { n_splits: 5, shuffle: false });
        assert!(cv.split(6, Some(&y), Some(&groups)).is_err());
    }

    #[test]
    fn test_length_mismatch() {
        let cv = CrossValidator::new(CVStrategy::StratifiedKFold { n_splits: 2, shuffle: false });
        assert!(cv.split(4, Some(&[0, 1, 0]), None).is_err());
    }

    #[test]
    fn test_cv_results() {
        let r = CVResults::from_scores(vec![0.8, 0.9, 1.0]);
        assert!((r.mean_score - 0.9).abs() < 1e-12);
        assert!((r.std_score - (0.02f64 / 3.0).sqrt()).abs() < 1e-12);
    }
}
