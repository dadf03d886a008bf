//! CONFIRMED vs FALSE POSITIVE experiment without the CANDIDATE class

use crate::error::{KoiError, Result};
use crate::evaluation::metrics::{evaluate_best_model, ModelEvaluation};
use crate::training::artifact::{ArtifactPayload, ModelArtifact, ModelTag};
use crate::training::data_split::{LabelEncoder, PreparedData};
use crate::training::models::{take_rows, Classifier, ClassifierModel, ModelSpec};
use crate::training::oof::{cross_val_oof, OofResult};
use crate::training::cross_validation::CrossValidator;
use crate::training::xgboost::XGBoostConfig;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIRMED: &str = "CONFIRMED";
pub const FALSE_POSITIVE: &str = "FALSE POSITIVE";

/// Result of [`train_binary_planet_model`]
#[derive(Debug, Clone)]
pub struct BinaryOutcome {
    /// OOF over the binary subset; class 1 is CONFIRMED
    pub cv_result: OofResult,
    pub model: ClassifierModel,
    /// Sorted encoder `[CONFIRMED, FALSE POSITIVE]`
    pub label_encoder: LabelEncoder,
    pub evaluation: ModelEvaluation,
    pub n_removed: usize,
    pub saved_path: Option<PathBuf>,
}

/// Model class index to encoder index: class 0 is FALSE POSITIVE, class 1 CONFIRMED
pub fn binary_class_map(encoder: &LabelEncoder) -> Result<Vec<usize>> {
    let fp = encoder
        .index_of(FALSE_POSITIVE)
        .ok_or_else(|| KoiError::TrainingError("encoder lacks FALSE POSITIVE".to_string()))?;
    let confirmed = encoder
        .index_of(CONFIRMED)
        .ok_or_else(|| KoiError::TrainingError("encoder lacks CONFIRMED".to_string()))?;
    Ok(vec![fp, confirmed])
}

/// Drop CANDIDATE rows, cross-validate XGBoost with group folds on what
/// remains, refit on all of it and optionally save `binary_categories_model.json`
pub fn train_binary_planet_model(
    data: &PreparedData,
    planner: &CrossValidator,
    config: &XGBoostConfig,
    save_dir: Option<&Path>,
) -> Result<BinaryOutcome> {
    let classes = data.label_encoder.classes();
    let confirmed = data.label_encoder.index_of(CONFIRMED);
    let fp = data.label_encoder.index_of(FALSE_POSITIVE);
    let (Some(confirmed), Some(fp)) = (confirmed, fp) else {
        return Err(KoiError::TrainingError(format!(
            "binary experiment needs CONFIRMED and FALSE POSITIVE rows, found {:?}",
            classes
        )));
    };

    let rows: Vec<usize> = (0..data.n_samples())
        .filter(|&i| data.y[i] == confirmed || data.y[i] == fp)
        .collect();
    let x_bin = take_rows(&data.x, &rows);
    let y_bin: Vec<usize> = rows.iter().map(|&i| usize::from(data.y[i] == confirmed)).collect();
    let n_removed = data.n_samples() - rows.len();
    let n_confirmed = y_bin.iter().filter(|&&v| v == 1).count();
    info!(
        samples = rows.len(),
        removed_candidates = n_removed,
        confirmed = n_confirmed,
        false_positive = rows.len() - n_confirmed,
        "Binary dataset"
    );

    let groups_bin: Vec<i64> = rows.iter().map(|&i| data.groups[i]).collect();
    let splits = planner.split(rows.len(), Some(&y_bin), Some(&groups_bin))?;
    let spec = ModelSpec::XGBoost(config.clone());
    let cv_result = cross_val_oof("XGBoost", &spec, &x_bin, &y_bin, &splits, None)?;
    info!(
        accuracy = cv_result.summary.accuracy,
        accuracy_std = cv_result.summary.accuracy_std,
        train_accuracy = cv_result.summary.train_accuracy,
        "Binary (without CANDIDATE)"
    );

    let mut model = spec.build();
    model.fit(&x_bin, &y_bin, None)?;

    let label_encoder = LabelEncoder::fit(&[CONFIRMED, FALSE_POSITIVE]);
    let model_order = vec![FALSE_POSITIVE.to_string(), CONFIRMED.to_string()];
    let evaluation = evaluate_best_model(
        "XGBoost",
        &y_bin,
        &cv_result.oof_pred,
        Some(&cv_result.oof_proba),
        &model_order,
    )?;

    let saved_path = match save_dir {
        Some(dir) => {
            let path = dir.join("binary_categories_model.json");
            ModelArtifact::new(
                ModelTag::BinaryXgboost,
                "XGBoost",
                label_encoder.clone(),
                ArtifactPayload::Mapped {
                    model: model.clone(),
                    class_map: binary_class_map(&label_encoder)?,
                },
            )
            .with_metric("cv_accuracy", cv_result.summary.accuracy)
            .with_metric("cv_std", cv_result.summary.accuracy_std)
            .save(&path)?;
            Some(path)
        }
        None => None,
    };

    Ok(BinaryOutcome {
        cv_result,
        model,
        label_encoder,
        evaluation,
        n_removed,
        saved_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data_split::group_fold_planner;
    use crate::training::test_support::synthetic_prepared;
    use tempfile::tempdir;

    #[test]
    fn test_binary_class_map() {
        let enc = LabelEncoder::fit(&[CONFIRMED, FALSE_POSITIVE]);
        assert_eq!(binary_class_map(&enc).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_binary_trainer_drops_candidates_and_saves() {
        let dir = tempdir().unwrap();
        let data = synthetic_prepared(90);
        let config = XGBoostConfig { n_estimators: 10, max_depth: 3, ..Default::default() };
        let outcome = train_binary_planet_model(&data, &group_fold_planner(5, 42), &config, Some(dir.path())).unwrap();

        assert_eq!(outcome.n_removed, 30);
        assert_eq!(outcome.cv_result.oof_pred.len(), 60);
        assert!(outcome.cv_result.summary.accuracy > 0.9);

        let artifact = ModelArtifact::load(&dir.path().join("binary_categories_model.json")).unwrap();
        assert_eq!(artifact.model_type, ModelTag::BinaryXgboost);
        assert_eq!(artifact.label_encoder.classes(), &["CONFIRMED", "FALSE POSITIVE"]);
    }
}
