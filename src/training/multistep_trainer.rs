//! Two-stage cascade: a high-recall planet screen, then CANDIDATE vs CONFIRMED
//!
//! Stage 1 is an MLP deciding "planet" (CANDIDATE or CONFIRMED) against
//! FALSE POSITIVE with a low decision threshold. Stage 2 is XGBoost trained
//! only on planet rows. A row is FALSE POSITIVE unless stage 1 passes it.

use crate::error::{KoiError, Result};
use crate::evaluation::metrics::{accuracy, class_scores};
use crate::training::artifact::{ArtifactPayload, ModelArtifact, ModelTag, OofRecord};
use crate::training::cross_validation::CrossValidator;
use crate::training::data_split::{plan_subset_folds, LabelEncoder, PreparedData};
use crate::training::models::{take_rows, Classifier, ClassifierModel, ModelSpec};
use crate::training::neural_network::MLPConfig;
use crate::training::oof::cross_val_oof;
use crate::training::xgboost::XGBoostConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const STAGE1_NAME: &str = "Stage1_MLP";
pub const STAGE2_NAME: &str = "Stage2_XGB";

/// Stage-1 probability of "planet" above which a row reaches stage 2
pub const DEFAULT_STAGE1_THRESHOLD: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiStepConfig {
    pub stage1: MLPConfig,
    pub stage2: XGBoostConfig,
    pub threshold: f64,
}

impl Default for MultiStepConfig {
    fn default() -> Self {
        Self {
            stage1: MLPConfig::planet_screen(),
            stage2: XGBoostConfig::koi_ensemble(),
            threshold: DEFAULT_STAGE1_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiStepMetrics {
    /// Accuracy of the combined OOF prediction
    pub accuracy: f64,
    pub stage1_recall: f64,
    pub stage1_precision: f64,
    pub stage2_accuracy: f64,
    pub candidate_recall: f64,
    pub confirmed_recall: f64,
}

#[derive(Debug, Clone)]
pub struct MultiStepOutcome {
    pub stage1_oof_pred: Vec<usize>,
    /// Stage-2 OOF labels over the planet rows, in encoder indices
    pub stage2_oof_pred: Vec<usize>,
    pub combined_pred: Vec<usize>,
    pub metrics: MultiStepMetrics,
    pub stage1: ClassifierModel,
    pub stage2: ClassifierModel,
    pub saved_path: Option<PathBuf>,
}

/// Combine the stages: default `rejected`, stage-2 label where stage 1
/// passed the row and a stage-2 OOF label exists for it
pub fn combine_stages(
    n_samples: usize,
    stage1_pred: &[usize],
    planet_rows: &[usize],
    stage2_pred: &[usize],
    rejected: usize,
) -> Vec<usize> {
    let mut combined = vec![rejected; n_samples];
    for (&row, &label) in planet_rows.iter().zip(stage2_pred) {
        if stage1_pred[row] == 1 {
            combined[row] = label;
        }
    }
    combined
}

/// Train both stages with group CV. With a prefix, saves the cascade as
/// `{prefix}_multistep.json` and each stage on its own as
/// `{prefix}_stage1.json` and `{prefix}_stage2.json`.
pub fn train_multistep_nn_xgb(
    data: &PreparedData,
    planner: &CrossValidator,
    config: &MultiStepConfig,
    save_prefix: Option<&Path>,
) -> Result<MultiStepOutcome> {
    let encoder = &data.label_encoder;
    let (Some(candidate), Some(confirmed), Some(false_positive)) = (
        encoder.index_of("CANDIDATE"),
        encoder.index_of("CONFIRMED"),
        encoder.index_of("FALSE POSITIVE"),
    ) else {
        return Err(KoiError::TrainingError(format!(
            "multi-step cascade needs CANDIDATE, CONFIRMED and FALSE POSITIVE, found {:?}",
            encoder.classes()
        )));
    };
    let planet_classes = vec![candidate, confirmed];
    let n = data.n_samples();

    // Stage 1
    let y_stage1: Vec<usize> = data.y.iter().map(|c| usize::from(planet_classes.contains(c))).collect();
    let stage1_splits = planner.split(n, Some(&y_stage1), Some(&data.groups))?;
    let stage1_spec = ModelSpec::Mlp(config.stage1.clone());
    let stage1_cv = cross_val_oof(STAGE1_NAME, &stage1_spec, &data.x, &y_stage1, &stage1_splits, None)?;
    let stage1_oof_pred: Vec<usize> = stage1_cv
        .oof_proba
        .column(1)
        .iter()
        .map(|&p| usize::from(p > config.threshold))
        .collect();
    let stage1_scores = class_scores(&y_stage1, &stage1_oof_pred, 1);
    info!(
        threshold = config.threshold,
        recall = stage1_scores.recall,
        precision = stage1_scores.precision,
        "Stage 1 planet screen"
    );
    let mut stage1 = stage1_spec.build();
    stage1.fit(&data.x, &y_stage1, None)?;

    // Stage 2
    let planet_rows: Vec<usize> = (0..n).filter(|&i| planet_classes.contains(&data.y[i])).collect();
    let x_planets = take_rows(&data.x, &planet_rows);
    let y_planets: Vec<usize> = planet_rows
        .iter()
        .map(|&i| usize::from(data.y[i] == confirmed))
        .collect();
    let stage2_splits = plan_subset_folds(planner, &data.y, &data.groups, &planet_rows)?;
    let stage2_spec = ModelSpec::XGBoost(config.stage2.clone());
    let stage2_cv = cross_val_oof(STAGE2_NAME, &stage2_spec, &x_planets, &y_planets, &stage2_splits, None)?;
    let stage2_oof_pred: Vec<usize> = stage2_cv.oof_pred.iter().map(|&c| planet_classes[c]).collect();
    let y_planets_enc: Vec<usize> = planet_rows.iter().map(|&i| data.y[i]).collect();
    let stage2_accuracy = accuracy(&y_planets_enc, &stage2_oof_pred);
    let candidate_recall = class_scores(&y_planets_enc, &stage2_oof_pred, candidate).recall;
    let confirmed_recall = class_scores(&y_planets_enc, &stage2_oof_pred, confirmed).recall;
    info!(
        accuracy = stage2_accuracy,
        candidate_recall,
        confirmed_recall,
        "Stage 2 planet classifier"
    );
    let mut stage2 = stage2_spec.build();
    stage2.fit(&x_planets, &y_planets, None)?;

    let combined_pred = combine_stages(n, &stage1_oof_pred, &planet_rows, &stage2_oof_pred, false_positive);
    let metrics = MultiStepMetrics {
        accuracy: accuracy(&data.y, &combined_pred),
        stage1_recall: stage1_scores.recall,
        stage1_precision: stage1_scores.precision,
        stage2_accuracy,
        candidate_recall,
        confirmed_recall,
    };
    info!(accuracy = metrics.accuracy, "Multi-step combined accuracy");

    let saved_path = match save_prefix {
        Some(prefix) => {
            let oof = OofRecord::new(&data.y)
                .with_probabilities(STAGE1_NAME, &stage1_cv.oof_proba)
                .with_predictions(STAGE1_NAME, &stage1_oof_pred)
                .with_probabilities(STAGE2_NAME, &stage2_cv.oof_proba)
                .with_predictions(STAGE2_NAME, &stage2_cv.oof_pred)
                .with_rows(STAGE2_NAME, &planet_rows)
                .with_predictions("MultiStep_NN_XGB", &combined_pred);

            let stage_path = |suffix: &str| PathBuf::from(format!("{}_{}.json", prefix.display(), suffix));
            ModelArtifact::new(
                ModelTag::MultiStepNnXgb,
                STAGE1_NAME,
                LabelEncoder::from_classes(vec!["FALSE POSITIVE".to_string(), "PLANET".to_string()]),
                ArtifactPayload::Single { model: stage1.clone() },
            )
            .with_metric("recall", metrics.stage1_recall)
            .with_metric("precision", metrics.stage1_precision)
            .with_metric("threshold", config.threshold)
            .save(&stage_path("stage1"))?;
            ModelArtifact::new(
                ModelTag::MultiStepNnXgb,
                STAGE2_NAME,
                LabelEncoder::from_classes(vec!["CANDIDATE".to_string(), "CONFIRMED".to_string()]),
                ArtifactPayload::Single { model: stage2.clone() },
            )
            .with_metric("accuracy", metrics.stage2_accuracy)
            .save(&stage_path("stage2"))?;

            let path = stage_path("multistep");
            ModelArtifact::new(
                ModelTag::MultiStepNnXgb,
                "MultiStep_NN_XGB",
                encoder.clone(),
                ArtifactPayload::Cascade {
                    stage1_name: STAGE1_NAME.to_string(),
                    stage1: stage1.clone(),
                    stage2_name: STAGE2_NAME.to_string(),
                    stage2: stage2.clone(),
                    threshold: config.threshold,
                    stage2_classes: planet_classes.clone(),
                    rejected_class: false_positive,
                },
            )
            .with_metric("accuracy", metrics.accuracy)
            .with_metric("stage1_recall", metrics.stage1_recall)
            .with_metric("stage1_precision", metrics.stage1_precision)
            .with_metric("stage2_accuracy", metrics.stage2_accuracy)
            .with_oof(oof)
            .save(&path)?;
            Some(path)
        }
        None => None,
    };

    Ok(MultiStepOutcome {
        stage1_oof_pred,
        stage2_oof_pred,
        combined_pred,
        metrics,
        stage1,
        stage2,
        saved_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data_split::group_fold_planner;
    use crate::training::test_support::synthetic_prepared;
    use tempfile::tempdir;

    fn small_config() -> MultiStepConfig {
        MultiStepConfig {
            stage1: MLPConfig {
                hidden_layers: vec![16],
                max_epochs: 60,
                early_stopping: false,
                learning_rate: 0.01,
                ..Default::default()
            },
            stage2: XGBoostConfig { n_estimators: 10, max_depth: 3, ..Default::default() },
            threshold: DEFAULT_STAGE1_THRESHOLD,
        }
    }

    #[test]
    fn test_combine_stages_defaults_to_rejected() {
        let stage1 = vec![1, 0, 1, 1];
        let planet_rows = vec![0, 1, 3];
        let stage2 = vec![1, 0, 0];
        assert_eq!(combine_stages(4, &stage1, &planet_rows, &stage2, 2), vec![1, 2, 2, 0]);
    }

    #[test]
    fn test_multistep_trains_and_saves() {
        let dir = tempdir().unwrap();
        let data = synthetic_prepared(120);
        let prefix = dir.path().join("multistep_nn_xgb");
        let outcome = train_multistep_nn_xgb(&data, &group_fold_planner(5, 42), &small_config(), Some(&prefix)).unwrap();

        assert_eq!(outcome.combined_pred.len(), 120);
        assert_eq!(outcome.stage2_oof_pred.len(), 80);
        assert!(outcome.metrics.stage1_recall > 0.8, "{:?}", outcome.metrics);
        assert!(outcome.metrics.accuracy > 0.7, "{:?}", outcome.metrics);

        let artifact = ModelArtifact::load(&dir.path().join("multistep_nn_xgb_multistep.json")).unwrap();
        assert_eq!(artifact.model_type, ModelTag::MultiStepNnXgb);
        match &artifact.payload {
            ArtifactPayload::Cascade { stage1_name, stage2_name, threshold, rejected_class, .. } => {
                assert_eq!(stage1_name, STAGE1_NAME);
                assert_eq!(stage2_name, STAGE2_NAME);
                assert_eq!(*threshold, 0.25);
                assert_eq!(*rejected_class, 2);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let oof = artifact.oof.unwrap();
        assert_eq!(oof.y_true.len(), 120);
        assert_eq!(oof.probabilities[STAGE1_NAME].dim(), (120, 2));
        assert_eq!(oof.predictions[STAGE1_NAME], outcome.stage1_oof_pred);
        assert_eq!(oof.rows[STAGE2_NAME].len(), 80);
        assert_eq!(oof.predictions[STAGE2_NAME].len(), 80);
        assert_eq!(oof.predictions["MultiStep_NN_XGB"], outcome.combined_pred);

        for (suffix, name) in [("stage1", STAGE1_NAME), ("stage2", STAGE2_NAME)] {
            let stage = ModelArtifact::load(&dir.path().join(format!("multistep_nn_xgb_{}.json", suffix))).unwrap();
            assert_eq!(stage.model_name, name);
            assert_eq!(stage.label_encoder.n_classes(), 2);
            assert!(matches!(stage.payload, ArtifactPayload::Single { .. }));
        }
    }
}
