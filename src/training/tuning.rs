//! Exhaustive grid search over XGBoost parameters scored by group-CV accuracy

use crate::error::{KoiError, Result};
use crate::training::artifact::{ArtifactPayload, ModelArtifact, ModelTag};
use crate::training::data_split::PreparedData;
use crate::training::models::{Classifier, ClassifierModel, ModelSpec};
use crate::training::oof::cross_val_oof;
use crate::training::xgboost::XGBoostConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Candidate values for each tuned parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XGBoostGrid {
    pub n_estimators: Vec<usize>,
    pub max_depth: Vec<usize>,
    pub learning_rate: Vec<f64>,
    pub subsample: Vec<f64>,
    pub colsample_bytree: Vec<f64>,
}

impl Default for XGBoostGrid {
    fn default() -> Self {
        Self {
            n_estimators: vec![500, 1000],
            max_depth: vec![4, 5, 6, 7],
            learning_rate: vec![0.01, 0.03, 0.05],
            subsample: vec![0.7, 0.8],
            colsample_bytree: vec![0.7, 0.8],
        }
    }
}

/// One point of the grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XGBoostParams {
    pub colsample_bytree: f64,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub n_estimators: usize,
    pub subsample: f64,
}

impl XGBoostParams {
    /// Fixed regularisation of the KOI booster with these values applied
    pub fn to_config(&self) -> XGBoostConfig {
        XGBoostConfig {
            n_estimators: self.n_estimators,
            max_depth: self.max_depth,
            learning_rate: self.learning_rate,
            subsample: self.subsample,
            colsample_bytree: self.colsample_bytree,
            ..XGBoostConfig::koi_ensemble()
        }
    }
}

impl XGBoostGrid {
    pub fn n_combinations(&self) -> usize {
        self.n_estimators.len()
            * self.max_depth.len()
            * self.learning_rate.len()
            * self.subsample.len()
            * self.colsample_bytree.len()
    }

    /// All combinations, parameter names in alphabetical order with the last varying fastest
    pub fn combinations(&self) -> Vec<XGBoostParams> {
        let mut out = Vec::with_capacity(self.n_combinations());
        for &colsample_bytree in &self.colsample_bytree {
            for &learning_rate in &self.learning_rate {
                for &max_depth in &self.max_depth {
                    for &n_estimators in &self.n_estimators {
                        for &subsample in &self.subsample {
                            out.push(XGBoostParams {
                                colsample_bytree,
                                learning_rate,
                                max_depth,
                                n_estimators,
                                subsample,
                            });
                        }
                    }
                }
            }
        }
        out
    }
}

/// Score of one grid point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridTrial {
    pub trial_id: usize,
    pub params: XGBoostParams,
    pub mean_accuracy: f64,
    pub std_accuracy: f64,
    pub mean_train_accuracy: f64,
    pub duration_secs: f64,
}

/// All trials of a search and the best one
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TuningStudy {
    pub trials: Vec<GridTrial>,
    pub best_trial_idx: Option<usize>,
}

impl TuningStudy {
    /// Record a trial; only a strictly higher accuracy replaces the best
    pub fn add_trial(&mut self, trial: GridTrial) {
        let is_better = match self.best_trial_idx {
            None => true,
            Some(best) => trial.mean_accuracy > self.trials[best].mean_accuracy,
        };
        if is_better {
            self.best_trial_idx = Some(self.trials.len());
        }
        self.trials.push(trial);
    }

    pub fn best_trial(&self) -> Option<&GridTrial> {
        self.best_trial_idx.map(|idx| &self.trials[idx])
    }
}

#[derive(Debug, Clone)]
pub struct TuningOutcome {
    pub best_model: ClassifierModel,
    pub best_params: XGBoostParams,
    pub best_score: f64,
    pub study: TuningStudy,
}

/// Score every grid point with the group folds of `data`, refit the best on
/// all rows and optionally save it as a tuned artifact
pub fn tune_xgboost_hyperparameters(
    data: &PreparedData,
    grid: &XGBoostGrid,
    save_path: Option<&Path>,
) -> Result<TuningOutcome> {
    let combinations = grid.combinations();
    if combinations.is_empty() {
        return Err(KoiError::ConfigError("XGBoost grid has no combinations".to_string()));
    }
    info!(
        combinations = combinations.len(),
        folds = data.splits.len(),
        fits = combinations.len() * data.splits.len(),
        "Starting XGBoost grid search"
    );

    let start = Instant::now();
    let mut study = TuningStudy::default();
    for (trial_id, params) in combinations.into_iter().enumerate() {
        let trial_start = Instant::now();
        let spec = ModelSpec::XGBoost(params.to_config());
        let result = cross_val_oof("XGBoost", &spec, &data.x, &data.y, &data.splits, None)?;
        study.add_trial(GridTrial {
            trial_id,
            params,
            mean_accuracy: result.summary.accuracy,
            std_accuracy: result.summary.accuracy_std,
            mean_train_accuracy: result.summary.train_accuracy,
            duration_secs: trial_start.elapsed().as_secs_f64(),
        });
    }

    let best = study
        .best_trial()
        .ok_or_else(|| KoiError::TrainingError("grid search produced no trials".to_string()))?
        .clone();
    info!(
        best_score = best.mean_accuracy,
        params = ?best.params,
        elapsed_s = start.elapsed().as_secs_f64(),
        "Grid search finished"
    );

    let spec = ModelSpec::XGBoost(best.params.to_config());
    let mut best_model = spec.build();
    best_model.fit(&data.x, &data.y, None)?;

    if let Some(path) = save_path {
        ModelArtifact::new(
            ModelTag::XgboostTuned,
            "XGBoost",
            data.label_encoder.clone(),
            ArtifactPayload::Single { model: best_model.clone() },
        )
        .with_metric("cv_accuracy", best.mean_accuracy)
        .with_metric("cv_std", best.std_accuracy)
        .with_best_params(serde_json::to_value(best.params)?)
        .save(path)?;
    }

    Ok(TuningOutcome {
        best_model,
        best_params: best.params,
        best_score: best.mean_accuracy,
        study,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::test_support::synthetic_prepared;
    use tempfile::tempdir;

    #[test]
    fn test_default_grid_size() {
        let grid = XGBoostGrid::default();
        assert_eq!(grid.n_combinations(), 96);
        let combos = grid.combinations();
        assert_eq!(combos.len(), 96);
        assert_eq!(combos[0].subsample, 0.7);
        assert_eq!(combos[1].subsample, 0.8);
        assert_eq!(combos[1].n_estimators, 500);
    }

    #[test]
    fn test_study_keeps_first_best_on_ties() {
        let params = XGBoostGrid::default().combinations()[0];
        let mut study = TuningStudy::default();
        for (id, acc) in [0.8, 0.9, 0.9, 0.85].into_iter().enumerate() {
            study.add_trial(GridTrial {
                trial_id: id,
                params,
                mean_accuracy: acc,
                std_accuracy: 0.0,
                mean_train_accuracy: 1.0,
                duration_secs: 0.0,
            });
        }
        assert_eq!(study.best_trial().unwrap().trial_id, 1);
    }

    #[test]
    fn test_small_grid_search_saves_best_params() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("xgboost_tuned.json");
        let data = synthetic_prepared(60);
        let grid = XGBoostGrid {
            n_estimators: vec![5],
            max_depth: vec![2, 3],
            learning_rate: vec![0.3],
            subsample: vec![1.0],
            colsample_bytree: vec![1.0],
        };
        let outcome = tune_xgboost_hyperparameters(&data, &grid, Some(&path)).unwrap();
        assert_eq!(outcome.study.trials.len(), 2);

        let artifact = ModelArtifact::load(&path).unwrap();
        assert_eq!(artifact.model_type, ModelTag::XgboostTuned);
        let params: XGBoostParams = serde_json::from_value(artifact.best_params.unwrap()).unwrap();
        assert_eq!(params, outcome.best_params);
        assert_eq!(artifact.metrics["cv_accuracy"], outcome.best_score);
    }
}
