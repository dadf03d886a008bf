//! Stacking ensemble method
//!
//! Base models produce out-of-fold class probabilities through an inner
//! stratified K-fold; a meta-learner is fitted on those probabilities and
//! every base model is then refitted on the full training set.

use crate::error::{KoiError, Result};
use crate::training::catboost::CatBoostConfig;
use crate::training::cross_validation::{CVStrategy, CrossValidator};
use crate::training::lightgbm::LightGBMConfig;
use crate::training::linear_models::{LogisticRegression, LogisticRegressionConfig};
use crate::training::models::{check_fit_inputs, take_rows, Classifier, ClassifierModel, ModelSpec};
use crate::training::random_forest::RandomForestConfig;
use crate::training::xgboost::XGBoostConfig;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for stacking ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackingConfig {
    /// Named base learners
    pub base_models: Vec<(String, ModelSpec)>,
    pub meta_learner: LogisticRegressionConfig,
    /// Number of inner cross-validation folds
    pub n_folds: usize,
    /// Shuffle rows before assigning inner folds
    pub shuffle: bool,
    /// Whether to include original features in meta-learner input
    pub passthrough: bool,
    pub seed: Option<u64>,
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self {
            base_models: Vec::new(),
            meta_learner: LogisticRegressionConfig::stacking_meta(),
            n_folds: 3,
            shuffle: false,
            passthrough: false,
            seed: None,
        }
    }
}

impl StackingConfig {
    /// XGBoost, LightGBM, CatBoost and random forest under a logistic meta-learner
    pub fn koi_default() -> Self {
        Self {
            base_models: vec![
                ("XGBoost".to_string(), ModelSpec::XGBoost(XGBoostConfig::koi_ensemble())),
                ("LightGBM".to_string(), ModelSpec::LightGBM(LightGBMConfig::koi_ensemble())),
                ("CatBoost".to_string(), ModelSpec::CatBoost(CatBoostConfig::koi_ensemble())),
                ("RandomForest".to_string(), ModelSpec::RandomForest(RandomForestConfig::koi_ensemble())),
            ],
            ..Default::default()
        }
    }
}

/// Stacking classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackingClassifier {
    config: StackingConfig,
    /// Base models refitted on all training rows
    fitted_base_models: Vec<(String, ClassifierModel)>,
    fitted_meta_learner: Option<LogisticRegression>,
    n_classes: usize,
    /// Out-of-fold class probabilities of each base model from the last fit
    #[serde(skip)]
    oof_base_proba: Vec<(String, Array2<f64>)>,
}

impl StackingClassifier {
    pub fn new(config: StackingConfig) -> Self {
        Self {
            config,
            fitted_base_models: Vec::new(),
            fitted_meta_learner: None,
            n_classes: 0,
            oof_base_proba: Vec::new(),
        }
    }

    pub fn config(&self) -> &StackingConfig {
        &self.config
    }

    /// Probability columns one base model contributes
    fn block_width(&self) -> usize {
        if self.n_classes == 2 {
            1
        } else {
            self.n_classes
        }
    }

    /// Fit the stacking ensemble
    pub fn fit(&mut self, x: &Array2<f64>, y: &[usize], sample_weight: Option<&[f64]>) -> Result<()> {
        if self.config.base_models.is_empty() {
            return Err(KoiError::ValidationError("No base models provided".to_string()));
        }
        self.n_classes = check_fit_inputs(x, y)?;
        let n_samples = x.nrows();
        let width = self.block_width();
        let n_base = self.config.base_models.len();

        let cv = CrossValidator::new(CVStrategy::StratifiedKFold {
            n_splits: self.config.n_folds,
            shuffle: self.config.shuffle,
        })
        .with_random_state(self.config.seed.unwrap_or(42));
        let splits = cv.split(n_samples, Some(y), None)?;

        let meta_cols = n_base * width + if self.config.passthrough { x.ncols() } else { 0 };
        let mut meta_features = Array2::zeros((n_samples, meta_cols));

        // Generate out-of-fold predictions for each base model
        let mut oof_base_proba = Vec::with_capacity(n_base);
        for (base_idx, (name, spec)) in self.config.base_models.iter().enumerate() {
            let mut oof = Array2::zeros((n_samples, self.n_classes));
            for split in &splits {
                let x_train = take_rows(x, &split.train_indices);
                let y_train: Vec<usize> = split.train_indices.iter().map(|&i| y[i]).collect();
                let w_train: Option<Vec<f64>> =
                    sample_weight.map(|w| split.train_indices.iter().map(|&i| w[i]).collect());

                let mut model = spec.build();
                model.fit(&x_train, &y_train, w_train.as_deref())?;
                let proba = model.predict_proba(&take_rows(x, &split.test_indices))?;

                for (local, &global) in split.test_indices.iter().enumerate() {
                    self.write_block(&mut meta_features, global, base_idx, &proba, local);
                    for c in 0..proba.ncols().min(self.n_classes) {
                        oof[[global, c]] = proba[[local, c]];
                    }
                }
            }
            debug!(base = %name, folds = splits.len(), "Stacking base model cross-validated");
            oof_base_proba.push((name.clone(), oof));
        }
        self.oof_base_proba = oof_base_proba;

        if self.config.passthrough {
            let offset = n_base * width;
            for i in 0..n_samples {
                for j in 0..x.ncols() {
                    meta_features[[i, offset + j]] = x[[i, j]];
                }
            }
        }

        let mut meta = LogisticRegression::new(self.config.meta_learner.clone());
        meta.fit(&meta_features, y, sample_weight)?;
        self.fitted_meta_learner = Some(meta);

        // Refit base models on all data
        self.fitted_base_models.clear();
        for (name, spec) in &self.config.base_models {
            let mut model = spec.build();
            model.fit(x, y, sample_weight)?;
            self.fitted_base_models.push((name.clone(), model));
        }
        Ok(())
    }

    /// Copy one base model's probabilities for one row into the meta matrix
    fn write_block(&self, meta: &mut Array2<f64>, row: usize, base_idx: usize, proba: &Array2<f64>, local: usize) {
        let width = self.block_width();
        if width == 1 {
            meta[[row, base_idx]] = if proba.ncols() > 1 { proba[[local, 1]] } else { 0.0 };
        } else {
            for c in 0..proba.ncols().min(width) {
                meta[[row, base_idx * width + c]] = proba[[local, c]];
            }
        }
    }

    fn meta_features(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.fitted_base_models.is_empty() {
            return Err(KoiError::ModelNotFitted);
        }
        let width = self.block_width();
        let n_base = self.fitted_base_models.len();
        let meta_cols = n_base * width + if self.config.passthrough { x.ncols() } else { 0 };
        let mut meta = Array2::zeros((x.nrows(), meta_cols));

        for (base_idx, (_, model)) in self.fitted_base_models.iter().enumerate() {
            let proba = model.predict_proba(x)?;
            for i in 0..x.nrows() {
                self.write_block(&mut meta, i, base_idx, &proba, i);
            }
        }
        if self.config.passthrough {
            let offset = n_base * width;
            for i in 0..x.nrows() {
                for j in 0..x.ncols() {
                    meta[[i, offset + j]] = x[[i, j]];
                }
            }
        }
        Ok(meta)
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let meta_learner = self.fitted_meta_learner.as_ref().ok_or(KoiError::ModelNotFitted)?;
        meta_learner.predict_proba(&self.meta_features(x)?)
    }

    /// Out-of-fold probabilities the meta-learner was trained on, one matrix
    /// per base model; empty for a loaded model
    pub fn oof_base_predictions(&self) -> &[(String, Array2<f64>)] {
        &self.oof_base_proba
    }

    /// Class probabilities of each refitted base model
    pub fn base_predictions(&self, x: &Array2<f64>) -> Result<Vec<(String, Array2<f64>)>> {
        self.fitted_base_models
            .iter()
            .map(|(name, model)| Ok((name.clone(), model.predict_proba(x)?)))
            .collect()
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }
}
