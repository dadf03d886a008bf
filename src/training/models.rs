//! Classifier trait, model specifications and matrix helpers

use crate::ensemble::{StackingClassifier, StackingConfig};
use crate::error::{KoiError, Result};
use crate::training::catboost::{CatBoostClassifier, CatBoostConfig};
use crate::training::lightgbm::{LightGBMClassifier, LightGBMConfig};
use crate::training::linear_models::{LogisticRegression, LogisticRegressionConfig};
use crate::training::neural_network::{MLPClassifier, MLPConfig};
use crate::training::random_forest::{RandomForest, RandomForestConfig};
use crate::training::xgboost::{XGBoostClassifier, XGBoostConfig};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Trait for multiclass probabilistic classifiers
///
/// Labels are dense indices `0..n_classes`; `predict_proba` returns one
/// column per class seen during `fit`.
pub trait Classifier: Send + Sync {
    /// Fit the model, optionally weighting each sample
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], sample_weight: Option<&[f64]>) -> Result<()>;

    /// Class probabilities, shape `(n_samples, n_classes)`
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Most probable class per row
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        Ok(argmax_rows(&self.predict_proba(x)?))
    }

    fn n_classes(&self) -> usize;

    /// Get feature importances (if available)
    fn feature_importances(&self) -> Option<Array1<f64>> {
        None
    }
}

/// Unfitted model description; `build` yields a fresh estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params")]
pub enum ModelSpec {
    XGBoost(XGBoostConfig),
    LightGBM(LightGBMConfig),
    CatBoost(CatBoostConfig),
    RandomForest(RandomForestConfig),
    Mlp(MLPConfig),
    Logistic(LogisticRegressionConfig),
    Stacking(Box<StackingConfig>),
}

impl ModelSpec {
    pub fn build(&self) -> ClassifierModel {
        match self {
            ModelSpec::XGBoost(c) => ClassifierModel::XGBoost(XGBoostClassifier::new(c.clone())),
            ModelSpec::LightGBM(c) => ClassifierModel::LightGBM(LightGBMClassifier::new(c.clone())),
            ModelSpec::CatBoost(c) => ClassifierModel::CatBoost(CatBoostClassifier::new(c.clone())),
            ModelSpec::RandomForest(c) => ClassifierModel::RandomForest(RandomForest::new(c.clone())),
            ModelSpec::Mlp(c) => ClassifierModel::Mlp(MLPClassifier::new(c.clone())),
            ModelSpec::Logistic(c) => ClassifierModel::Logistic(LogisticRegression::new(c.clone())),
            ModelSpec::Stacking(c) => {
                ClassifierModel::Stacking(Box::new(StackingClassifier::new(c.as_ref().clone())))
            }
        }
    }

    /// Short display name used in logs and result maps
    pub fn name(&self) -> &'static str {
        match self {
            ModelSpec::XGBoost(_) => "XGBoost",
            ModelSpec::LightGBM(_) => "LightGBM",
            ModelSpec::CatBoost(_) => "CatBoost",
            ModelSpec::RandomForest(_) => "RandomForest",
            ModelSpec::Mlp(_) => "MLP",
            ModelSpec::Logistic(_) => "LogisticRegression",
            ModelSpec::Stacking(_) => "Stacking",
        }
    }
}

/// A (possibly fitted) estimator of any supported family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model")]
pub enum ClassifierModel {
    XGBoost(XGBoostClassifier),
    LightGBM(LightGBMClassifier),
    CatBoost(CatBoostClassifier),
    RandomForest(RandomForest),
    Mlp(MLPClassifier),
    Logistic(LogisticRegression),
    Stacking(Box<StackingClassifier>),
}

impl Classifier for ClassifierModel {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize], sample_weight: Option<&[f64]>) -> Result<()> {
        match self {
            ClassifierModel::XGBoost(m) => m.fit(x, y, sample_weight),
            ClassifierModel::LightGBM(m) => m.fit(x, y, sample_weight),
            ClassifierModel::CatBoost(m) => m.fit(x, y, sample_weight),
            ClassifierModel::RandomForest(m) => m.fit(x, y, sample_weight),
            ClassifierModel::Mlp(m) => m.fit(x, y, sample_weight),
            ClassifierModel::Logistic(m) => m.fit(x, y, sample_weight),
            ClassifierModel::Stacking(m) => m.fit(x, y, sample_weight),
        }
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            ClassifierModel::XGBoost(m) => m.predict_proba(x),
            ClassifierModel::LightGBM(m) => m.predict_proba(x),
            ClassifierModel::CatBoost(m) => m.predict_proba(x),
            ClassifierModel::RandomForest(m) => m.predict_proba(x),
            ClassifierModel::Mlp(m) => m.predict_proba(x),
            ClassifierModel::Logistic(m) => m.predict_proba(x),
            ClassifierModel::Stacking(m) => m.predict_proba(x),
        }
    }

    fn n_classes(&self) -> usize {
        match self {
            ClassifierModel::XGBoost(m) => m.n_classes(),
            ClassifierModel::LightGBM(m) => m.n_classes(),
            ClassifierModel::CatBoost(m) => m.n_classes(),
            ClassifierModel::RandomForest(m) => m.n_classes(),
            ClassifierModel::Mlp(m) => m.n_classes(),
            ClassifierModel::Logistic(m) => m.n_classes(),
            ClassifierModel::Stacking(m) => m.n_classes(),
        }
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        match self {
            ClassifierModel::XGBoost(m) => m.feature_importances(),
            ClassifierModel::LightGBM(m) => m.feature_importances(),
            ClassifierModel::CatBoost(m) => m.feature_importances(),
            ClassifierModel::RandomForest(m) => m.feature_importances(),
            _ => None,
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Validate a training set and return the number of classes (`max(y) + 1`, at least 2)
pub fn check_fit_inputs(x: &Array2<f64>, y: &[usize]) -> Result<usize> {
    if x.nrows() == 0 {
        return Err(KoiError::TrainingError("cannot fit on an empty matrix".to_string()));
    }
    if x.nrows() != y.len() {
        return Err(KoiError::ShapeError {
            expected: format!("{} labels", x.nrows()),
            actual: format!("{} labels", y.len()),
        });
    }
    let max_label = y.iter().copied().max().unwrap_or(0);
    Ok((max_label + 1).max(2))
}

/// Unit weights when none are given; otherwise check length and sign
pub fn resolve_weights(sample_weight: Option<&[f64]>, n: usize) -> Result<Vec<f64>> {
    match sample_weight {
        None => Ok(vec![1.0; n]),
        Some(w) if w.len() != n => Err(KoiError::ShapeError {
            expected: format!("{} sample weights", n),
            actual: format!("{} sample weights", w.len()),
        }),
        Some(w) if w.iter().any(|v| !v.is_finite() || *v < 0.0) => Err(KoiError::InvalidParameter {
            name: "sample_weight".to_string(),
            value: "negative or non-finite".to_string(),
            reason: "weights must be finite and non-negative".to_string(),
        }),
        Some(w) => Ok(w.to_vec()),
    }
}

/// Index of the largest value in each row; the first maximum wins
pub fn argmax_rows(proba: &Array2<f64>) -> Vec<usize> {
    proba
        .rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            for (j, &p) in row.iter().enumerate() {
                if p > row[best] {
                    best = j;
                }
            }
            best
        })
        .collect()
}

/// Select rows of a matrix by index
pub fn take_rows(x: &Array2<f64>, indices: &[usize]) -> Array2<f64> {
    x.select(ndarray::Axis(0), indices)
}

/// Numeric columns of a table as an `(n_rows, n_columns)` matrix
///
/// Nulls and non-finite values become 0.0.
pub fn dataframe_to_array(df: &DataFrame, columns: &[String]) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let mut x = Array2::zeros((n_rows, columns.len()));
    for (j, name) in columns.iter().enumerate() {
        let column = df
            .column(name)
            .map_err(|_| KoiError::FeatureNotFound(name.clone()))?;
        let cast = column.cast(&DataType::Float64)?;
        let values = cast.f64()?;
        for (i, v) in values.into_iter().enumerate() {
            x[[i, j]] = match v {
                Some(v) if v.is_finite() => v,
                _ => 0.0,
            };
        }
    }
    Ok(x)
}
