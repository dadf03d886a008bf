//! KOI classifier - Kepler Object of Interest disposition classification
//!
//! This crate trains and serves classifiers that label Kepler KOI rows as
//! `CONFIRMED`, `CANDIDATE` or `FALSE POSITIVE`:
//! - KOI table cleaning and astrophysical feature engineering
//! - Group-aware (per-star) stratified cross-validation
//! - Gradient boosting, forest, neural and linear members with stacking
//! - Binary and two-stage cascade pipelines
//! - Per-class threshold calibration and XGBoost grid tuning
//! - HTTP API with per-session folders and a CLI
//!
//! # Modules
//!
//! ## Data
//! - [`utils`] - CSV loading, separator detection, column checks
//! - [`preprocessing`] - KOI cleaning, imputation, scaling
//! - [`feature_engineering`] - Derived KOI features
//!
//! ## Models
//! - [`training`] - Classifiers, cross-validation and trainers
//! - [`ensemble`] - Stacking ensemble
//! - [`evaluation`] - Metrics and best-model reporting
//! - [`calibration`] - Per-class decision thresholds
//! - [`inference`] - Loading artifacts and predicting
//!
//! ## Services
//! - [`pipeline`] - End-to-end training and prediction flows
//! - [`server`] - HTTP server with REST API
//! - [`cli`] - Command-line interface

pub mod error;

// Data
pub mod utils;
pub mod preprocessing;
pub mod feature_engineering;

// Models
pub mod training;
pub mod ensemble;
pub mod evaluation;
pub mod calibration;
pub mod inference;

// Services
pub mod pipeline;
pub mod server;
pub mod cli;

pub use error::{KoiError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{KoiError, Result};

    pub use crate::preprocessing::{clean_koi_dataset, StandardScaler};
    pub use crate::feature_engineering::create_advanced_features;

    pub use crate::training::{
        CVStrategy, Classifier, ClassifierModel, CrossValidator, LabelEncoder, ModelSpec, PreparedData,
    };
    pub use crate::ensemble::{StackingClassifier, StackingConfig};
    pub use crate::evaluation::{evaluate_best_model, ModelEvaluation};
    pub use crate::calibration::{optimize_class_thresholds, ThresholdConfigs};
    pub use crate::inference::{PredictionResults, Predictor};

    pub use crate::pipeline::{ModelKind, OutputLayout, PipelineConfig, PipelineRunner};
}
