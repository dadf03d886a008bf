//! Prediction from saved artifacts

pub mod predictor;

pub use predictor::{ModelInfo, PredictionMetrics, PredictionResults, Predictor, MANIFEST_FILE, TARGET_COLUMN};
