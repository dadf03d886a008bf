//! Decision-threshold calibration

pub mod thresholds;

pub use thresholds::{
    optimize_class_thresholds, predict_with_thresholds, ThresholdConfigs, ThresholdSearchConfig,
};
