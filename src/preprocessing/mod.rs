//! Data preprocessing module
//!
//! - KOI table cleaning (identifier removal, median imputation)
//! - Feature scaling for model inputs

pub mod cleaning;
mod scaler;

pub use cleaning::{clean_koi_dataset, clean_koi_dataset_with_report, CleaningReport};
pub use scaler::StandardScaler;
