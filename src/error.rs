//! Error types for the KOI classifier

use thiserror::Error;

/// Result type alias for classifier operations
pub type Result<T> = std::result::Result<T, KoiError>;

/// Main error type for the classifier library
#[derive(Error, Debug)]
pub enum KoiError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Preprocessing error: {0}")]
    PreprocessingError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Column not found: {0}")]
    FeatureNotFound(String),

    #[error("Row mismatch: engineered table has {engineered} rows, group table has {groups} rows")]
    RowMismatch { engineered: usize, groups: usize },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<polars::error::PolarsError> for KoiError {
    fn from(err: polars::error::PolarsError) -> Self {
        KoiError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for KoiError {
    fn from(err: serde_json::Error) -> Self {
        KoiError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for KoiError {
    fn from(err: ndarray::ShapeError) -> Self {
        KoiError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KoiError::DataError("test error".to_string());
        assert_eq!(err.to_string(), "Data error: test error");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KoiError = io_err.into();
        assert!(matches!(err, KoiError::IoError(_)));
    }

    #[test]
    fn test_row_mismatch_display() {
        let err = KoiError::RowMismatch { engineered: 3, groups: 5 };
        assert_eq!(
            err.to_string(),
            "Row mismatch: engineered table has 3 rows, group table has 5 rows"
        );
    }
}
