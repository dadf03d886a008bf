//! Error types for the server

use crate::error::KoiError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Missing required columns: {}", missing.join(", "))]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
        required: Vec<String>,
    },

    #[error(transparent)]
    Koi(#[from] KoiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) | ServerError::MissingColumns { .. } => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Koi(e) => match e {
                KoiError::ArtifactNotFound(_) => StatusCode::NOT_FOUND,
                KoiError::DataError(_)
                | KoiError::InvalidInput(_)
                | KoiError::InvalidParameter { .. }
                | KoiError::FeatureNotFound(_)
                | KoiError::RowMismatch { .. }
                | KoiError::ValidationError(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(detail = %self, "Request failed");
        }

        let body = match &self {
            ServerError::MissingColumns { missing, found, required } => json!({
                "status": "error",
                "message": self.to_string(),
                "missing_columns": missing,
                "found_columns": found,
                "required_columns": required,
            }),
            _ => json!({
                "status": "error",
                "message": self.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
