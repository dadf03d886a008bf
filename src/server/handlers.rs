//! HTTP request handlers

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Multipart, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::pipeline::{ModelKind, PipelineRunner};
use crate::utils::{missing_required_columns, DataLoader, REQUIRED_COLUMNS};

use super::error::{Result, ServerError};
use super::state::AppState;

pub const SESSION_HEADER: &str = "user-session-id";

/// Multipart body split into the uploaded file and plain text fields
#[derive(Debug, Default)]
struct FormData {
    file: Option<(String, Bytes)>,
    fields: HashMap<String, String>,
}

impl FormData {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = FormData::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ServerError::BadRequest(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(|e| ServerError::BadRequest(e.to_string()))?;
                info!(file = %file_name, bytes = data.len(), "Received file");
                form.file = Some((file_name, data));
            } else {
                let text = field.text().await.map_err(|e| ServerError::BadRequest(e.to_string()))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    /// The uploaded CSV bytes; a missing part or empty file name is a bad request
    fn csv(&self) -> Result<&Bytes> {
        match &self.file {
            None => Err(ServerError::BadRequest("No file provided".to_string())),
            Some((name, _)) if name.is_empty() => Err(ServerError::BadRequest("No file selected".to_string())),
            Some((_, data)) => Ok(data),
        }
    }

    /// `"true"` in any case; anything else, or absence, is false
    fn flag(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    fn model_kind(&self) -> Result<ModelKind> {
        let raw = self.fields.get("model_type").map(String::as_str).unwrap_or("ensemble");
        raw.parse().map_err(|_| {
            ServerError::BadRequest(format!(
                "Invalid model_type: {}. Must be 'ensemble', 'binary_categories', or 'multistep'",
                raw
            ))
        })
    }
}

fn session_id(headers: &HeaderMap) -> Result<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ServerError::BadRequest(format!("{} header is required", SESSION_HEADER)))
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ServerError::Internal(format!("worker task failed: {}", e)))?
        .map_err(ServerError::from)
}

// ============================================================================
// Service
// ============================================================================

pub async fn index() -> Json<Value> {
    Json(json!({
        "status": "running",
        "endpoints": ["/api/health", "/api/validate", "/api/train", "/api/predict"],
    }))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============================================================================
// Data
// ============================================================================

/// Check an upload for the columns of the cumulative KOI table
pub async fn validate_csv(multipart: Multipart) -> Result<Json<Value>> {
    let form = FormData::read(multipart).await?;
    let df = DataLoader::new().load_csv_bytes(form.csv()?)?;

    let missing = missing_required_columns(&df);
    if !missing.is_empty() {
        return Err(ServerError::MissingColumns {
            missing,
            found: df.get_column_names().iter().map(|s| s.to_string()).collect(),
            required: REQUIRED_COLUMNS.iter().map(|s| s.to_string()).collect(),
        });
    }

    Ok(Json(json!({
        "status": "success",
        "message": "CSV file is valid",
        "rows": df.height(),
        "columns": df.width(),
    })))
}

// ============================================================================
// Training and prediction
// ============================================================================

/// Train a pipeline on an uploaded CSV inside the caller's session folder
pub async fn train(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let session = session_id(&headers)?;
    let layout = state.session_layout(&session)?;
    let form = FormData::read(multipart).await?;

    let kind = form.model_kind()?;
    let class_weight = form.flag("class_weight_penalizing");
    let drop_fpflags = form.flag("drop_fpflags");

    let df = DataLoader::new().load_csv_bytes(form.csv()?)?;
    info!(session = %session, rows = df.height(), columns = df.width(), model_type = %kind, "Training request");
    let csv_path = layout.save_upload(&df)?;

    let runner = PipelineRunner::new(state.pipeline.clone(), layout);
    let report = blocking(move || runner.train(kind, &df, class_weight, drop_fpflags)).await?;
    info!(session = %session, cv_accuracy = report.cv_accuracy, elapsed_s = report.elapsed_s, "Training finished");

    let message = match kind {
        ModelKind::Ensemble => "Ensemble pipeline training completed",
        ModelKind::BinaryCategories => "Binary categories pipeline training completed",
        ModelKind::Multistep => "Multistep pipeline training completed",
    };
    Ok(Json(json!({
        "status": "success",
        "message": message,
        "model_type": kind,
        "user_session_id": session,
        "csv_saved": csv_path.display().to_string(),
        "parameters": {
            "class_weight_penalizing": class_weight,
            "drop_fpflags": drop_fpflags,
        },
    })))
}

/// Predict the session's saved CSV with one of its trained artifacts
pub async fn predict(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let session = session_id(&headers)?;
    let layout = state.session_layout(&session)?;
    if !layout.root().is_dir() {
        return Err(ServerError::NotFound(
            "User session not found. Please train the model first with /train endpoint.".to_string(),
        ));
    }

    let form = FormData::read(multipart).await?;
    let kind = form.model_kind()?;
    let drop_fpflags = form.flag("drop_fpflags");

    let csv_path = layout.uploaded_csv();
    if !csv_path.exists() {
        return Err(ServerError::NotFound(
            "No data file found. Please train the model first with /train endpoint.".to_string(),
        ));
    }
    let model_path = layout.model_path(kind);
    if !model_path.exists() {
        return Err(ServerError::NotFound(format!(
            "Model not found at {}. Please train the model first.",
            model_path.display()
        )));
    }

    let runner = PipelineRunner::new(state.pipeline.clone(), layout);
    let results = blocking(move || {
        let df = runner.layout().load_upload()?;
        info!(rows = df.height(), columns = df.width(), "Starting prediction");
        runner.predict(&df, kind, drop_fpflags)
    })
    .await?;

    Ok(Json(json!({
        "status": "success",
        "message": "Prediction completed",
        "model_type": kind,
        "user_session_id": session,
        "csv_used": csv_path.display().to_string(),
        "results": results,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_session_header_required() {
        let mut headers = HeaderMap::new();
        assert!(matches!(session_id(&headers), Err(ServerError::BadRequest(_))));
        headers.insert(SESSION_HEADER, HeaderValue::from_static(" abc "));
        assert_eq!(session_id(&headers).unwrap(), "abc");
    }

    #[test]
    fn test_form_flags_and_kind() {
        let mut form = FormData::default();
        assert_eq!(form.model_kind().unwrap(), ModelKind::Ensemble);
        assert!(!form.flag("drop_fpflags"));
        form.fields.insert("drop_fpflags".into(), "TRUE".into());
        form.fields.insert("model_type".into(), "stacking".into());
        assert!(form.flag("drop_fpflags"));
        assert!(matches!(form.model_kind(), Err(ServerError::BadRequest(_))));
    }

    #[test]
    fn test_csv_requires_named_file() {
        let mut form = FormData::default();
        assert!(form.csv().is_err());
        form.file = Some((String::new(), Bytes::from_static(b"a,b\n1,2\n")));
        assert!(form.csv().is_err());
        form.file = Some(("koi.csv".into(), Bytes::from_static(b"a,b\n1,2\n")));
        assert!(form.csv().is_ok());
    }
}
