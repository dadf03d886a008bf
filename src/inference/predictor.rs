//! Artifact-backed prediction with optional evaluation against ground truth
//!
//! Input rows go through the same cleaning and feature derivation as the
//! training table, are aligned to the saved feature manifest and then
//! dispatched on the artifact layout.

use crate::error::{KoiError, Result};
use crate::evaluation::metrics::{accuracy, confusion_matrix, precision_recall_f1, Average};
use crate::feature_engineering::create_advanced_features;
use crate::preprocessing::clean_koi_dataset;
use crate::training::artifact::{ArtifactPayload, ModelArtifact, ModelTag};
use crate::training::data_split::{align_to_manifest, load_manifest, string_column};
use crate::training::models::{take_rows, Classifier};
use crate::utils::to_records;
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// File name of the feature manifest stored next to every artifact
pub const MANIFEST_FILE: &str = "features.json";

/// Default label column
pub const TARGET_COLUMN: &str = "koi_disposition";

/// Scores against the ground-truth column, weighted over classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub confusion_matrix: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_path: String,
    pub artifact_id: String,
    pub model_type: ModelTag,
    pub elapsed_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResults {
    pub decoded_predictions: Vec<String>,
    /// Present only when the input carried the target column
    pub metrics: Option<PredictionMetrics>,
    pub model_info: ModelInfo,
    /// Engineered input rows with `predicted_label` and `true_label`; empty
    /// without ground truth
    pub row_results: Vec<Map<String, Value>>,
}

/// A loaded artifact together with its feature manifest
#[derive(Debug, Clone)]
pub struct Predictor {
    artifact: ModelArtifact,
    manifest: Vec<String>,
    model_path: PathBuf,
    target_column: String,
}

impl Predictor {
    /// Load an artifact and the `features.json` stored beside it
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self> {
        let model_path = model_path.as_ref().to_path_buf();
        let artifact = ModelArtifact::load(&model_path)?;
        let manifest_path = model_path
            .parent()
            .map(|dir| dir.join(MANIFEST_FILE))
            .unwrap_or_else(|| PathBuf::from(MANIFEST_FILE));
        let manifest = load_manifest(&manifest_path)?;
        info!(
            path = %model_path.display(),
            model_type = %artifact.model_type,
            features = manifest.len(),
            "Loaded model artifact"
        );
        Ok(Self::new(artifact, manifest, model_path))
    }

    pub fn new(artifact: ModelArtifact, manifest: Vec<String>, model_path: PathBuf) -> Self {
        Self {
            artifact,
            manifest,
            model_path,
            target_column: TARGET_COLUMN.to_string(),
        }
    }

    pub fn with_target_column(mut self, target_column: impl Into<String>) -> Self {
        self.target_column = target_column.into();
        self
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn manifest(&self) -> &[String] {
        &self.manifest
    }

    /// Clean, derive features, predict and score a raw KOI table
    pub fn predict(&self, df: &DataFrame, drop_fpflags: bool) -> Result<PredictionResults> {
        if df.height() == 0 {
            return Err(KoiError::InvalidInput("No input data provided".to_string()));
        }
        let cleaned = clean_koi_dataset(df, drop_fpflags)?;
        if cleaned.height() == 0 {
            return Err(KoiError::InvalidInput("No rows left after cleaning".to_string()));
        }
        let engineered = create_advanced_features(&cleaned)?;

        let y_true = match engineered.column(&self.target_column) {
            Ok(_) => {
                info!(target = %self.target_column, "Found target column for evaluation");
                Some(string_column(&engineered, &self.target_column)?)
            }
            Err(_) => None,
        };
        let x = align_to_manifest(&engineered, &self.manifest)?;

        let start = Instant::now();
        let preds = self.predict_indices(&x)?;
        let elapsed_s = start.elapsed().as_secs_f64();
        info!(rows = preds.len(), elapsed_s, "Inference completed");

        let encoder = &self.artifact.label_encoder;
        let decoded_predictions = encoder.inverse_transform(&preds)?;

        let (metrics, row_results) = match y_true {
            Some(truth) => {
                // Truth labels outside the model's classes (CANDIDATE for the
                // binary model) are kept in row_results but not scored.
                let (y_enc, y_pred): (Vec<usize>, Vec<usize>) = truth
                    .iter()
                    .zip(&preds)
                    .filter_map(|(label, &p)| encoder.index_of(label).map(|t| (t, p)))
                    .unzip();
                if y_enc.len() < truth.len() {
                    warn!(
                        unscored = truth.len() - y_enc.len(),
                        classes = ?encoder.classes(),
                        "Rows with labels unknown to the model excluded from metrics"
                    );
                }
                let metrics = score(&y_enc, &y_pred, encoder.n_classes());
                info!(
                    accuracy = metrics.accuracy,
                    precision = metrics.precision,
                    recall = metrics.recall,
                    f1 = metrics.f1,
                    "Evaluation metrics"
                );
                debug!(confusion_matrix = ?metrics.confusion_matrix, classes = ?encoder.classes(), "Confusion matrix");

                let mut rows = to_records(&engineered)?;
                for ((row, predicted), actual) in rows.iter_mut().zip(&decoded_predictions).zip(truth) {
                    row.insert("predicted_label".to_string(), Value::String(predicted.clone()));
                    row.insert("true_label".to_string(), Value::String(actual));
                }
                (Some(metrics), rows)
            }
            None => (None, Vec::new()),
        };

        Ok(PredictionResults {
            decoded_predictions,
            metrics,
            model_info: ModelInfo {
                model_path: self.model_path.display().to_string(),
                artifact_id: self.artifact.id.clone(),
                model_type: self.artifact.model_type,
                elapsed_s,
            },
            row_results,
        })
    }

    /// Encoder indices for an aligned feature matrix
    pub fn predict_indices(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        match &self.artifact.payload {
            ArtifactPayload::Single { model } => model.predict(x),
            ArtifactPayload::Mapped { model, class_map } => model
                .predict(x)?
                .into_iter()
                .map(|c| lookup(class_map, c))
                .collect(),
            ArtifactPayload::Cascade {
                stage1,
                stage2,
                threshold,
                stage2_classes,
                rejected_class,
                ..
            } => {
                let planet_proba = stage1.predict_proba(x)?;
                if planet_proba.ncols() < 2 {
                    return Err(KoiError::InferenceError(
                        "stage-1 model must output two classes".to_string(),
                    ));
                }
                let passing: Vec<usize> = (0..x.nrows())
                    .filter(|&i| planet_proba[[i, 1]] > *threshold)
                    .collect();
                debug!(passing = passing.len(), rows = x.nrows(), "Stage 1 screen");

                let mut preds = vec![*rejected_class; x.nrows()];
                if !passing.is_empty() {
                    let stage2_pred = stage2.predict(&take_rows(x, &passing))?;
                    for (&row, c) in passing.iter().zip(stage2_pred) {
                        preds[row] = lookup(stage2_classes, c)?;
                    }
                }
                Ok(preds)
            }
        }
    }
}

fn lookup(class_map: &[usize], class: usize) -> Result<usize> {
    class_map
        .get(class)
        .copied()
        .ok_or_else(|| KoiError::InferenceError(format!("model class {} has no label mapping", class)))
}

fn score(y_true: &[usize], y_pred: &[usize], n_classes: usize) -> PredictionMetrics {
    let (precision, recall, f1) = precision_recall_f1(y_true, y_pred, Average::Weighted);
    PredictionMetrics {
        accuracy: accuracy(y_true, y_pred),
        precision,
        recall,
        f1,
        confusion_matrix: confusion_matrix(y_true, y_pred, n_classes),
    }
}
