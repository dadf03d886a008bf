//! Persisted model artifacts

use crate::error::{KoiError, Result};
use crate::training::data_split::LabelEncoder;
use crate::training::models::ClassifierModel;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Which trainer produced an artifact; decides how it predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelTag {
    #[serde(rename = "single_ensemble")]
    SingleEnsemble,
    #[serde(rename = "binary_xgboost")]
    BinaryXgboost,
    #[serde(rename = "multi-step_nn_xgb")]
    MultiStepNnXgb,
    #[serde(rename = "stacking")]
    Stacking,
    #[serde(rename = "xgboost_tuned")]
    XgboostTuned,
}

impl ModelTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTag::SingleEnsemble => "single_ensemble",
            ModelTag::BinaryXgboost => "binary_xgboost",
            ModelTag::MultiStepNnXgb => "multi-step_nn_xgb",
            ModelTag::Stacking => "stacking",
            ModelTag::XgboostTuned => "xgboost_tuned",
        }
    }
}

impl fmt::Display for ModelTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fitted estimator(s) held by an artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "layout")]
pub enum ArtifactPayload {
    /// One model whose class indices match the label encoder
    Single { model: ClassifierModel },
    /// One model whose class `i` decodes to encoder index `class_map[i]`
    Mapped { model: ClassifierModel, class_map: Vec<usize> },
    /// Planet screen followed by a planet-type classifier
    Cascade {
        #[serde(default = "default_stage1_name")]
        stage1_name: String,
        stage1: ClassifierModel,
        #[serde(default = "default_stage2_name")]
        stage2_name: String,
        stage2: ClassifierModel,
        threshold: f64,
        /// Encoder index of each stage-2 class
        stage2_classes: Vec<usize>,
        /// Encoder index assigned to rows rejected by stage 1
        rejected_class: usize,
    },
}

fn default_stage1_name() -> String {
    "Stage1_MLP".to_string()
}

fn default_stage2_name() -> String {
    "Stage2_XGB".to_string()
}

/// Out-of-fold predictions over the training rows, keyed by model name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OofRecord {
    /// Training labels in encoder indices
    pub y_true: Vec<usize>,
    #[serde(default)]
    pub probabilities: BTreeMap<String, Array2<f64>>,
    /// Labels in the class space the model was trained on
    #[serde(default)]
    pub predictions: BTreeMap<String, Vec<usize>>,
    /// Training-row indices for models fitted on a subset; absent means all rows
    #[serde(default)]
    pub rows: BTreeMap<String, Vec<usize>>,
}

impl OofRecord {
    pub fn new(y_true: &[usize]) -> Self {
        Self {
            y_true: y_true.to_vec(),
            ..Default::default()
        }
    }

    pub fn with_probabilities(mut self, name: &str, proba: &Array2<f64>) -> Self {
        self.probabilities.insert(name.to_string(), proba.clone());
        self
    }

    pub fn with_predictions(mut self, name: &str, pred: &[usize]) -> Self {
        self.predictions.insert(name.to_string(), pred.to_vec());
        self
    }

    pub fn with_rows(mut self, name: &str, rows: &[usize]) -> Self {
        self.rows.insert(name.to_string(), rows.to_vec());
        self
    }
}

/// A trained model plus everything needed to decode its predictions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Short id distinguishing retrained artifacts at the same path
    #[serde(default)]
    pub id: String,
    pub model_type: ModelTag,
    pub model_name: String,
    pub label_encoder: LabelEncoder,
    pub timestamp: DateTime<Utc>,
    pub payload: ArtifactPayload,
    /// Cross-validation figures such as `cv_accuracy` and `cv_std`
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oof: Option<OofRecord>,
}

impl ModelArtifact {
    pub fn new(model_type: ModelTag, model_name: &str, label_encoder: LabelEncoder, payload: ArtifactPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            model_type,
            model_name: model_name.to_string(),
            label_encoder,
            timestamp: Utc::now(),
            payload,
            metrics: BTreeMap::new(),
            best_params: None,
            oof: None,
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn with_best_params(mut self, params: serde_json::Value) -> Self {
        self.best_params = Some(params);
        self
    }

    pub fn with_oof(mut self, oof: OofRecord) -> Self {
        self.oof = Some(oof);
        self
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        info!(path = %path.display(), id = %self.id, model_type = %self.model_type, model = %self.model_name, "Saved model artifact");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KoiError::ArtifactNotFound(path.display().to_string()));
        }
        let file = File::open(path)?;
        let artifact: Self = serde_json::from_reader(BufReader::new(file))?;
        Ok(artifact)
    }
}
