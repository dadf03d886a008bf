//! End-to-end training and prediction over an output folder
//!
//! Each pipeline cleans the raw table, derives features, plans the host-star
//! folds and writes its artifacts into an [`OutputLayout`]. The HTTP server
//! gives every session its own layout; the CLI uses one folder.

use crate::calibration::{optimize_class_thresholds, ThresholdSearchConfig};
use crate::ensemble::StackingConfig;
use crate::error::{KoiError, Result};
use crate::feature_engineering::create_advanced_features;
use crate::inference::{PredictionResults, Predictor, MANIFEST_FILE, TARGET_COLUMN};
use crate::preprocessing::clean_koi_dataset;
use crate::training::data_split::{group_fold_planner, prepare_data_for_training, PreparedData};
use crate::training::ensemble_trainer::{default_ensemble_members, log_top_features, TOP_FEATURES};
use crate::training::models::ModelSpec;
use crate::training::multistep_trainer::MultiStepConfig;
use crate::training::neural_network::MLPConfig;
use crate::training::random_forest::RandomForestConfig;
use crate::training::tuning::XGBoostGrid;
use crate::training::xgboost::XGBoostConfig;
use crate::training::{
    train_binary_planet_model, train_ensemble_models, train_multistep_nn_xgb, train_stacking_ensemble,
    tune_xgboost_hyperparameters,
};
use crate::utils::{log_dataset_summary, DataLoader, DataSaver};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tracing::{info, warn};

/// Which family of artifacts to train or predict with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Single-model comparison, thresholds, tuning and the stacking ensemble
    Ensemble,
    /// CONFIRMED vs FALSE POSITIVE without CANDIDATE rows
    #[value(name = "binary_categories")]
    BinaryCategories,
    /// MLP planet screen followed by XGBoost
    Multistep,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Ensemble => "ensemble",
            ModelKind::BinaryCategories => "binary_categories",
            ModelKind::Multistep => "multistep",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = KoiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ensemble" => Ok(ModelKind::Ensemble),
            "binary_categories" => Ok(ModelKind::BinaryCategories),
            "multistep" => Ok(ModelKind::Multistep),
            other => Err(KoiError::InvalidParameter {
                name: "model_type".to_string(),
                value: other.to_string(),
                reason: "must be 'ensemble', 'binary_categories', or 'multistep'".to_string(),
            }),
        }
    }
}

/// Training configuration shared by all pipelines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub target_column: String,
    pub n_splits: usize,
    pub seed: u64,
    /// Named members compared by the ensemble pipeline
    pub ensemble_members: Vec<(String, ModelSpec)>,
    pub stacking: StackingConfig,
    pub binary: XGBoostConfig,
    pub multistep: MultiStepConfig,
    pub thresholds: ThresholdSearchConfig,
    pub tuning_grid: XGBoostGrid,
    /// Run the XGBoost grid search in the ensemble pipeline
    pub run_tuning: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_column: TARGET_COLUMN.to_string(),
            n_splits: 5,
            seed: 42,
            ensemble_members: default_ensemble_members(),
            stacking: StackingConfig::koi_default(),
            binary: XGBoostConfig::koi_ensemble(),
            multistep: MultiStepConfig::default(),
            thresholds: ThresholdSearchConfig::default(),
            tuning_grid: XGBoostGrid::default(),
            run_tuning: true,
        }
    }
}

impl PipelineConfig {
    /// Small models and a two-point grid for smoke runs
    pub fn quick() -> Self {
        let xgb = XGBoostConfig {
            n_estimators: 20,
            max_depth: 3,
            learning_rate: 0.2,
            ..XGBoostConfig::default()
        };
        let forest = RandomForestConfig {
            n_estimators: 15,
            max_depth: Some(6),
            ..RandomForestConfig::default()
        };
        let members = vec![
            ("XGBoost".to_string(), ModelSpec::XGBoost(xgb.clone())),
            ("RandomForest".to_string(), ModelSpec::RandomForest(forest)),
        ];
        Self {
            n_splits: 3,
            stacking: StackingConfig {
                base_models: members.clone(),
                ..StackingConfig::default()
            },
            ensemble_members: members,
            binary: xgb.clone(),
            multistep: MultiStepConfig {
                stage1: MLPConfig {
                    hidden_layers: vec![16],
                    max_epochs: 60,
                    learning_rate: 0.01,
                    ..MLPConfig::default()
                },
                stage2: xgb,
                ..MultiStepConfig::default()
            },
            tuning_grid: XGBoostGrid {
                n_estimators: vec![10],
                max_depth: vec![2, 3],
                learning_rate: vec![0.3],
                subsample: vec![1.0],
                colsample_bytree: vec![1.0],
            },
            ..Self::default()
        }
    }

    /// Read a JSON file; omitted fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KoiError::ConfigError(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text).map_err(|e| KoiError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_splits < 2 {
            return Err(KoiError::InvalidParameter {
                name: "n_splits".to_string(),
                value: self.n_splits.to_string(),
                reason: "at least two folds are required".to_string(),
            });
        }
        if self.ensemble_members.is_empty() {
            return Err(KoiError::ConfigError("no ensemble members configured".to_string()));
        }
        if !(0.0..1.0).contains(&self.multistep.threshold) {
            return Err(KoiError::InvalidParameter {
                name: "multistep.threshold".to_string(),
                value: self.multistep.threshold.to_string(),
                reason: "must lie in [0, 1)".to_string(),
            });
        }
        Ok(())
    }
}

/// File names inside one output folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn uploaded_csv(&self) -> PathBuf {
        self.root.join("uploaded_data.csv")
    }

    pub fn stacking_model(&self) -> PathBuf {
        self.root.join("stacking_model.json")
    }

    pub fn binary_model(&self) -> PathBuf {
        self.root.join("binary_categories_model.json")
    }

    /// Prefix the multi-step trainer appends `_multistep.json` to
    pub fn multistep_prefix(&self) -> PathBuf {
        self.root.join("multistep_nn_xgb")
    }

    pub fn multistep_model(&self) -> PathBuf {
        self.root.join("multistep_nn_xgb_multistep.json")
    }

    pub fn threshold_configs(&self) -> PathBuf {
        self.root.join("threshold_configs.json")
    }

    pub fn tuned_model(&self) -> PathBuf {
        self.root.join("xgboost_tuned.json")
    }

    /// Artifact a prediction of `kind` loads
    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        match kind {
            ModelKind::Ensemble => self.stacking_model(),
            ModelKind::BinaryCategories => self.binary_model(),
            ModelKind::Multistep => self.multistep_model(),
        }
    }

    /// Store an upload as comma-separated CSV
    pub fn save_upload(&self, df: &DataFrame) -> Result<PathBuf> {
        self.ensure()?;
        let path = self.uploaded_csv();
        let mut copy = df.clone();
        DataSaver::save_csv(&mut copy, &path.to_string_lossy())?;
        info!(path = %path.display(), rows = df.height(), columns = df.width(), "Saved uploaded CSV");
        Ok(path)
    }

    pub fn load_upload(&self) -> Result<DataFrame> {
        let path = self.uploaded_csv();
        if !path.exists() {
            return Err(KoiError::ArtifactNotFound(path.display().to_string()));
        }
        DataLoader::new().load_csv(&path.to_string_lossy())
    }
}

/// Headline figures of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model_type: ModelKind,
    pub artifact: PathBuf,
    pub rows: usize,
    pub features: usize,
    pub cv_accuracy: f64,
    /// Per-pipeline extras such as member accuracies or stage recalls
    pub details: BTreeMap<String, f64>,
    pub elapsed_s: f64,
}

/// Runs the pipelines against one output folder
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    config: PipelineConfig,
    layout: OutputLayout,
}

impl PipelineRunner {
    pub fn new(config: PipelineConfig, layout: OutputLayout) -> Self {
        Self { config, layout }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Train the pipeline selected by `kind`
    pub fn train(
        &self,
        kind: ModelKind,
        raw: &DataFrame,
        class_weight: bool,
        drop_fpflags: bool,
    ) -> Result<TrainingReport> {
        match kind {
            ModelKind::Ensemble => self.ensemble_pipeline(raw, class_weight, drop_fpflags),
            ModelKind::BinaryCategories => self.binary_categories_pipeline(raw, drop_fpflags),
            ModelKind::Multistep => self.multistep_pipeline(raw, drop_fpflags),
        }
    }

    fn prepare(&self, raw: &DataFrame, drop_fpflags: bool) -> Result<PreparedData> {
        self.config.validate()?;
        self.layout.ensure()?;
        log_dataset_summary(raw, &self.config.target_column);
        let cleaned = clean_koi_dataset(raw, drop_fpflags)?;
        let engineered = create_advanced_features(&cleaned)?;
        prepare_data_for_training(
            &engineered,
            raw,
            &self.config.target_column,
            self.config.n_splits,
            self.config.seed,
            &self.layout.manifest(),
        )
    }

    /// Member comparison, threshold search on the XGBoost OOF probabilities,
    /// optional grid tuning, then the stacking ensemble used for prediction
    pub fn ensemble_pipeline(&self, raw: &DataFrame, class_weight: bool, drop_fpflags: bool) -> Result<TrainingReport> {
        let start = Instant::now();
        let data = self.prepare(raw, drop_fpflags)?;
        let ensemble = train_ensemble_models(&data, &self.config.ensemble_members, class_weight, Some(self.layout.root()))?;

        let mut details: BTreeMap<String, f64> = ensemble
            .accuracies()
            .into_iter()
            .map(|(name, acc)| (format!("{}_cv_accuracy", name.to_lowercase()), acc))
            .collect();

        match ensemble.result("XGBoost") {
            Some(xgb) => {
                let configs = optimize_class_thresholds(
                    &data.y,
                    &xgb.oof_proba,
                    data.label_encoder.classes(),
                    &self.config.thresholds,
                    Some(&self.layout.threshold_configs()),
                )?;
                if let Some(configs) = configs {
                    details.insert("threshold_candidate_recall".to_string(), configs.optimized.candidate_recall);
                    details.insert("threshold_accuracy".to_string(), configs.optimized.accuracy);
                }
            }
            None => warn!("No XGBoost member; skipping threshold search"),
        }

        if self.config.run_tuning {
            let tuned = tune_xgboost_hyperparameters(&data, &self.config.tuning_grid, Some(&self.layout.tuned_model()))?;
            details.insert("xgboost_tuned_cv_accuracy".to_string(), tuned.best_score);
        }

        let reference = ensemble
            .result("XGBoost")
            .map(|r| ("XGBoost", r.summary.accuracy))
            .or_else(|| {
                ensemble
                    .result(&ensemble.best_model_name)
                    .map(|r| (ensemble.best_model_name.as_str(), r.summary.accuracy))
            });
        let artifact = self.layout.stacking_model();
        let stacking = train_stacking_ensemble(&data, &self.config.stacking, reference, Some(&artifact))?;
        if let Some(gain) = stacking.improvement {
            details.insert("stacking_improvement_pct".to_string(), gain);
        }

        Ok(TrainingReport {
            model_type: ModelKind::Ensemble,
            artifact,
            rows: data.n_samples(),
            features: data.feature_names.len(),
            cv_accuracy: stacking.cv_result.summary.accuracy,
            details,
            elapsed_s: start.elapsed().as_secs_f64(),
        })
    }

    pub fn binary_categories_pipeline(&self, raw: &DataFrame, drop_fpflags: bool) -> Result<TrainingReport> {
        let start = Instant::now();
        let data = self.prepare(raw, drop_fpflags)?;
        let planner = group_fold_planner(self.config.n_splits, self.config.seed);
        let outcome = train_binary_planet_model(&data, &planner, &self.config.binary, Some(self.layout.root()))?;
        log_top_features(&outcome.model, &data.feature_names, TOP_FEATURES);

        let details = BTreeMap::from([
            ("removed_candidates".to_string(), outcome.n_removed as f64),
            ("planet_recall".to_string(), outcome.evaluation.planet_recall),
            ("weighted_f1".to_string(), outcome.evaluation.weighted_f1),
        ]);
        Ok(TrainingReport {
            model_type: ModelKind::BinaryCategories,
            artifact: outcome.saved_path.unwrap_or_else(|| self.layout.binary_model()),
            rows: outcome.cv_result.oof_pred.len(),
            features: data.feature_names.len(),
            cv_accuracy: outcome.cv_result.summary.accuracy,
            details,
            elapsed_s: start.elapsed().as_secs_f64(),
        })
    }

    pub fn multistep_pipeline(&self, raw: &DataFrame, drop_fpflags: bool) -> Result<TrainingReport> {
        let start = Instant::now();
        let data = self.prepare(raw, drop_fpflags)?;
        let planner = group_fold_planner(self.config.n_splits, self.config.seed);
        let outcome = train_multistep_nn_xgb(
            &data,
            &planner,
            &self.config.multistep,
            Some(&self.layout.multistep_prefix()),
        )?;

        let metrics = &outcome.metrics;
        let details = BTreeMap::from([
            ("stage1_recall".to_string(), metrics.stage1_recall),
            ("stage1_precision".to_string(), metrics.stage1_precision),
            ("stage2_accuracy".to_string(), metrics.stage2_accuracy),
            ("candidate_recall".to_string(), metrics.candidate_recall),
            ("confirmed_recall".to_string(), metrics.confirmed_recall),
        ]);
        Ok(TrainingReport {
            model_type: ModelKind::Multistep,
            artifact: outcome.saved_path.unwrap_or_else(|| self.layout.multistep_model()),
            rows: data.n_samples(),
            features: data.feature_names.len(),
            cv_accuracy: metrics.accuracy,
            details,
            elapsed_s: start.elapsed().as_secs_f64(),
        })
    }

    /// Predict a raw table with the artifact of `kind` in this folder
    pub fn predict(&self, raw: &DataFrame, kind: ModelKind, drop_fpflags: bool) -> Result<PredictionResults> {
        let path = self.layout.model_path(kind);
        if !path.exists() {
            return Err(KoiError::ArtifactNotFound(path.display().to_string()));
        }
        Predictor::load(&path)?
            .with_target_column(self.config.target_column.clone())
            .predict(raw, drop_fpflags)
    }
}

/// Synthetic KOI-shaped tables for tests and benchmarks
pub mod fixtures {
    use polars::prelude::*;

    const CLASSES: [&str; 3] = ["CANDIDATE", "CONFIRMED", "FALSE POSITIVE"];

    /// `n_stars` host stars with one or two KOIs each; the disposition is
    /// recoverable from the period and radius columns
    pub fn synthetic_koi_table(n_stars: usize) -> DataFrame {
        let mut kepid = Vec::new();
        let mut disposition = Vec::new();
        let mut period = Vec::new();
        let mut prad = Vec::new();
        let mut depth = Vec::new();
        let mut snr = Vec::new();
        let mut flag = Vec::new();
        for star in 0..n_stars {
            for k in 0..(1 + star % 2) {
                let class = (star + k) % 3;
                let jitter = ((star * 7 + k * 3) % 11) as f64 * 0.01;
                kepid.push(10_000 + star as i64);
                disposition.push(CLASSES[class]);
                period.push(5.0 + class as f64 * 20.0 + jitter * 10.0);
                prad.push(1.0 + class as f64 * 3.0 + jitter);
                depth.push(100.0 * (class + 1) as f64 + jitter * 50.0);
                snr.push(10.0 + ((star * 13) % 17) as f64);
                flag.push(i64::from(class == 2));
            }
        }
        DataFrame::new(vec![
            Column::new("kepid".into(), kepid),
            Column::new("koi_period".into(), period),
            Column::new("koi_prad".into(), prad),
            Column::new("koi_depth".into(), depth),
            Column::new("koi_model_snr".into(), snr),
            Column::new("koi_fpflag_nt".into(), flag),
            Column::new("koi_disposition".into(), disposition),
        ])
        .unwrap_or_default()
    }
}
