//! Group-aware cross-validation of the four tree ensembles

use crate::error::{KoiError, Result};
use crate::evaluation::metrics::{evaluate_best_model, ModelEvaluation};
use crate::training::artifact::{ArtifactPayload, ModelArtifact, ModelTag};
use crate::training::catboost::CatBoostConfig;
use crate::training::data_split::{balanced_class_weights, balanced_sample_weights, PreparedData};
use crate::training::lightgbm::LightGBMConfig;
use crate::training::models::{Classifier, ClassifierModel, ModelSpec};
use crate::training::oof::{cross_val_oof, OofResult};
use crate::training::random_forest::RandomForestConfig;
use crate::training::xgboost::XGBoostConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Features reported after the full refit
pub const TOP_FEATURES: usize = 25;

/// XGBoost, LightGBM, CatBoost and random forest with their KOI parameters
pub fn default_ensemble_members() -> Vec<(String, ModelSpec)> {
    vec![
        ("XGBoost".to_string(), ModelSpec::XGBoost(XGBoostConfig::koi_ensemble())),
        ("LightGBM".to_string(), ModelSpec::LightGBM(LightGBMConfig::koi_ensemble())),
        ("CatBoost".to_string(), ModelSpec::CatBoost(CatBoostConfig::koi_ensemble())),
        ("RandomForest".to_string(), ModelSpec::RandomForest(RandomForestConfig::koi_ensemble())),
    ]
}

/// Result of [`train_ensemble_models`]
#[derive(Debug, Clone)]
pub struct EnsembleOutcome {
    /// OOF results in member order
    pub cv_results: Vec<(String, OofResult)>,
    pub best_model_name: String,
    /// Members refitted on all rows
    pub trained_models: Vec<(String, ClassifierModel)>,
    pub evaluation: ModelEvaluation,
    pub saved_paths: Vec<PathBuf>,
}

impl EnsembleOutcome {
    pub fn result(&self, name: &str) -> Option<&OofResult> {
        self.cv_results.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn trained(&self, name: &str) -> Option<&ClassifierModel> {
        self.trained_models.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    /// Mean CV accuracy per member
    pub fn accuracies(&self) -> BTreeMap<String, f64> {
        self.cv_results
            .iter()
            .map(|(n, r)| (n.clone(), r.summary.accuracy))
            .collect()
    }
}

/// Cross-validate every member, pick the most accurate, refit all on the
/// full data and optionally save each as `trained_{name}.json`
pub fn train_ensemble_models(
    data: &PreparedData,
    members: &[(String, ModelSpec)],
    class_weight: bool,
    save_dir: Option<&Path>,
) -> Result<EnsembleOutcome> {
    if members.is_empty() {
        return Err(KoiError::TrainingError("no ensemble members configured".to_string()));
    }
    let weights = if class_weight {
        let per_class: BTreeMap<usize, f64> = balanced_class_weights(&data.y).into_iter().collect();
        info!(class_weights = ?per_class, "Balanced class weights");
        Some(balanced_sample_weights(&data.y))
    } else {
        None
    };

    let mut cv_results = Vec::with_capacity(members.len());
    for (name, spec) in members {
        let result = cross_val_oof(name, spec, &data.x, &data.y, &data.splits, weights.as_deref())?;
        cv_results.push((name.clone(), result));
    }

    let (best_model_name, best) = best_by_accuracy(&cv_results)
        .ok_or_else(|| KoiError::TrainingError("no cross-validation results".to_string()))?;
    info!(model = %best_model_name, accuracy = best.summary.accuracy, "Best model");

    let mut trained_models = Vec::with_capacity(members.len());
    for (name, spec) in members {
        info!(model = %name, "Training on full dataset");
        let mut model = spec.build();
        model.fit(&data.x, &data.y, weights.as_deref())?;
        trained_models.push((name.clone(), model));
    }

    if let Some((_, xgb)) = trained_models.iter().find(|(n, _)| n == "XGBoost") {
        log_top_features(xgb, &data.feature_names, TOP_FEATURES);
    }

    let evaluation = evaluate_best_model(
        &best_model_name,
        &data.y,
        &best.oof_pred,
        Some(&best.oof_proba),
        data.label_encoder.classes(),
    )?;

    let mut saved_paths = Vec::new();
    if let Some(dir) = save_dir {
        for ((name, model), (_, result)) in trained_models.iter().zip(&cv_results) {
            let path = dir.join(format!("trained_{}.json", name.to_lowercase()));
            ModelArtifact::new(
                ModelTag::SingleEnsemble,
                name,
                data.label_encoder.clone(),
                ArtifactPayload::Single { model: model.clone() },
            )
            .with_metric("cv_accuracy", result.summary.accuracy)
            .with_metric("cv_std", result.summary.accuracy_std)
            .save(&path)?;
            saved_paths.push(path);
        }
    }

    Ok(EnsembleOutcome {
        cv_results,
        best_model_name,
        trained_models,
        evaluation,
        saved_paths,
    })
}

/// Highest mean accuracy; the earliest member wins ties
pub fn best_by_accuracy(results: &[(String, OofResult)]) -> Option<(String, &OofResult)> {
    let mut best: Option<(String, &OofResult)> = None;
    for (name, result) in results {
        let better = match &best {
            None => true,
            Some((_, current)) => result.summary.accuracy > current.summary.accuracy,
        };
        if better {
            best = Some((name.clone(), result));
        }
    }
    best
}

/// Feature names ordered by decreasing importance
pub fn top_features(model: &ClassifierModel, feature_names: &[String], k: usize) -> Vec<(String, f64)> {
    let Some(importances) = model.feature_importances() else {
        return Vec::new();
    };
    let mut ranked: Vec<(String, f64)> = feature_names
        .iter()
        .cloned()
        .zip(importances.iter().copied())
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(k);
    ranked
}

pub fn log_top_features(model: &ClassifierModel, feature_names: &[String], k: usize) {
    for (rank, (name, importance)) in top_features(model, feature_names, k).iter().enumerate() {
        info!(rank = rank + 1, feature = %name, importance, "Feature importance");
    }
}
