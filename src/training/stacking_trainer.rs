//! Group-aware evaluation and full refit of the stacking ensemble

use crate::ensemble::StackingConfig;
use crate::error::Result;
use crate::evaluation::metrics::{confusion_matrix, per_class_recall};
use crate::training::artifact::{ArtifactPayload, ModelArtifact, ModelTag, OofRecord};
use crate::training::data_split::PreparedData;
use crate::training::models::{argmax_rows, Classifier, ClassifierModel, ModelSpec};
use crate::training::oof::{cross_val_oof, OofResult};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
pub struct StackingOutcome {
    pub cv_result: OofResult,
    pub model: ClassifierModel,
    /// Accuracy gain over the reference model, in percentage points
    pub improvement: Option<f64>,
}

/// Cross-validate the stack with the outer group folds, compare against a
/// reference accuracy, refit on all rows and optionally save the artifact
pub fn train_stacking_ensemble(
    data: &PreparedData,
    config: &StackingConfig,
    reference: Option<(&str, f64)>,
    save_path: Option<&Path>,
) -> Result<StackingOutcome> {
    let spec = ModelSpec::Stacking(Box::new(config.clone()));
    let cv_result = cross_val_oof("Stacking", &spec, &data.x, &data.y, &data.splits, None)?;

    let improvement = reference.map(|(name, accuracy)| {
        let gain = (cv_result.summary.accuracy - accuracy) * 100.0;
        info!(
            stacking = cv_result.summary.accuracy,
            reference_model = %name,
            reference = accuracy,
            improvement_pct = gain,
            "Stacking vs best individual model"
        );
        gain
    });

    let classes = data.label_encoder.classes();
    let cm = confusion_matrix(&data.y, &cv_result.oof_pred, classes.len());
    let recalls = per_class_recall(&data.y, &cv_result.oof_pred, classes.len());
    for (i, class) in classes.iter().enumerate() {
        info!(class = %class, recall = recalls[i], confusion_row = ?cm[i], "Stacking per-class recall");
    }

    let mut model = spec.build();
    model.fit(&data.x, &data.y, None)?;

    if let Some(path) = save_path {
        let mut oof = OofRecord::new(&data.y)
            .with_probabilities("Stacking", &cv_result.oof_proba)
            .with_predictions("Stacking", &cv_result.oof_pred);
        if let ClassifierModel::Stacking(stack) = &model {
            for (name, proba) in stack.oof_base_predictions() {
                oof = oof
                    .with_probabilities(name, proba)
                    .with_predictions(name, &argmax_rows(proba));
            }
        }
        ModelArtifact::new(
            ModelTag::Stacking,
            "Stacking",
            data.label_encoder.clone(),
            ArtifactPayload::Single { model: model.clone() },
        )
        .with_metric("cv_accuracy", cv_result.summary.accuracy)
        .with_metric("cv_std", cv_result.summary.accuracy_std)
        .with_oof(oof)
        .save(path)?;
    }

    Ok(StackingOutcome {
        cv_result,
        model,
        improvement,
    })
}
