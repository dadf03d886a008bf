//! Model evaluation metrics

pub mod metrics;

pub use metrics::{
    accuracy, confusion_matrix, evaluate_best_model, log_loss, per_class_recall, planet_class_indices,
    planet_recall_precision, precision_recall_f1, roc_auc, Average, ModelEvaluation,
};
