//! Model training
//!
//! Provides the classifiers used for KOI dispositions (histogram boosting in
//! XGBoost, LightGBM and CatBoost flavours, random forests, an MLP and
//! logistic regression) plus the group-aware trainers built on them:
//! - Single-model ensemble comparison with OOF bookkeeping
//! - CONFIRMED vs FALSE POSITIVE binary experiment
//! - Two-stage MLP/XGBoost cascade
//! - Stacking and XGBoost grid tuning

pub mod artifact;
pub mod binary_trainer;
pub mod binning;
pub mod catboost;
pub mod cross_validation;
pub mod data_split;
pub mod decision_tree;
pub mod ensemble_trainer;
pub mod lightgbm;
pub mod linear_models;
pub mod models;
pub mod multistep_trainer;
pub mod neural_network;
pub mod objective;
pub mod oof;
pub mod random_forest;
pub mod stacking_trainer;
pub mod tuning;
pub mod xgboost;

#[cfg(test)]
mod test_support;

pub use artifact::{ArtifactPayload, ModelArtifact, ModelTag, OofRecord};
pub use binary_trainer::{train_binary_planet_model, BinaryOutcome};
pub use catboost::{CatBoostClassifier, CatBoostConfig};
pub use cross_validation::{CVResults, CVSplit, CVStrategy, CrossValidator};
pub use data_split::{
    align_to_manifest, group_fold_planner, load_manifest, prepare_data_for_training, save_manifest, LabelEncoder,
    PreparedData, GROUP_COLUMN,
};
pub use decision_tree::{Criterion, DecisionTree};
pub use ensemble_trainer::{default_ensemble_members, train_ensemble_models, EnsembleOutcome};
pub use lightgbm::{LightGBMClassifier, LightGBMConfig};
pub use linear_models::{LogisticRegression, LogisticRegressionConfig};
pub use models::{Classifier, ClassifierModel, ModelSpec};
pub use multistep_trainer::{train_multistep_nn_xgb, MultiStepConfig, MultiStepMetrics, MultiStepOutcome};
pub use neural_network::{Activation, MLPClassifier, MLPConfig};
pub use oof::{cross_val_oof, CvSummary, FoldMetrics, OofResult};
pub use random_forest::{MaxFeatures, RandomForest, RandomForestConfig};
pub use stacking_trainer::{train_stacking_ensemble, StackingOutcome};
pub use tuning::{tune_xgboost_hyperparameters, TuningOutcome, XGBoostGrid, XGBoostParams};
pub use xgboost::{XGBoostClassifier, XGBoostConfig};
