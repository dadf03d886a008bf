//! Ensemble methods
//!
//! Stacking of heterogeneous base classifiers under a meta-learner fitted on
//! out-of-fold probabilities.

mod stacking;

pub use stacking::{StackingClassifier, StackingConfig};
