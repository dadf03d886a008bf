//! XGBoost-style gradient boosting with second-order approximation
//!
//! Key differences from standard gradient boosting:
//! - Uses both gradient (first derivative) and hessian (second derivative) of loss
//! - Regularized leaf weights: w* = -T(G, alpha) / (H + lambda)
//! - Gain-based split scoring: Gain = 0.5 * [GL²/(HL+λ) + GR²/(HR+λ) - (GL+GR)²/(HL+HR+λ)]
//!   and a split is kept only when Gain > γ
//! - Built-in L1 (alpha) and L2 (lambda) regularization
//! - Minimum child weight constraint
//!
//! Trees are grown level-wise on a quantile-binned copy of the input. With
//! more than two classes each boosting round grows one tree per class on the
//! softmax gradients.

use crate::error::{KoiError, Result};
use crate::training::binning::{build_histogram, partition_rows, BinnedMatrix, DEFAULT_MAX_BINS};
use crate::training::models::{check_fit_inputs, resolve_weights};
use crate::training::objective::ClassificationObjective;
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// XGBoost configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XGBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    pub reg_lambda: f64,
    /// L1 regularization on leaf weights
    pub reg_alpha: f64,
    /// Minimum loss reduction to make a split (gamma)
    pub gamma: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub max_bins: usize,
    pub random_state: Option<u64>,
}

impl Default for XGBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            gamma: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            max_bins: DEFAULT_MAX_BINS,
            random_state: Some(42),
        }
    }
}

impl XGBoostConfig {
    /// Parameters used for the KOI ensemble member
    pub fn koi_ensemble() -> Self {
        Self {
            n_estimators: 500,
            learning_rate: 0.03,
            max_depth: 5,
            min_child_weight: 3.0,
            reg_lambda: 1.5,
            reg_alpha: 0.3,
            gamma: 0.1,
            subsample: 0.7,
            colsample_bytree: 0.7,
            max_bins: DEFAULT_MAX_BINS,
            random_state: Some(42),
        }
    }
}

/// A single node in the XGBoost tree
#[derive(Debug, Clone, Serialize, Deserialize)]
enum XGBNode {
    Leaf { weight: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<XGBNode>,
        right: Box<XGBNode>,
    },
}

impl XGBNode {
    fn predict(&self, sample: &ArrayView1<f64>) -> f64 {
        match self {
            XGBNode::Leaf { weight } => *weight,
            XGBNode::Split { feature, threshold, left, right } => {
                if sample[*feature] <= *threshold {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
        }
    }
}

struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

struct TreeContext<'a> {
    binned: &'a BinnedMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    config: &'a XGBoostConfig,
}

/// Soft-threshold for L1
fn threshold_l1(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

/// Optimal leaf weight with L1 (alpha) and L2 (lambda) regularization
fn compute_leaf_weight(g_sum: f64, h_sum: f64, lambda: f64, alpha: f64) -> f64 {
    -threshold_l1(g_sum, alpha) / (h_sum + lambda)
}

fn structure_score(g: f64, h: f64, lambda: f64, alpha: f64) -> f64 {
    let t = threshold_l1(g, alpha);
    t * t / (h + lambda)
}

/// Grow a tree level by level, recording split gains into `importance`
fn build_xgb_tree(
    ctx: &TreeContext,
    rows: &[usize],
    depth: usize,
    importance: &mut [f64],
) -> XGBNode {
    let config = ctx.config;
    let g_sum: f64 = rows.iter().map(|&i| ctx.grad[i]).sum();
    let h_sum: f64 = rows.iter().map(|&i| ctx.hess[i]).sum();
    let leaf_weight = compute_leaf_weight(g_sum, h_sum, config.reg_lambda, config.reg_alpha);

    if depth >= config.max_depth || rows.len() < 2 || h_sum < 2.0 * config.min_child_weight {
        return XGBNode::Leaf { weight: leaf_weight };
    }

    let parent_score = structure_score(g_sum, h_sum, config.reg_lambda, config.reg_alpha);

    let best = ctx
        .features
        .par_iter()
        .filter_map(|&feature| {
            let hist = build_histogram(ctx.binned, feature, rows, ctx.grad, ctx.hess);
            let mut g_left = 0.0;
            let mut h_left = 0.0;
            let mut best: Option<SplitCandidate> = None;

            for (bin, slot) in hist.iter().enumerate().take(hist.len().saturating_sub(1)) {
                g_left += slot.grad;
                h_left += slot.hess;
                let g_right = g_sum - g_left;
                let h_right = h_sum - h_left;
                if h_left < config.min_child_weight || h_right < config.min_child_weight {
                    continue;
                }
                let gain = 0.5
                    * (structure_score(g_left, h_left, config.reg_lambda, config.reg_alpha)
                        + structure_score(g_right, h_right, config.reg_lambda, config.reg_alpha)
                        - parent_score);
                if best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate { feature, bin, gain });
                }
            }
            best
        })
        .max_by(|a, b| {
            a.gain
                .partial_cmp(&b.gain)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.feature.cmp(&a.feature))
        });

    match best {
        Some(split) if split.gain > config.gamma => {
            let (left_rows, right_rows) = partition_rows(ctx.binned, split.feature, split.bin, rows);
            if left_rows.is_empty() || right_rows.is_empty() {
                return XGBNode::Leaf { weight: leaf_weight };
            }
            importance[split.feature] += split.gain;

            let left = build_xgb_tree(ctx, &left_rows, depth + 1, importance);
            let right = build_xgb_tree(ctx, &right_rows, depth + 1, importance);

            XGBNode::Split {
                feature: split.feature,
                threshold: ctx.binned.mapper(split.feature).threshold(split.bin),
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        _ => XGBNode::Leaf { weight: leaf_weight },
    }
}

// ─── XGBoost Classifier ────────────────────────────────────────────────────

/// XGBoost Classifier (logistic or softmax loss with second-order approximation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoostClassifier {
    pub config: XGBoostConfig,
    /// One entry per boosting round, one tree per output
    trees: Vec<Vec<XGBNode>>,
    base_scores: Vec<f64>,
    n_classes: usize,
    n_features: usize,
    gain_importance: Vec<f64>,
}

impl XGBoostClassifier {
    pub fn new(config: XGBoostConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_scores: Vec::new(),
            n_classes: 0,
            n_features: 0,
            gain_importance: Vec::new(),
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &[usize], sample_weight: Option<&[f64]>) -> Result<()> {
        let n_classes = check_fit_inputs(x, y)?;
        let weights = resolve_weights(sample_weight, y.len())?;
        let n_samples = x.nrows();
        let n_features = x.ncols();

        let objective = ClassificationObjective::new(n_classes);
        let n_outputs = objective.n_outputs();
        let binned = BinnedMatrix::from_array(x, self.config.max_bins);

        self.n_classes = objective.n_classes();
        self.n_features = n_features;
        self.base_scores = objective.base_scores(y, &weights);
        self.gain_importance = vec![0.0; n_features];
        self.trees.clear();

        let mut raw = Array2::zeros((n_samples, n_outputs));
        for (k, &b) in self.base_scores.iter().enumerate() {
            raw.column_mut(k).fill(b);
        }

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        for _ in 0..self.config.n_estimators {
            let (grad, hess) = objective.gradients(&raw, y, &weights);
            let row_indices = subsample(&mut rng, n_samples, self.config.subsample);

            let mut round = Vec::with_capacity(n_outputs);
            for k in 0..n_outputs {
                let col_indices = subsample(&mut rng, n_features, self.config.colsample_bytree);
                let g: Vec<f64> = grad.column(k).to_vec();
                let h: Vec<f64> = hess.column(k).to_vec();
                let ctx = TreeContext {
                    binned: &binned,
                    grad: &g,
                    hess: &h,
                    features: &col_indices,
                    config: &self.config,
                };
                let tree = build_xgb_tree(&ctx, &row_indices, 0, &mut self.gain_importance);

                for (i, row) in x.rows().into_iter().enumerate() {
                    raw[[i, k]] += self.config.learning_rate * tree.predict(&row);
                }
                round.push(tree);
            }
            self.trees.push(round);
        }

        Ok(())
    }

    fn predict_raw(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.base_scores.is_empty() {
            return Err(KoiError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(KoiError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        let n_outputs = self.base_scores.len();
        let mut raw = Array2::zeros((x.nrows(), n_outputs));
        for (i, row) in x.rows().into_iter().enumerate() {
            for k in 0..n_outputs {
                let mut score = self.base_scores[k];
                for round in &self.trees {
                    score += self.config.learning_rate * round[k].predict(&row);
                }
                raw[[i, k]] = score;
            }
        }
        Ok(raw)
    }

    /// Class probabilities, one column per class
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let raw = self.predict_raw(x)?;
        Ok(ClassificationObjective::new(self.n_classes).transform(&raw))
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Total split gain per feature, normalised to sum to one
    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        if self.n_features == 0 {
            return None;
        }
        let total: f64 = self.gain_importance.iter().sum();
        let scale = if total > 0.0 { total } else { 1.0 };
        Some(Array1::from_iter(self.gain_importance.iter().map(|g| g / scale)))
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn subsample(rng: &mut Xoshiro256PlusPlus, n: usize, ratio: f64) -> Vec<usize> {
    if ratio >= 1.0 {
        return (0..n).collect();
    }
    let k = (((n as f64) * ratio).ceil() as usize).max(1);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices.truncate(k);
    indices.sort();
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::models::argmax_rows;

    fn binary_data() -> (Array2<f64>, Vec<usize>) {
        let x = Array2::from_shape_vec((50, 2), (0..100).map(|i| i as f64 * 0.1).collect()).unwrap();
        let y = x
            .rows()
            .into_iter()
            .map(|r| if r[0] + r[1] > 5.0 { 1 } else { 0 })
            .collect();
        (x, y)
    }

    fn three_class_data() -> (Array2<f64>, Vec<usize>) {
        let x = Array2::from_shape_fn((90, 3), |(i, j)| ((i * 7 + j * 13) % 10) as f64 + (i / 30) as f64 * 10.0);
        let y = (0..90).map(|i| i / 30).collect();
        (x, y)
    }

    fn accuracy(pred: &[usize], y: &[usize]) -> f64 {
        pred.iter().zip(y).filter(|(p, t)| p == t).count() as f64 / y.len() as f64
    }

    #[test]
    fn test_xgboost_binary() {
        let (x, y) = binary_data();
        let mut model = XGBoostClassifier::new(XGBoostConfig {
            n_estimators: 50,
            max_depth: 4,
            ..Default::default()
        });
        model.fit(&x, &y, None).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 2);
        let acc = accuracy(&argmax_rows(&proba), &y);
        assert!(acc >= 0.8, "XGBoost classifier accuracy = {}", acc);
    }

    #[test]
    fn test_xgboost_multiclass() {
        let (x, y) = three_class_data();
        let mut model = XGBoostClassifier::new(XGBoostConfig {
            n_estimators: 30,
            max_depth: 3,
            ..Default::default()
        });
        model.fit(&x, &y, None).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        assert_eq!(proba.dim(), (90, 3));
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!(accuracy(&argmax_rows(&proba), &y) > 0.9);
    }

    #[test]
    fn test_xgboost_regularization_and_sampling() {
        let (x, y) = three_class_data();
        let mut model = XGBoostClassifier::new(XGBoostConfig {
            n_estimators: 10,
            reg_lambda: 10.0,
            reg_alpha: 1.0,
            gamma: 1.0,
            subsample: 0.7,
            colsample_bytree: 0.7,
            ..Default::default()
        });
        model.fit(&x, &y, None).unwrap();
        assert_eq!(model.predict_proba(&x).unwrap().nrows(), 90);
    }

    #[test]
    fn test_feature_importances_normalised() {
        let (x, y) = three_class_data();
        let mut model = XGBoostClassifier::new(XGBoostConfig {
            n_estimators: 5,
            ..Default::default()
        });
        model.fit(&x, &y, None).unwrap();
        let imp = model.feature_importances().unwrap();
        assert_eq!(imp.len(), 3);
        assert!((imp.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_predict_before_fit() {
        let model = XGBoostClassifier::new(XGBoostConfig::default());
        assert!(model.predict_proba(&Array2::zeros((1, 2))).is_err());
    }

    #[test]
    fn test_sample_weights_shift_prior() {
        let x = Array2::zeros((4, 1));
        let y = vec![0, 0, 0, 1];
        let mut plain = XGBoostClassifier::new(XGBoostConfig { n_estimators: 1, ..Default::default() });
        plain.fit(&x, &y, None).unwrap();
        let mut weighted = XGBoostClassifier::new(XGBoostConfig { n_estimators: 1, ..Default::default() });
        weighted.fit(&x, &y, Some(&[1.0, 1.0, 1.0, 3.0])).unwrap();

        let p_plain = plain.predict_proba(&x).unwrap()[[0, 1]];
        let p_weighted = weighted.predict_proba(&x).unwrap()[[0, 1]];
        assert!(p_weighted > p_plain);
    }
}
