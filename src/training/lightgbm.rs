//! LightGBM-style gradient boosting with leaf-wise tree growth
//!
//! Key differences from standard/XGBoost-style gradient boosting:
//! - Leaf-wise (best-first) tree growth instead of level-wise
//! - Histogram split search over quantile bins
//! - Optional Gradient-based One-Side Sampling (GOSS): keeps top gradients,
//!   samples low gradients and re-weights them by (1 - top_rate) / other_rate

use crate::error::{KoiError, Result};
use crate::training::binning::{build_histogram, partition_rows, BinnedMatrix, DEFAULT_MAX_BINS};
use crate::training::models::{check_fit_inputs, resolve_weights};
use crate::training::objective::ClassificationObjective;
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightGBMConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_leaves: usize,
    pub max_depth: Option<usize>,
    pub min_child_samples: usize,
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    /// Use GOSS instead of uniform row subsampling
    pub goss: bool,
    pub top_rate: f64,
    pub other_rate: f64,
    pub max_bins: usize,
    pub random_state: Option<u64>,
}

impl Default for LightGBMConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_leaves: 31,
            max_depth: None,
            min_child_samples: 20,
            reg_lambda: 0.0,
            reg_alpha: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            goss: false,
            top_rate: 0.2,
            other_rate: 0.1,
            max_bins: DEFAULT_MAX_BINS,
            random_state: Some(42),
        }
    }
}

impl LightGBMConfig {
    /// Parameters used for the KOI ensemble member
    pub fn koi_ensemble() -> Self {
        Self {
            n_estimators: 500,
            learning_rate: 0.03,
            max_depth: Some(5),
            min_child_samples: 20,
            reg_lambda: 2.5,
            reg_alpha: 1.0,
            subsample: 0.7,
            colsample_bytree: 0.7,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum LGBNode {
    Leaf { value: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<LGBNode>,
        right: Box<LGBNode>,
    },
}

impl LGBNode {
    fn predict(&self, sample: &ArrayView1<f64>) -> f64 {
        match self {
            LGBNode::Leaf { value } => *value,
            LGBNode::Split { feature, threshold, left, right } => {
                if sample[*feature] <= *threshold {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
        }
    }
}

// ---- Tree building utilities ----

fn compute_leaf_weight(g: f64, h: f64, lambda: f64, alpha: f64) -> f64 {
    let g_adj = if g.abs() <= alpha { 0.0 } else { g - alpha * g.signum() };
    -g_adj / (h + lambda)
}

fn compute_gain_single(g: f64, h: f64, lambda: f64, alpha: f64) -> f64 {
    let g_adj = if g.abs() <= alpha { 0.0 } else { g - alpha * g.signum() };
    g_adj * g_adj / (h + lambda)
}

fn make_leaf(grad: &[f64], hess: &[f64], rows: &[usize], config: &LightGBMConfig) -> LGBNode {
    let g: f64 = rows.iter().map(|&i| grad[i]).sum();
    let h: f64 = rows.iter().map(|&i| hess[i]).sum();
    LGBNode::Leaf { value: compute_leaf_weight(g, h, config.reg_lambda, config.reg_alpha) }
}

struct PendingSplit {
    gain: f64,
    node_id: usize,
    feature: usize,
    bin: usize,
}

impl PartialEq for PendingSplit {
    fn eq(&self, other: &Self) -> bool {
        self.gain == other.gain
    }
}
impl Eq for PendingSplit {}
impl PartialOrd for PendingSplit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingSplit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.gain
            .partial_cmp(&other.gain)
            .unwrap_or(Ordering::Equal)
            .then(other.node_id.cmp(&self.node_id))
    }
}

enum NodeSlot {
    Leaf(Vec<usize>),
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

struct TreeContext<'a> {
    binned: &'a BinnedMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    config: &'a LightGBMConfig,
}

/// Best (feature, bin, gain) for a leaf, or None when no split improves the loss
fn find_best_split(ctx: &TreeContext, rows: &[usize]) -> Option<(usize, usize, f64)> {
    let config = ctx.config;
    if rows.len() < config.min_child_samples * 2 {
        return None;
    }
    let total_g: f64 = rows.iter().map(|&i| ctx.grad[i]).sum();
    let total_h: f64 = rows.iter().map(|&i| ctx.hess[i]).sum();
    let base_score = compute_gain_single(total_g, total_h, config.reg_lambda, config.reg_alpha);

    ctx.features
        .par_iter()
        .filter_map(|&feature| {
            let hist = build_histogram(ctx.binned, feature, rows, ctx.grad, ctx.hess);
            let mut left_g = 0.0;
            let mut left_h = 0.0;
            let mut left_n = 0usize;
            let mut best: Option<(usize, usize, f64)> = None;

            for (bin, slot) in hist.iter().enumerate().take(hist.len().saturating_sub(1)) {
                left_g += slot.grad;
                left_h += slot.hess;
                left_n += slot.count;
                let right_n = rows.len() - left_n;
                if left_n < config.min_child_samples || right_n < config.min_child_samples {
                    continue;
                }
                if slot.count == 0 {
                    continue;
                }
                let gain = compute_gain_single(left_g, left_h, config.reg_lambda, config.reg_alpha)
                    + compute_gain_single(total_g - left_g, total_h - left_h, config.reg_lambda, config.reg_alpha)
                    - base_score;
                if best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((feature, bin, gain));
                }
            }
            best
        })
        .filter(|&(_, _, gain)| gain > 0.0)
        .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(Ordering::Equal).then(b.0.cmp(&a.0)))
}

/// Build tree using leaf-wise (best-first) strategy
fn build_lgb_tree(ctx: &TreeContext, rows: &[usize], importance: &mut [f64]) -> LGBNode {
    let config = ctx.config;
    let max_depth_limit = config.max_depth.unwrap_or(usize::MAX);

    let mut nodes: Vec<NodeSlot> = vec![NodeSlot::Leaf(rows.to_vec())];
    let mut depths: Vec<usize> = vec![0];
    let mut heap: BinaryHeap<PendingSplit> = BinaryHeap::new();

    if max_depth_limit > 0 {
        if let Some((feature, bin, gain)) = find_best_split(ctx, rows) {
            heap.push(PendingSplit { gain, node_id: 0, feature, bin });
        }
    }

    let mut n_leaves = 1usize;
    while n_leaves < config.max_leaves {
        let Some(split) = heap.pop() else { break };

        let node_rows = match &nodes[split.node_id] {
            NodeSlot::Leaf(r) => r.clone(),
            NodeSlot::Split { .. } => continue,
        };
        let (left_rows, right_rows) = partition_rows(ctx.binned, split.feature, split.bin, &node_rows);
        let depth = depths[split.node_id];
        let left_id = nodes.len();
        let right_id = left_id + 1;

        importance[split.feature] += split.gain;
        nodes[split.node_id] = NodeSlot::Split {
            feature: split.feature,
            threshold: ctx.binned.mapper(split.feature).threshold(split.bin),
            left: left_id,
            right: right_id,
        };

        if depth + 1 < max_depth_limit {
            for (child_id, child_rows) in [(left_id, &left_rows), (right_id, &right_rows)] {
                if let Some((feature, bin, gain)) = find_best_split(ctx, child_rows) {
                    heap.push(PendingSplit { gain, node_id: child_id, feature, bin });
                }
            }
        }
        nodes.push(NodeSlot::Leaf(left_rows));
        nodes.push(NodeSlot::Leaf(right_rows));
        depths.push(depth + 1);
        depths.push(depth + 1);
        n_leaves += 1;
    }

    fn to_node(nodes: &[NodeSlot], idx: usize, ctx: &TreeContext) -> LGBNode {
        match &nodes[idx] {
            NodeSlot::Leaf(rows) => make_leaf(ctx.grad, ctx.hess, rows, ctx.config),
            NodeSlot::Split { feature, threshold, left, right } => LGBNode::Split {
                feature: *feature,
                threshold: *threshold,
                left: Box::new(to_node(nodes, *left, ctx)),
                right: Box::new(to_node(nodes, *right, ctx)),
            },
        }
    }
    to_node(&nodes, 0, ctx)
}

/// Rows kept by GOSS and the multiplier applied to each of them
fn goss_sample(
    magnitude: &[f64],
    top_rate: f64,
    other_rate: f64,
    rng: &mut Xoshiro256PlusPlus,
) -> (Vec<usize>, Vec<f64>) {
    let n = magnitude.len();
    let n_top = ((n as f64 * top_rate).ceil() as usize).min(n);
    let n_other = (n as f64 * other_rate).ceil() as usize;
    let mut sorted: Vec<usize> = (0..n).collect();
    sorted.sort_by(|&a, &b| magnitude[b].partial_cmp(&magnitude[a]).unwrap_or(Ordering::Equal));

    let mut multiplier = vec![1.0; n];
    let mut selected: Vec<usize> = sorted[..n_top].to_vec();
    let mut remaining: Vec<usize> = sorted[n_top..].to_vec();
    remaining.shuffle(rng);
    remaining.truncate(n_other);
    let amplify = if other_rate > 0.0 { (1.0 - top_rate) / other_rate } else { 1.0 };
    for &i in &remaining {
        multiplier[i] = amplify;
    }
    selected.extend(remaining);
    selected.sort_unstable();
    (selected, multiplier)
}

fn uniform_sample(n: usize, ratio: f64, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
    if ratio >= 1.0 {
        return (0..n).collect();
    }
    let k = ((n as f64 * ratio).ceil() as usize).max(1);
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(rng);
    idx.truncate(k);
    idx.sort_unstable();
    idx
}

// ============ LightGBM Classifier ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightGBMClassifier {
    pub config: LightGBMConfig,
    trees: Vec<Vec<LGBNode>>,
    base_scores: Vec<f64>,
    n_classes: usize,
    n_features: usize,
    gain_importance: Vec<f64>,
}

impl LightGBMClassifier {
    pub fn new(config: LightGBMConfig) -> Self {
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
        let n = x.nrows();
        let n_features = x.ncols();

        let objective = ClassificationObjective::new(n_classes);
        let n_outputs = objective.n_outputs();
        let binned = BinnedMatrix::from_array(x, self.config.max_bins);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state.unwrap_or(42));

        self.n_classes = objective.n_classes();
        self.n_features = n_features;
        self.base_scores = objective.base_scores(y, &weights);
        self.gain_importance = vec![0.0; n_features];
        self.trees.clear();

        let mut raw = Array2::zeros((n, n_outputs));
        for (k, &b) in self.base_scores.iter().enumerate() {
            raw.column_mut(k).fill(b);
        }

        for _ in 0..self.config.n_estimators {
            let (grad, hess) = objective.gradients(&raw, y, &weights);

            let (rows, multiplier) = if self.config.goss {
                let magnitude: Vec<f64> = grad.rows().into_iter().map(|r| r.iter().map(|g| g.abs()).sum()).collect();
                goss_sample(&magnitude, self.config.top_rate, self.config.other_rate, &mut rng)
            } else {
                (uniform_sample(n, self.config.subsample, &mut rng), vec![1.0; n])
            };
            let features = uniform_sample(n_features, self.config.colsample_bytree, &mut rng);

            let mut round = Vec::with_capacity(n_outputs);
            for k in 0..n_outputs {
                let g: Vec<f64> = grad.column(k).iter().zip(&multiplier).map(|(g, m)| g * m).collect();
                let h: Vec<f64> = hess.column(k).iter().zip(&multiplier).map(|(h, m)| h * m).collect();
                let ctx = TreeContext {
                    binned: &binned,
                    grad: &g,
                    hess: &h,
                    features: &features,
                    config: &self.config,
                };
                let tree = build_lgb_tree(&ctx, &rows, &mut self.gain_importance);
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
                raw[[i, k]] = self.base_scores[k]
                    + self
                        .trees
                        .iter()
                        .map(|round| self.config.learning_rate * round[k].predict(&row))
                        .sum::<f64>();
            }
        }
        Ok(raw)
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let raw = self.predict_raw(x)?;
        Ok(ClassificationObjective::new(self.n_classes).transform(&raw))
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        if self.n_features == 0 {
            return None;
        }
        let total: f64 = self.gain_importance.iter().sum();
        let scale = if total > 0.0 { total } else { 1.0 };
        Some(Array1::from_iter(self.gain_importance.iter().map(|g| g / scale)))
    }
}
