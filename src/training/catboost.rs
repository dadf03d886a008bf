//! CatBoost-style gradient boosting with symmetric (oblivious) trees
//!
//! Key features:
//! - Symmetric trees: all nodes at the same depth use the same split
//! - One tree structure per round shared by every class output; leaves hold
//!   one value per output
//! - Split search over quantile bins, gain summed across all buckets

use crate::error::{KoiError, Result};
use crate::training::binning::{BinnedMatrix, DEFAULT_MAX_BINS};
use crate::training::models::{check_fit_inputs, resolve_weights};
use crate::training::objective::ClassificationObjective;
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// L2 leaf regularization
    pub reg_lambda: f64,
    pub subsample: f64,
    pub max_bins: usize,
    pub random_state: Option<u64>,
}

impl Default for CatBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 6,
            reg_lambda: 3.0,
            subsample: 1.0,
            max_bins: DEFAULT_MAX_BINS,
            random_state: Some(42),
        }
    }
}

impl CatBoostConfig {
    /// Parameters used for the KOI ensemble member
    pub fn koi_ensemble() -> Self {
        Self {
            n_estimators: 700,
            learning_rate: 0.05,
            max_depth: 7,
            reg_lambda: 3.0,
            ..Default::default()
        }
    }
}

/// Symmetric (oblivious) tree: each level uses the same split feature + threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SymmetricTree {
    splits: Vec<(usize, f64)>, // (feature, threshold) per level
    /// `2^depth` leaves, `n_outputs` values each, row-major
    leaf_values: Vec<f64>,
    n_outputs: usize,
}

impl SymmetricTree {
    fn leaf_index(&self, sample: &ArrayView1<f64>) -> usize {
        let mut idx = 0usize;
        for &(feature, threshold) in &self.splits {
            idx = idx * 2 + usize::from(sample[feature] > threshold);
        }
        idx
    }

    fn add_to(&self, sample: &ArrayView1<f64>, scale: f64, out: &mut [f64]) {
        let leaf = self.leaf_index(sample);
        let values = &self.leaf_values[leaf * self.n_outputs..(leaf + 1) * self.n_outputs];
        for (o, v) in out.iter_mut().zip(values) {
            *o += scale * v;
        }
    }
}

struct LevelSplit {
    feature: usize,
    bin: usize,
    gain: f64,
}

fn score(g: f64, h: f64, lambda: f64) -> f64 {
    g * g / (h + lambda)
}

/// Best split shared by every bucket at the current level
fn best_level_split(
    binned: &BinnedMatrix,
    grad: &Array2<f64>,
    hess: &Array2<f64>,
    buckets: &[Vec<usize>],
    reg_lambda: f64,
) -> Option<LevelSplit> {
    let n_outputs = grad.ncols();
    (0..binned.n_features())
        .into_par_iter()
        .filter_map(|feature| {
            let n_bins = binned.mapper(feature).n_bins();
            if n_bins < 2 {
                return None;
            }
            let column = binned.column(feature);
            let stride = n_bins * n_outputs;
            let mut g_hist = vec![0.0; buckets.len() * stride];
            let mut h_hist = vec![0.0; buckets.len() * stride];
            let mut totals = vec![(0.0, 0.0); buckets.len() * n_outputs];

            for (b, bucket) in buckets.iter().enumerate() {
                for &row in bucket {
                    let base = b * stride + column[row] as usize * n_outputs;
                    for k in 0..n_outputs {
                        g_hist[base + k] += grad[[row, k]];
                        h_hist[base + k] += hess[[row, k]];
                        let t = &mut totals[b * n_outputs + k];
                        t.0 += grad[[row, k]];
                        t.1 += hess[[row, k]];
                    }
                }
            }

            let mut left_g = vec![0.0; buckets.len() * n_outputs];
            let mut left_h = vec![0.0; buckets.len() * n_outputs];
            let mut best: Option<LevelSplit> = None;

            for bin in 0..n_bins - 1 {
                let mut gain = 0.0;
                for b in 0..buckets.len() {
                    for k in 0..n_outputs {
                        let slot = b * n_outputs + k;
                        left_g[slot] += g_hist[b * stride + bin * n_outputs + k];
                        left_h[slot] += h_hist[b * stride + bin * n_outputs + k];
                        let (tg, th) = totals[slot];
                        gain += score(left_g[slot], left_h[slot], reg_lambda)
                            + score(tg - left_g[slot], th - left_h[slot], reg_lambda)
                            - score(tg, th, reg_lambda);
                    }
                }
                if best.as_ref().map_or(true, |s| gain > s.gain) {
                    best = Some(LevelSplit { feature, bin, gain });
                }
            }
            best.filter(|s| s.gain > 0.0)
        })
        .max_by(|a, b| {
            a.gain
                .partial_cmp(&b.gain)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.feature.cmp(&a.feature))
        })
}

fn build_symmetric_tree(
    binned: &BinnedMatrix,
    grad: &Array2<f64>,
    hess: &Array2<f64>,
    rows: &[usize],
    config: &CatBoostConfig,
    importance: &mut [f64],
) -> SymmetricTree {
    let n_outputs = grad.ncols();
    let mut splits = Vec::with_capacity(config.max_depth);
    let mut buckets: Vec<Vec<usize>> = vec![rows.to_vec()];

    for _depth in 0..config.max_depth {
        match best_level_split(binned, grad, hess, &buckets, config.reg_lambda) {
            Some(split) => {
                importance[split.feature] += split.gain;
                splits.push((split.feature, binned.mapper(split.feature).threshold(split.bin)));
                let mut new_buckets = Vec::with_capacity(buckets.len() * 2);
                for bucket in &buckets {
                    let (left, right): (Vec<usize>, Vec<usize>) = bucket
                        .iter()
                        .partition(|&&i| binned.goes_left(i, split.feature, split.bin));
                    new_buckets.push(left);
                    new_buckets.push(right);
                }
                buckets = new_buckets;
            }
            None => break,
        }
    }

    let mut leaf_values = Vec::with_capacity(buckets.len() * n_outputs);
    for bucket in &buckets {
        for k in 0..n_outputs {
            if bucket.is_empty() {
                leaf_values.push(0.0);
                continue;
            }
            let g: f64 = bucket.iter().map(|&i| grad[[i, k]]).sum();
            let h: f64 = bucket.iter().map(|&i| hess[[i, k]]).sum();
            leaf_values.push(-g / (h + config.reg_lambda));
        }
    }

    SymmetricTree { splits, leaf_values, n_outputs }
}

// ============ CatBoost Classifier ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatBoostClassifier {
    pub config: CatBoostConfig,
    trees: Vec<SymmetricTree>,
    base_scores: Vec<f64>,
    n_classes: usize,
    n_features: usize,
    gain_importance: Vec<f64>,
}

impl CatBoostClassifier {
    pub fn new(config: CatBoostConfig) -> Self {
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

        let objective = ClassificationObjective::new(n_classes);
        let binned = BinnedMatrix::from_array(x, self.config.max_bins);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state.unwrap_or(42));

        self.n_classes = objective.n_classes();
        self.n_features = x.ncols();
        self.base_scores = objective.base_scores(y, &weights);
        self.gain_importance = vec![0.0; x.ncols()];
        self.trees.clear();

        let n_outputs = objective.n_outputs();
        let mut raw = Array2::zeros((n, n_outputs));
        for (k, &b) in self.base_scores.iter().enumerate() {
            raw.column_mut(k).fill(b);
        }

        for _ in 0..self.config.n_estimators {
            let (grad, hess) = objective.gradients(&raw, y, &weights);

            let rows: Vec<usize> = if self.config.subsample < 1.0 {
                let k = ((n as f64 * self.config.subsample).ceil() as usize).max(1);
                let mut sub: Vec<usize> = (0..n).collect();
                sub.shuffle(&mut rng);
                sub.truncate(k);
                sub
            } else {
                (0..n).collect()
            };

            let tree = build_symmetric_tree(&binned, &grad, &hess, &rows, &self.config, &mut self.gain_importance);
            for (i, row) in x.rows().into_iter().enumerate() {
                let mut delta = vec![0.0; n_outputs];
                tree.add_to(&row, self.config.learning_rate, &mut delta);
                for (k, d) in delta.into_iter().enumerate() {
                    raw[[i, k]] += d;
                }
            }
            self.trees.push(tree);
        }
        Ok(())
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
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
            let mut scores = self.base_scores.clone();
            for tree in &self.trees {
                tree.add_to(&row, self.config.learning_rate, &mut scores);
            }
            for (k, s) in scores.into_iter().enumerate() {
                raw[[i, k]] = s;
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::models::argmax_rows;

    fn make_classification_data() -> (Array2<f64>, Vec<usize>) {
        let x = Array2::from_shape_vec((100, 2), (0..200).map(|i| (i as f64) / 100.0).collect()).unwrap();
        let y = (0..100).map(|i| if i < 50 { 0 } else { 1 }).collect();
        (x, y)
    }

    #[test]
    fn test_catboost_classifier() {
        let (x, y) = make_classification_data();
        let config = CatBoostConfig { n_estimators: 30, max_depth: 4, ..Default::default() };
        let mut model = CatBoostClassifier::new(config);
        model.fit(&x, &y, None).unwrap();
        let preds = argmax_rows(&model.predict_proba(&x).unwrap());
        let acc = preds.iter().zip(y.iter()).filter(|(p, t)| p == t).count() as f64 / 100.0;
        assert!(acc > 0.7, "Accuracy too low: {}", acc);
    }

    #[test]
    fn test_catboost_multiclass_proba() {
        let x = Array2::from_shape_fn((60, 1), |(i, _)| i as f64);
        let y: Vec<usize> = (0..60).map(|i| i / 20).collect();
        let mut model = CatBoostClassifier::new(CatBoostConfig { n_estimators: 20, max_depth: 3, ..Default::default() });
        model.fit(&x, &y, None).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 3);
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-10);
        }
        assert_eq!(argmax_rows(&proba), y);
    }

    #[test]
    fn test_catboost_symmetric_tree() {
        let (x, y) = make_classification_data();
        let config = CatBoostConfig { n_estimators: 5, max_depth: 3, ..Default::default() };
        let mut model = CatBoostClassifier::new(config);
        model.fit(&x, &y, None).unwrap();
        // Each tree should have at most 2^3 = 8 leaves
        for tree in &model.trees {
            assert!(tree.leaf_values.len() <= 8 * tree.n_outputs);
            assert!(tree.splits.len() <= 3);
        }
    }
}
