//! Decision tree classifier
//!
//! Splits are searched over quantile bins with weighted class histograms, so
//! a forest can bin its training matrix once and grow every tree on it.

use crate::error::{KoiError, Result};
use crate::training::binning::{partition_rows, BinnedMatrix, DEFAULT_MAX_BINS};
use crate::training::models::{check_fit_inputs, resolve_weights};
use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node with the class distribution of its training rows
    Leaf {
        distribution: Vec<f64>,
        n_samples: usize,
    },
    /// Internal node with split
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
    },
}

impl TreeNode {
    fn distribution(&self, sample: &ArrayView1<f64>) -> &[f64] {
        match self {
            TreeNode::Leaf { distribution, .. } => distribution,
            TreeNode::Split { feature_idx, threshold, left, right, .. } => {
                if sample[*feature_idx] <= *threshold {
                    left.distribution(sample)
                } else {
                    right.distribution(sample)
                }
            }
        }
    }
}

/// Impurity criterion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Criterion {
    Gini,
    Entropy,
}

impl Criterion {
    /// Impurity of weighted class totals
    fn impurity(&self, class_weights: &[f64]) -> f64 {
        let total: f64 = class_weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        match self {
            Criterion::Gini => 1.0 - class_weights.iter().map(|w| (w / total).powi(2)).sum::<f64>(),
            Criterion::Entropy => -class_weights
                .iter()
                .filter(|&&w| w > 0.0)
                .map(|w| {
                    let p = w / total;
                    p * p.ln()
                })
                .sum::<f64>(),
        }
    }
}

/// Decision tree model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn at random for each node; all when None
    pub max_features: Option<usize>,
    pub criterion: Criterion,
    pub random_state: Option<u64>,
    n_features: usize,
    n_classes: usize,
    feature_importances: Option<Array1<f64>>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new_classifier()
    }
}

/// Per-fit state threaded through the recursion
struct Grower<'a> {
    binned: &'a BinnedMatrix,
    y: &'a [usize],
    weights: &'a [f64],
    n_classes: usize,
    rng: &'a mut ChaCha8Rng,
    importances: Vec<f64>,
}

impl DecisionTree {
    pub fn new_classifier() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            criterion: Criterion::Gini,
            random_state: None,
            n_features: 0,
            n_classes: 0,
            feature_importances: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples;
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples;
        self
    }

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = Some(max_features);
        self
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Fit the tree to training data
    pub fn fit(&mut self, x: &Array2<f64>, y: &[usize], sample_weight: Option<&[f64]>) -> Result<&mut Self> {
        let n_classes = check_fit_inputs(x, y)?;
        let weights = resolve_weights(sample_weight, y.len())?;
        let binned = BinnedMatrix::from_array(x, DEFAULT_MAX_BINS);
        let rows: Vec<usize> = (0..x.nrows()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state.unwrap_or(42));
        self.fit_binned(&binned, y, &weights, &rows, n_classes, &mut rng)?;
        Ok(self)
    }

    /// Grow the tree on a pre-binned matrix using only `rows`
    ///
    /// `weights` is indexed by row of the full matrix; rows with zero weight
    /// are ignored.
    pub fn fit_binned(
        &mut self,
        binned: &BinnedMatrix,
        y: &[usize],
        weights: &[f64],
        rows: &[usize],
        n_classes: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        let rows: Vec<usize> = rows.iter().copied().filter(|&r| weights[r] > 0.0).collect();
        if rows.is_empty() {
            return Err(KoiError::TrainingError("no rows with positive weight".to_string()));
        }
        self.n_features = binned.n_features();
        self.n_classes = n_classes;

        let mut grower = Grower {
            binned,
            y,
            weights,
            n_classes,
            rng,
            importances: vec![0.0; binned.n_features()],
        };
        self.root = Some(self.build_tree(&mut grower, &rows, 0));

        let mut importances = grower.importances;
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in &mut importances {
                *imp /= total;
            }
        }
        self.feature_importances = Some(Array1::from_vec(importances));
        Ok(())
    }

    fn class_weights(&self, grower: &Grower, rows: &[usize]) -> Vec<f64> {
        let mut totals = vec![0.0; grower.n_classes];
        for &r in rows {
            totals[grower.y[r]] += grower.weights[r];
        }
        totals
    }

    fn leaf(&self, totals: &[f64], n_samples: usize) -> TreeNode {
        let sum: f64 = totals.iter().sum();
        let distribution = if sum > 0.0 {
            totals.iter().map(|w| w / sum).collect()
        } else {
            vec![1.0 / totals.len() as f64; totals.len()]
        };
        TreeNode::Leaf { distribution, n_samples }
    }

    fn build_tree(&self, grower: &mut Grower, rows: &[usize], depth: usize) -> TreeNode {
        let totals = self.class_weights(grower, rows);
        let n_samples = rows.len();
        let is_pure = totals.iter().filter(|&&w| w > 0.0).count() <= 1;

        let should_stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d)
            || is_pure;
        if should_stop {
            return self.leaf(&totals, n_samples);
        }

        let Some((feature, bin, gain)) = self.find_best_split(grower, rows, &totals) else {
            return self.leaf(&totals, n_samples);
        };

        let (left_rows, right_rows) = partition_rows(grower.binned, feature, bin, rows);
        grower.importances[feature] += gain;

        let left = Box::new(self.build_tree(grower, &left_rows, depth + 1));
        let right = Box::new(self.build_tree(grower, &right_rows, depth + 1));

        TreeNode::Split {
            feature_idx: feature,
            threshold: grower.binned.mapper(feature).threshold(bin),
            left,
            right,
            n_samples,
        }
    }

    /// Best (feature, bin, weighted impurity decrease) among randomly drawn features
    fn find_best_split(&self, grower: &mut Grower, rows: &[usize], totals: &[f64]) -> Option<(usize, usize, f64)> {
        let n_features = grower.binned.n_features();
        let k = self.max_features.unwrap_or(n_features).clamp(1, n_features);
        let features: Vec<usize> = if k < n_features {
            sample(&mut *grower.rng, n_features, k).into_vec()
        } else {
            (0..n_features).collect()
        };

        let n_classes = grower.n_classes;
        let parent_weight: f64 = totals.iter().sum();
        let parent_impurity = self.criterion.impurity(totals);
        let mut best: Option<(usize, usize, f64)> = None;

        for feature in features {
            let n_bins = grower.binned.mapper(feature).n_bins();
            if n_bins < 2 {
                continue;
            }
            let column = grower.binned.column(feature);
            let mut hist = vec![0.0; n_bins * n_classes];
            let mut counts = vec![0usize; n_bins];
            for &r in rows {
                let b = column[r] as usize;
                hist[b * n_classes + grower.y[r]] += grower.weights[r];
                counts[b] += 1;
            }

            let mut left = vec![0.0; n_classes];
            let mut left_n = 0usize;
            for bin in 0..n_bins - 1 {
                for c in 0..n_classes {
                    left[c] += hist[bin * n_classes + c];
                }
                left_n += counts[bin];
                if counts[bin] == 0 {
                    continue;
                }
                let right_n = rows.len() - left_n;
                if left_n < self.min_samples_leaf || right_n < self.min_samples_leaf {
                    continue;
                }
                let right: Vec<f64> = totals.iter().zip(&left).map(|(t, l)| t - l).collect();
                let left_weight: f64 = left.iter().sum();
                let right_weight = parent_weight - left_weight;
                let gain = parent_weight * parent_impurity
                    - left_weight * self.criterion.impurity(&left)
                    - right_weight * self.criterion.impurity(&right);

                if gain > 1e-12 && best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((feature, bin, gain));
                }
            }
        }
        best
    }

    /// Predict class probabilities
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let root = self.root.as_ref().ok_or(KoiError::ModelNotFitted)?;
        if x.ncols() != self.n_features {
            return Err(KoiError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        let mut proba = Array2::zeros((x.nrows(), self.n_classes));
        for (i, row) in x.rows().into_iter().enumerate() {
            for (c, p) in root.distribution(&row).iter().enumerate() {
                proba[[i, c]] = *p;
            }
        }
        Ok(proba)
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    /// Depth of the fitted tree
    pub fn depth(&self) -> usize {
        fn walk(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        self.root.as_ref().map_or(0, walk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::models::argmax_rows;
    use ndarray::array;

    #[test]
    fn test_decision_tree_classifier() {
        let x = array![[1.0, 2.0], [2.0, 3.0], [3.0, 1.0], [6.0, 5.0], [7.0, 8.0], [8.0, 6.0]];
        let y = vec![0, 0, 0, 1, 1, 1];

        let mut tree = DecisionTree::new_classifier().with_max_depth(3);
        tree.fit(&x, &y, None).unwrap();
        assert_eq!(argmax_rows(&tree.predict_proba(&x).unwrap()), y);
    }

    #[test]
    fn test_three_classes_and_depth_limit() {
        let x = Array2::from_shape_fn((30, 1), |(i, _)| i as f64);
        let y: Vec<usize> = (0..30).map(|i| i / 10).collect();

        let mut stump = DecisionTree::new_classifier().with_max_depth(1);
        stump.fit(&x, &y, None).unwrap();
        assert_eq!(stump.depth(), 1);
        assert_eq!(stump.predict_proba(&x).unwrap().ncols(), 3);

        let mut full = DecisionTree::new_classifier();
        full.fit(&x, &y, None).unwrap();
        assert_eq!(argmax_rows(&full.predict_proba(&x).unwrap()), y);
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        let y = vec![0, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut tree = DecisionTree::new_classifier().with_min_samples_leaf(5);
        tree.fit(&x, &y, None).unwrap();
        // the lone positive can never be isolated
        let proba = tree.predict_proba(&x).unwrap();
        assert!(proba[[1, 1]] < 0.5);
    }

    #[test]
    fn test_entropy_criterion() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let mut tree = DecisionTree::new_classifier().with_criterion(Criterion::Entropy);
        tree.fit(&x, &[0, 0, 1, 1], None).unwrap();
        assert_eq!(argmax_rows(&tree.predict_proba(&x).unwrap()), vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_unfitted_tree() {
        let tree = DecisionTree::new_classifier();
        assert!(matches!(tree.predict_proba(&array![[1.0]]), Err(KoiError::ModelNotFitted)));
    }
}
