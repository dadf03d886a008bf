//! Classification objectives for the gradient boosters
//!
//! Two classes use a single logistic output; more classes use one softmax
//! output per class. Raw scores are stored as an `(n_rows, n_outputs)` matrix.

use ndarray::Array2;

const HESS_MIN: f64 = 1e-6;

/// Logistic (2 classes) or softmax (3+ classes) cross-entropy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationObjective {
    n_classes: usize,
}

impl ClassificationObjective {
    pub fn new(n_classes: usize) -> Self {
        Self { n_classes: n_classes.max(2) }
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Number of trees grown per boosting round
    pub fn n_outputs(&self) -> usize {
        if self.n_classes == 2 {
            1
        } else {
            self.n_classes
        }
    }

    /// Initial raw scores from weighted class priors
    pub fn base_scores(&self, y: &[usize], weights: &[f64]) -> Vec<f64> {
        let mut counts = vec![0.0f64; self.n_classes];
        for (&label, &w) in y.iter().zip(weights) {
            counts[label] += w;
        }
        let total: f64 = counts.iter().sum::<f64>().max(1e-12);
        let priors: Vec<f64> = counts
            .iter()
            .map(|c| (c / total).clamp(1e-7, 1.0 - 1e-7))
            .collect();

        if self.n_classes == 2 {
            vec![(priors[1] / priors[0]).ln()]
        } else {
            priors.iter().map(|p| p.ln()).collect()
        }
    }

    /// Weighted first and second derivatives, shaped like `raw`
    pub fn gradients(
        &self,
        raw: &Array2<f64>,
        y: &[usize],
        weights: &[f64],
    ) -> (Array2<f64>, Array2<f64>) {
        let n = raw.nrows();
        let k = self.n_outputs();
        let mut grad = Array2::zeros((n, k));
        let mut hess = Array2::zeros((n, k));

        if k == 1 {
            for i in 0..n {
                let p = sigmoid(raw[[i, 0]]);
                let target = if y[i] == 1 { 1.0 } else { 0.0 };
                grad[[i, 0]] = (p - target) * weights[i];
                hess[[i, 0]] = (p * (1.0 - p)).max(HESS_MIN) * weights[i];
            }
            return (grad, hess);
        }

        let mut probs = vec![0.0; k];
        for i in 0..n {
            softmax_into(raw.row(i).iter().copied(), &mut probs);
            for c in 0..k {
                let target = if y[i] == c { 1.0 } else { 0.0 };
                let p = probs[c];
                grad[[i, c]] = (p - target) * weights[i];
                hess[[i, c]] = (2.0 * p * (1.0 - p)).max(HESS_MIN) * weights[i];
            }
        }
        (grad, hess)
    }

    /// Class probabilities `(n_rows, n_classes)` from raw scores
    pub fn transform(&self, raw: &Array2<f64>) -> Array2<f64> {
        let n = raw.nrows();
        let mut proba = Array2::zeros((n, self.n_classes));
        if self.n_outputs() == 1 {
            for i in 0..n {
                let p = sigmoid(raw[[i, 0]]);
                proba[[i, 0]] = 1.0 - p;
                proba[[i, 1]] = p;
            }
            return proba;
        }
        let mut probs = vec![0.0; self.n_classes];
        for i in 0..n {
            softmax_into(raw.row(i).iter().copied(), &mut probs);
            for (c, p) in probs.iter().enumerate() {
                proba[[i, c]] = *p;
            }
        }
        proba
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable softmax
pub fn softmax_into(logits: impl Iterator<Item = f64> + Clone, out: &mut [f64]) {
    let max = logits.clone().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for (slot, z) in out.iter_mut().zip(logits) {
        *slot = (z - max).exp();
        sum += *slot;
    }
    if sum > 0.0 {
        for slot in out.iter_mut() {
            *slot /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_binary_uses_single_output() {
        let obj = ClassificationObjective::new(2);
        assert_eq!(obj.n_outputs(), 1);
        let base = obj.base_scores(&[0, 1, 1, 1], &[1.0; 4]);
        assert!((base[0] - 3f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_softmax_gradient() {
        let obj = ClassificationObjective::new(3);
        let raw = array![[1.0, 0.0, 0.0]];
        let (grad, hess) = obj.gradients(&raw, &[0], &[1.0]);
        // softmax([1,0,0]) ~ [0.576, 0.212, 0.212]
        assert!((grad[[0, 0]] - (0.5761 - 1.0)).abs() < 1e-3);
        assert!((grad[[0, 1]] - 0.2119).abs() < 1e-3);
        assert!(hess.iter().all(|&h| h > 0.0));
    }

    #[test]
    fn test_transform_rows_sum_to_one() {
        let obj = ClassificationObjective::new(3);
        let proba = obj.transform(&array![[0.3, -2.0, 5.0], [0.0, 0.0, 0.0]]);
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!((proba[[1, 2]] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_weights_scale_gradients() {
        let obj = ClassificationObjective::new(2);
        let raw = array![[0.0]];
        let (g1, _) = obj.gradients(&raw, &[1], &[1.0]);
        let (g2, _) = obj.gradients(&raw, &[1], &[2.0]);
        assert!((g2[[0, 0]] - 2.0 * g1[[0, 0]]).abs() < 1e-12);
    }
}
