//! Linear model implementations

use crate::error::{KoiError, Result};
use crate::training::models::{check_fit_inputs, resolve_weights};
use crate::training::objective::softmax_into;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegressionConfig {
    /// Inverse of L2 regularization strength
    pub c: f64,
    pub max_iter: usize,
    /// Stop when the gradient norm falls below this
    pub tol: f64,
    pub learning_rate: f64,
    pub fit_intercept: bool,
}

impl Default for LogisticRegressionConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 100,
            tol: 1e-6,
            learning_rate: 0.5,
            fit_intercept: true,
        }
    }
}

impl LogisticRegressionConfig {
    /// Meta-learner of the stacking ensemble
    pub fn stacking_meta() -> Self {
        Self {
            max_iter: 1000,
            ..Default::default()
        }
    }
}

/// Multinomial logistic regression fitted by full-batch gradient descent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub config: LogisticRegressionConfig,
    /// Fitted coefficients, `(n_features, n_classes)`
    pub coefficients: Option<Array2<f64>>,
    /// Fitted intercepts, one per class
    pub intercept: Option<Array1<f64>>,
    n_iter: usize,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(LogisticRegressionConfig::default())
    }
}

impl LogisticRegression {
    pub fn new(config: LogisticRegressionConfig) -> Self {
        Self {
            config,
            coefficients: None,
            intercept: None,
            n_iter: 0,
        }
    }

    /// Set maximum iterations
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.config.max_iter = max_iter;
        self
    }

    /// Set learning rate
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.config.learning_rate = lr;
        self
    }

    /// Minimise the weighted mean cross-entropy plus `||W||² / (2·C·Σw)`
    pub fn fit(&mut self, x: &Array2<f64>, y: &[usize], sample_weight: Option<&[f64]>) -> Result<()> {
        let n_classes = check_fit_inputs(x, y)?;
        let weights = resolve_weights(sample_weight, y.len())?;
        if self.config.c <= 0.0 {
            return Err(KoiError::InvalidParameter {
                name: "c".to_string(),
                value: self.config.c.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        let n_features = x.ncols();
        let total_weight: f64 = weights.iter().sum::<f64>().max(1e-12);
        let l2 = 1.0 / (self.config.c * total_weight);
        let w_col = Array1::from_vec(weights.clone()).insert_axis(Axis(1));

        let mut coef = Array2::<f64>::zeros((n_features, n_classes));
        let mut bias = Array1::<f64>::zeros(n_classes);
        let mut proba = Array2::<f64>::zeros((x.nrows(), n_classes));
        let mut buf = vec![0.0; n_classes];
        self.n_iter = 0;

        for _iter in 0..self.config.max_iter {
            self.n_iter += 1;
            let logits = x.dot(&coef) + &bias;
            for (i, row) in logits.rows().into_iter().enumerate() {
                softmax_into(row.iter().copied(), &mut buf);
                for (c, p) in buf.iter().enumerate() {
                    proba[[i, c]] = *p;
                }
            }

            // Compute gradients
            let mut errors = proba.clone();
            for (i, &label) in y.iter().enumerate() {
                errors[[i, label]] -= 1.0;
            }
            let errors = errors * &w_col / total_weight;
            let d_coef = x.t().dot(&errors) + &(&coef * l2);
            let d_bias = if self.config.fit_intercept {
                errors.sum_axis(Axis(0))
            } else {
                Array1::zeros(n_classes)
            };

            // Check convergence
            let grad_norm = (d_coef.mapv(|v| v * v).sum() + d_bias.mapv(|v| v * v).sum()).sqrt();
            if grad_norm < self.config.tol {
                break;
            }

            coef = coef - d_coef * self.config.learning_rate;
            bias = bias - d_bias * self.config.learning_rate;
        }

        self.coefficients = Some(coef);
        self.intercept = Some(bias);
        Ok(())
    }

    /// Predict probabilities
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (coef, bias) = match (&self.coefficients, &self.intercept) {
            (Some(c), Some(b)) => (c, b),
            _ => return Err(KoiError::ModelNotFitted),
        };
        if x.ncols() != coef.nrows() {
            return Err(KoiError::ShapeError {
                expected: format!("{} features", coef.nrows()),
                actual: format!("{} features", x.ncols()),
            });
        }
        let mut proba = x.dot(coef) + bias;
        let mut buf = vec![0.0; coef.ncols()];
        for mut row in proba.rows_mut() {
            softmax_into(row.iter().copied(), &mut buf);
            for (v, p) in row.iter_mut().zip(&buf) {
                *v = *p;
            }
        }
        Ok(proba)
    }

    pub fn n_classes(&self) -> usize {
        self.coefficients.as_ref().map_or(0, |c| c.ncols())
    }

    /// Iterations run by the last `fit`
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::models::argmax_rows;
    use ndarray::array;

    #[test]
    fn test_logistic_regression() {
        // Simple linearly separable data
        let x = array![[1.0, 1.0], [1.5, 1.5], [2.0, 2.0], [5.0, 5.0], [5.5, 5.5], [6.0, 6.0]];
        let y = vec![0, 0, 0, 1, 1, 1];

        let mut model = LogisticRegression::default().with_max_iter(1000).with_learning_rate(0.1);
        model.fit(&x, &y, None).unwrap();

        let preds = argmax_rows(&model.predict_proba(&x).unwrap());
        assert_eq!(preds, y);
    }

    #[test]
    fn test_multinomial_on_probability_features() {
        // meta-features shaped like stacked class probabilities
        let x = array![
            [0.8, 0.1, 0.1],
            [0.7, 0.2, 0.1],
            [0.1, 0.8, 0.1],
            [0.2, 0.7, 0.1],
            [0.1, 0.1, 0.8],
            [0.1, 0.2, 0.7],
        ];
        let y = vec![0, 0, 1, 1, 2, 2];
        let mut model = LogisticRegression::new(LogisticRegressionConfig {
            c: 100.0,
            max_iter: 3000,
            learning_rate: 1.0,
            ..Default::default()
        });
        model.fit(&x, &y, None).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 3);
        assert_eq!(argmax_rows(&proba), y);
    }

    #[test]
    fn test_predict_proba_requires_fit() {
        let model = LogisticRegression::default();
        assert!(matches!(model.predict_proba(&array![[0.0]]), Err(KoiError::ModelNotFitted)));
    }

    #[test]
    fn test_converges_early_on_trivial_problem() {
        let x = array![[0.0], [0.0]];
        let mut model = LogisticRegression::default().with_max_iter(1000);
        model.fit(&x, &[0, 1], None).unwrap();
        // gradient is zero from the start
        assert_eq!(model.n_iter(), 1);
    }

    #[test]
    fn test_rejects_non_positive_c() {
        let mut model = LogisticRegression::new(LogisticRegressionConfig { c: 0.0, ..Default::default() });
        assert!(model.fit(&array![[0.0], [1.0]], &[0, 1], None).is_err());
    }
}
