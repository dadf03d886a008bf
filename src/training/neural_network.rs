//! Neural Network (Multi-Layer Perceptron) classifier
//!
//! A feedforward network with ReLU (or tanh/sigmoid) hidden layers, a softmax
//! output and Adam updates on mini-batches. Inputs are standardised by an
//! embedded scaler, and early stopping holds out a validation fraction and
//! keeps the weights with the best validation accuracy.

use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KoiError, Result};
use crate::preprocessing::StandardScaler;
use crate::training::models::{check_fit_inputs, resolve_weights, take_rows};
use crate::training::objective::softmax_into;

/// Activation function for hidden layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Activation {
    /// Rectified Linear Unit
    #[default]
    ReLU,
    Sigmoid,
    Tanh,
}

/// Neural Network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MLPConfig {
    /// Hidden layer sizes
    pub hidden_layers: Vec<usize>,
    /// Activation function for hidden layers
    pub activation: Activation,
    /// Adam step size
    pub learning_rate: f64,
    /// Number of epochs
    pub max_epochs: usize,
    /// Batch size (capped at the training size)
    pub batch_size: usize,
    /// L2 regularization
    pub alpha: f64,
    pub random_state: Option<u64>,
    pub early_stopping: bool,
    /// Epochs without validation improvement before stopping
    pub early_stopping_patience: usize,
    /// Fraction held out for early stopping
    pub validation_split: f64,
    /// Minimum validation-accuracy improvement
    pub tol: f64,
    /// Standardise inputs before the first layer
    pub standardize: bool,
}

impl Default for MLPConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![100],
            activation: Activation::ReLU,
            learning_rate: 0.001,
            max_epochs: 200,
            batch_size: 200,
            alpha: 0.0001,
            random_state: Some(42),
            early_stopping: false,
            early_stopping_patience: 10,
            validation_split: 0.1,
            tol: 1e-4,
            standardize: true,
        }
    }
}

impl MLPConfig {
    /// Stage-one network of the multi-step cascade
    pub fn planet_screen() -> Self {
        Self {
            hidden_layers: vec![128, 64, 32],
            alpha: 0.001,
            learning_rate: 0.001,
            max_epochs: 500,
            early_stopping: true,
            validation_split: 0.15,
            ..Default::default()
        }
    }
}

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

/// Adam moment estimates for one layer
#[derive(Debug, Clone)]
struct AdamState {
    m_w: Array2<f64>,
    v_w: Array2<f64>,
    m_b: Array1<f64>,
    v_b: Array1<f64>,
}

/// Multi-Layer Perceptron Classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPClassifier {
    pub config: MLPConfig,
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
    scaler: Option<StandardScaler>,
    n_features: usize,
    n_classes: usize,
    n_epochs: usize,
}

impl MLPClassifier {
    pub fn new(config: MLPConfig) -> Self {
        Self {
            config,
            weights: Vec::new(),
            biases: Vec::new(),
            scaler: None,
            n_features: 0,
            n_classes: 0,
            n_epochs: 0,
        }
    }

    /// Fit the model
    pub fn fit(&mut self, x: &Array2<f64>, y: &[usize], sample_weight: Option<&[f64]>) -> Result<()> {
        let n_classes = check_fit_inputs(x, y)?;
        let weights = resolve_weights(sample_weight, y.len())?;
        let n_samples = x.nrows();
        self.n_features = x.ncols();
        self.n_classes = n_classes;

        let x = if self.config.standardize {
            let mut scaler = StandardScaler::new();
            let scaled = scaler.fit_transform(x)?;
            self.scaler = Some(scaler);
            scaled
        } else {
            self.scaler = None;
            x.clone()
        };

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        self.initialize_weights(&mut rng);

        // Split for validation
        let mut order: Vec<usize> = (0..n_samples).collect();
        let val_size = if self.config.early_stopping {
            ((n_samples as f64 * self.config.validation_split).ceil() as usize).min(n_samples.saturating_sub(1))
        } else {
            0
        };
        if val_size > 0 {
            order.shuffle(&mut rng);
        }
        let (val_idx, train_idx) = order.split_at(val_size);
        let x_val = take_rows(&x, val_idx);
        let y_val: Vec<usize> = val_idx.iter().map(|&i| y[i]).collect();
        let mut train_idx = train_idx.to_vec();
        let train_size = train_idx.len();
        let batch_size = self.config.batch_size.clamp(1, train_size.max(1));

        let mut adam: Vec<AdamState> = self
            .weights
            .iter()
            .zip(&self.biases)
            .map(|(w, b)| AdamState {
                m_w: Array2::zeros(w.raw_dim()),
                v_w: Array2::zeros(w.raw_dim()),
                m_b: Array1::zeros(b.len()),
                v_b: Array1::zeros(b.len()),
            })
            .collect();
        let mut step = 0i32;

        let mut best_score = f64::NEG_INFINITY;
        let mut best_params: Option<(Vec<Array2<f64>>, Vec<Array1<f64>>)> = None;
        let mut patience_counter = 0;
        self.n_epochs = 0;

        for _epoch in 0..self.config.max_epochs {
            self.n_epochs += 1;
            train_idx.shuffle(&mut rng);

            // Mini-batch training
            for batch in train_idx.chunks(batch_size) {
                let x_batch = take_rows(&x, batch);
                let y_batch: Vec<usize> = batch.iter().map(|&i| y[i]).collect();
                let w_batch: Vec<f64> = batch.iter().map(|&i| weights[i]).collect();

                let activations = self.forward(&x_batch);
                let gradients = self.backward(&y_batch, &w_batch, &activations);

                step += 1;
                let lr_t = self.config.learning_rate * (1.0 - BETA2.powi(step)).sqrt() / (1.0 - BETA1.powi(step));
                for (i, (grad_w, grad_b)) in gradients.into_iter().enumerate() {
                    let state = &mut adam[i];
                    state.m_w = &state.m_w * BETA1 + &grad_w * (1.0 - BETA1);
                    state.v_w = &state.v_w * BETA2 + &grad_w.mapv(|g| g * g) * (1.0 - BETA2);
                    state.m_b = &state.m_b * BETA1 + &grad_b * (1.0 - BETA1);
                    state.v_b = &state.v_b * BETA2 + &grad_b.mapv(|g| g * g) * (1.0 - BETA2);

                    self.weights[i] = &self.weights[i] - &(&state.m_w / &state.v_w.mapv(|v| v.sqrt() + ADAM_EPS) * lr_t);
                    self.biases[i] = &self.biases[i] - &(&state.m_b / &state.v_b.mapv(|v| v.sqrt() + ADAM_EPS) * lr_t);
                }
            }

            // Early stopping check
            if val_size > 0 {
                let proba = self.forward(&x_val).pop().unwrap_or_else(|| Array2::zeros((0, 0)));
                let correct = proba
                    .rows()
                    .into_iter()
                    .zip(&y_val)
                    .filter(|(row, t)| argmax(row.iter().copied()) == **t)
                    .count();
                let score = correct as f64 / y_val.len() as f64;

                if score > best_score + self.config.tol {
                    best_score = score;
                    best_params = Some((self.weights.clone(), self.biases.clone()));
                    patience_counter = 0;
                } else {
                    patience_counter += 1;
                    if patience_counter >= self.config.early_stopping_patience {
                        break;
                    }
                }
            }
        }

        if let Some((w, b)) = best_params {
            self.weights = w;
            self.biases = b;
        }
        debug!(epochs = self.n_epochs, best_val_accuracy = best_score, "MLP fitted");
        Ok(())
    }

    fn initialize_weights(&mut self, rng: &mut Xoshiro256PlusPlus) {
        self.weights.clear();
        self.biases.clear();

        let mut layer_sizes = vec![self.n_features];
        layer_sizes.extend(&self.config.hidden_layers);
        layer_sizes.push(self.n_classes);

        for pair in layer_sizes.windows(2) {
            let (n_in, n_out) = (pair[0], pair[1]);
            // Glorot uniform
            let factor = if self.config.activation == Activation::Sigmoid { 2.0 } else { 6.0 };
            let bound = (factor / (n_in + n_out) as f64).sqrt();
            self.weights.push(Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-bound..bound)));
            self.biases.push(Array1::from_shape_fn(n_out, |_| rng.gen_range(-bound..bound)));
        }
    }

    /// Activations of every layer, input first, softmax output last
    fn forward(&self, x: &Array2<f64>) -> Vec<Array2<f64>> {
        let mut activations = vec![x.clone()];
        let last = self.weights.len().saturating_sub(1);

        for (i, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            let z = activations[activations.len() - 1].dot(w) + b;
            let a = if i < last { self.activate(z) } else { softmax_rows(z) };
            activations.push(a);
        }
        activations
    }

    /// Gradients of the weighted mean cross-entropy plus L2 penalty
    fn backward(&self, y: &[usize], sample_weight: &[f64], activations: &[Array2<f64>]) -> Vec<(Array2<f64>, Array1<f64>)> {
        let n = y.len() as f64;
        let mut gradients = Vec::with_capacity(self.weights.len());

        // softmax + cross-entropy: delta = p - onehot
        let mut delta = activations[activations.len() - 1].clone();
        for (i, (&label, &w)) in y.iter().zip(sample_weight).enumerate() {
            delta[[i, label]] -= 1.0;
            delta.row_mut(i).mapv_inplace(|d| d * w / n);
        }

        for i in (0..self.weights.len()).rev() {
            let a_prev = &activations[i];
            let grad_w = a_prev.t().dot(&delta) + &(&self.weights[i] * (self.config.alpha / n));
            let grad_b = delta.sum_axis(Axis(0));

            if i > 0 {
                delta = delta.dot(&self.weights[i].t()) * self.activate_derivative(&activations[i]);
            }
            gradients.push((grad_w, grad_b));
        }

        gradients.reverse();
        gradients
    }

    fn activate(&self, z: Array2<f64>) -> Array2<f64> {
        match self.config.activation {
            Activation::ReLU => z.mapv_into(|v| v.max(0.0)),
            Activation::Sigmoid => z.mapv_into(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Tanh => z.mapv_into(|v| v.tanh()),
        }
    }

    /// Derivative expressed through the activation output
    fn activate_derivative(&self, a: &Array2<f64>) -> Array2<f64> {
        match self.config.activation {
            Activation::ReLU => a.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Sigmoid => a.mapv(|s| s * (1.0 - s)),
            Activation::Tanh => a.mapv(|t| 1.0 - t * t),
        }
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.weights.is_empty() {
            return Err(KoiError::ModelNotFitted);
        }
        let x = match &self.scaler {
            Some(scaler) => scaler.transform(x)?,
            None => {
                if x.ncols() != self.n_features {
                    return Err(KoiError::ShapeError {
                        expected: format!("{} features", self.n_features),
                        actual: format!("{} features", x.ncols()),
                    });
                }
                x.clone()
            }
        };
        self.forward(&x).pop().ok_or(KoiError::ModelNotFitted)
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Epochs run by the last `fit`
    pub fn n_epochs(&self) -> usize {
        self.n_epochs
    }
}

fn softmax_rows(mut z: Array2<f64>) -> Array2<f64> {
    let mut buf = vec![0.0; z.ncols()];
    for mut row in z.rows_mut() {
        softmax_into(row.iter().copied(), &mut buf);
        for (v, p) in row.iter_mut().zip(&buf) {
            *v = *p;
        }
    }
    z
}

fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, v) in values.enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best.0
}
