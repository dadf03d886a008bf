//! Out-of-fold prediction bookkeeping

use crate::error::{KoiError, Result};
use crate::evaluation::metrics::{accuracy, precision_recall_f1, Average};
use crate::training::cross_validation::{CVResults, CVSplit};
use crate::training::models::{argmax_rows, take_rows, Classifier, ModelSpec};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Scores of one fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub fold: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub train_accuracy: f64,
}

/// Fold-averaged scores of one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvSummary {
    pub accuracy: f64,
    pub accuracy_std: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub train_accuracy: f64,
    pub time_s: f64,
}

/// Out-of-fold labels and probabilities plus per-fold scores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OofResult {
    pub oof_pred: Vec<usize>,
    pub oof_proba: Array2<f64>,
    pub folds: Vec<FoldMetrics>,
    pub summary: CvSummary,
}

/// Full-length buffers where each row may be written once
struct OofBuffer {
    pred: Vec<usize>,
    proba: Array2<f64>,
    written: Vec<bool>,
}

impl OofBuffer {
    fn new(n_samples: usize, n_classes: usize) -> Self {
        Self {
            pred: vec![0; n_samples],
            proba: Array2::zeros((n_samples, n_classes)),
            written: vec![false; n_samples],
        }
    }

    fn write(&mut self, rows: &[usize], pred: &[usize], proba: &Array2<f64>) -> Result<()> {
        let width = proba.ncols().min(self.proba.ncols());
        for (local, &row) in rows.iter().enumerate() {
            if self.written[row] {
                return Err(KoiError::ComputationError(format!(
                    "row {} received more than one out-of-fold prediction",
                    row
                )));
            }
            self.written[row] = true;
            self.pred[row] = pred[local];
            for c in 0..width {
                self.proba[[row, c]] = proba[[local, c]];
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<(Vec<usize>, Array2<f64>)> {
        if let Some(row) = self.written.iter().position(|w| !w) {
            return Err(KoiError::ComputationError(format!(
                "row {} has no out-of-fold prediction",
                row
            )));
        }
        Ok((self.pred, self.proba))
    }
}

/// Fit a fresh model per fold and collect held-out predictions
///
/// Every row must appear in exactly one fold's test indices.
pub fn cross_val_oof(
    name: &str,
    spec: &ModelSpec,
    x: &Array2<f64>,
    y: &[usize],
    splits: &[CVSplit],
    sample_weight: Option<&[f64]>,
) -> Result<OofResult> {
    let start = Instant::now();
    let n_classes = (y.iter().copied().max().unwrap_or(0) + 1).max(2);
    let mut buffer = OofBuffer::new(y.len(), n_classes);
    let mut folds = Vec::with_capacity(splits.len());

    info!(model = %name, folds = splits.len(), "Cross-validating");
    for split in splits {
        let x_train = take_rows(x, &split.train_indices);
        let x_val = take_rows(x, &split.test_indices);
        let y_train: Vec<usize> = split.train_indices.iter().map(|&i| y[i]).collect();
        let y_val: Vec<usize> = split.test_indices.iter().map(|&i| y[i]).collect();
        let w_train: Option<Vec<f64>> =
            sample_weight.map(|w| split.train_indices.iter().map(|&i| w[i]).collect());

        let mut model = spec.build();
        model.fit(&x_train, &y_train, w_train.as_deref())?;

        let val_proba = model.predict_proba(&x_val)?;
        let val_pred = argmax_rows(&val_proba);
        let train_pred = model.predict(&x_train)?;
        buffer.write(&split.test_indices, &val_pred, &val_proba)?;

        let (precision, recall, f1) = precision_recall_f1(&y_val, &val_pred, Average::Weighted);
        let metrics = FoldMetrics {
            fold: split.fold_idx + 1,
            accuracy: accuracy(&y_val, &val_pred),
            precision,
            recall,
            f1,
            train_accuracy: accuracy(&y_train, &train_pred),
        };
        info!(model = %name, fold = metrics.fold, val_acc = metrics.accuracy, "Fold finished");
        folds.push(metrics);
    }

    let (oof_pred, oof_proba) = buffer.finish()?;
    let summary = summarize(&folds, start.elapsed().as_secs_f64());
    info!(
        model = %name,
        accuracy = summary.accuracy,
        accuracy_std = summary.accuracy_std,
        precision = summary.precision,
        recall = summary.recall,
        f1 = summary.f1,
        train_accuracy = summary.train_accuracy,
        time_s = summary.time_s,
        "Cross-validation summary"
    );
    Ok(OofResult {
        oof_pred,
        oof_proba,
        folds,
        summary,
    })
}

fn summarize(folds: &[FoldMetrics], time_s: f64) -> CvSummary {
    let mean = |f: fn(&FoldMetrics) -> f64| {
        if folds.is_empty() {
            0.0
        } else {
            folds.iter().map(f).sum::<f64>() / folds.len() as f64
        }
    };
    let acc = CVResults::from_scores(folds.iter().map(|f| f.accuracy).collect());
    debug!(n_folds = acc.n_folds, "Summarized folds");
    CvSummary {
        accuracy: acc.mean_score,
        accuracy_std: acc.std_score,
        precision: mean(|f| f.precision),
        recall: mean(|f| f.recall),
        f1: mean(|f| f.f1),
        train_accuracy: mean(|f| f.train_accuracy),
        time_s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::cross_validation::{CVStrategy, CrossValidator};
    use crate::training::xgboost::XGBoostConfig;

    fn data() -> (Array2<f64>, Vec<usize>, Vec<i64>) {
        let x = Array2::from_shape_fn((90, 2), |(i, j)| (i % 3) as f64 * 3.0 + ((i * 7 + j) % 5) as f64 * 0.1);
        let y = (0..90).map(|i| i % 3).collect();
        let groups = (0..90).map(|i| (i / 2) as i64).collect();
        (x, y, groups)
    }

    fn small_xgb() -> ModelSpec {
        ModelSpec::XGBoost(XGBoostConfig { n_estimators: 10, max_depth: 3, ..Default::default() })
    }

    #[test]
    fn test_oof_covers_every_row_once() {
        let (x, y, groups) = data();
        let splits = CrossValidator::new(CVStrategy::StratifiedGroupKFold { n_splits: 5, shuffle: true })
            .with_random_state(42)
            .split(90, Some(&y), Some(&groups))
            .unwrap();
        let result = cross_val_oof("XGBoost", &small_xgb(), &x, &y, &splits, None).unwrap();
        assert_eq!(result.oof_pred.len(), 90);
        assert_eq!(result.oof_proba.dim(), (90, 3));
        assert_eq!(result.folds.len(), 5);
        assert!(result.summary.accuracy > 0.9);
        for row in result.oof_proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_overlapping_folds_rejected() {
        let (x, y, _) = data();
        let all: Vec<usize> = (0..90).collect();
        let splits = vec![
            CVSplit { train_indices: all.clone(), test_indices: all.clone(), fold_idx: 0 },
            CVSplit { train_indices: all.clone(), test_indices: vec![0], fold_idx: 1 },
        ];
        let err = cross_val_oof("XGBoost", &small_xgb(), &x, &y, &splits, None).unwrap_err();
        assert!(matches!(err, KoiError::ComputationError(_)));
    }

    #[test]
    fn test_missing_rows_rejected() {
        let (x, y, _) = data();
        let splits = vec![CVSplit {
            train_indices: (0..80).collect(),
            test_indices: (80..89).collect(),
            fold_idx: 0,
        }];
        let err = cross_val_oof("XGBoost", &small_xgb(), &x, &y, &splits, None).unwrap_err();
        assert!(matches!(err, KoiError::ComputationError(_)));
    }
}
