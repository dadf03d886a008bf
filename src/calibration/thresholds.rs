//! Per-class decision thresholds tuned for CANDIDATE recall
//!
//! Predictions start from the argmax; each class whose probability exceeds
//! its threshold then overrides it, in CANDIDATE, CONFIRMED, FALSE POSITIVE
//! order, so the last passing class wins.

use crate::error::{KoiError, Result};
use crate::evaluation::metrics::{accuracy, class_scores};
use crate::training::models::argmax_rows;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// `(start, stop, step)` with `stop` exclusive
pub type ThresholdRange = (f64, f64, f64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSearchConfig {
    pub cand_range: ThresholdRange,
    pub conf_range: ThresholdRange,
    pub fp_range: ThresholdRange,
    /// Lowest CONFIRMED recall a configuration may have
    pub confirmed_min_recall: f64,
}

impl Default for ThresholdSearchConfig {
    fn default() -> Self {
        Self {
            cand_range: (0.30, 0.40, 0.02),
            conf_range: (0.45, 0.60, 0.05),
            fp_range: (0.65, 0.75, 0.05),
            confirmed_min_recall: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultThresholds {
    pub mode: String,
    pub accuracy: f64,
    pub candidate_recall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedThresholds {
    pub cand_threshold: f64,
    pub conf_threshold: f64,
    pub fp_threshold: f64,
    pub accuracy: f64,
    pub candidate_recall: f64,
    pub confirmed_recall: f64,
}

/// Argmax baseline next to the best feasible thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfigs {
    pub default: DefaultThresholds,
    pub optimized: OptimizedThresholds,
}

impl ThresholdConfigs {
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Saved threshold configurations");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| KoiError::ArtifactNotFound(path.display().to_string()))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Evenly spaced values `start + i * step` for `i < ceil((stop - start) / step)`
pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    if step <= 0.0 || stop <= start {
        return Vec::new();
    }
    let n = ((stop - start) / step).ceil() as usize;
    (0..n).map(|i| start + i as f64 * step).collect()
}

/// Class columns of CANDIDATE, CONFIRMED and FALSE POSITIVE
fn class_columns(class_labels: &[String]) -> Result<[usize; 3]> {
    let find = |name: &str| {
        class_labels
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| KoiError::InvalidInput(format!("class '{}' missing from {:?}", name, class_labels)))
    };
    Ok([find("CANDIDATE")?, find("CONFIRMED")?, find("FALSE POSITIVE")?])
}

/// Argmax, then threshold overrides in column order `columns`
pub fn predict_with_thresholds(proba: &Array2<f64>, columns: [usize; 3], thresholds: [f64; 3]) -> Vec<usize> {
    let mut preds = argmax_rows(proba);
    for (i, pred) in preds.iter_mut().enumerate() {
        for (&col, &t) in columns.iter().zip(&thresholds) {
            if proba[[i, col]] > t {
                *pred = col;
            }
        }
    }
    preds
}

/// Grid-search thresholds maximising CANDIDATE recall subject to the
/// CONFIRMED recall floor. A configuration must also recall at least one
/// CANDIDATE to be chosen; ties keep the first one in grid order.
/// Returns `None` when no configuration qualifies.
pub fn optimize_class_thresholds(
    y_true: &[usize],
    y_proba: &Array2<f64>,
    class_labels: &[String],
    config: &ThresholdSearchConfig,
    save_path: Option<&Path>,
) -> Result<Option<ThresholdConfigs>> {
    if y_true.len() != y_proba.nrows() {
        return Err(KoiError::ShapeError {
            expected: format!("{} probability rows", y_true.len()),
            actual: y_proba.nrows().to_string(),
        });
    }
    let columns = class_columns(class_labels)?;
    if columns.iter().any(|&c| c >= y_proba.ncols()) {
        return Err(KoiError::ShapeError {
            expected: format!("{} probability columns", class_labels.len()),
            actual: y_proba.ncols().to_string(),
        });
    }
    let [cand, conf, _] = columns;
    info!(floor = config.confirmed_min_recall, "Searching class thresholds");

    let mut best: Option<OptimizedThresholds> = None;
    let mut feasible = 0usize;
    for &cand_t in &arange(config.cand_range.0, config.cand_range.1, config.cand_range.2) {
        for &conf_t in &arange(config.conf_range.0, config.conf_range.1, config.conf_range.2) {
            for &fp_t in &arange(config.fp_range.0, config.fp_range.1, config.fp_range.2) {
                let preds = predict_with_thresholds(y_proba, columns, [cand_t, conf_t, fp_t]);
                let confirmed_recall = class_scores(y_true, &preds, conf).recall;
                if confirmed_recall < config.confirmed_min_recall {
                    continue;
                }
                feasible += 1;
                let candidate_recall = class_scores(y_true, &preds, cand).recall;
                if candidate_recall > best.as_ref().map_or(0.0, |b| b.candidate_recall) {
                    best = Some(OptimizedThresholds {
                        cand_threshold: cand_t,
                        conf_threshold: conf_t,
                        fp_threshold: fp_t,
                        accuracy: accuracy(y_true, &preds),
                        candidate_recall,
                        confirmed_recall,
                    });
                }
            }
        }
    }

    let Some(optimized) = best else {
        warn!(feasible, "No threshold configuration recalls CANDIDATE above the CONFIRMED floor");
        return Ok(None);
    };
    info!(
        feasible,
        cand_threshold = optimized.cand_threshold,
        conf_threshold = optimized.conf_threshold,
        fp_threshold = optimized.fp_threshold,
        candidate_recall = optimized.candidate_recall,
        confirmed_recall = optimized.confirmed_recall,
        accuracy = optimized.accuracy,
        "Best threshold configuration"
    );

    let argmax = argmax_rows(y_proba);
    let configs = ThresholdConfigs {
        default: DefaultThresholds {
            mode: "argmax".to_string(),
            accuracy: accuracy(y_true, &argmax),
            candidate_recall: class_scores(y_true, &argmax, cand).recall,
        },
        optimized,
    };
    if let Some(path) = save_path {
        configs.save(path)?;
    }
    Ok(Some(configs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn labels() -> Vec<String> {
        ["CANDIDATE", "CONFIRMED", "FALSE POSITIVE"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_arange_matches_float_ceiling() {
        assert_eq!(arange(0.30, 0.40, 0.02).len(), 6);
        assert_eq!(arange(0.45, 0.60, 0.05).len(), 3);
        assert_eq!(arange(0.65, 0.75, 0.05).len(), 3);
        assert!(arange(1.0, 0.0, 0.1).is_empty());
    }

    #[test]
    fn test_overrides_apply_in_order() {
        let proba = array![[0.35, 0.60, 0.05], [0.2, 0.1, 0.7], [0.5, 0.3, 0.2]];
        let preds = predict_with_thresholds(&proba, [0, 1, 2], [0.3, 0.5, 0.9]);
        // row 0 passes both cand and conf; conf comes later and wins
        assert_eq!(preds, vec![1, 2, 0]);
    }

    #[test]
    fn test_optimizer_respects_confirmed_floor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("threshold_configs.json");
        let y = vec![0, 0, 1, 1, 2, 2];
        let proba = array![
            [0.36, 0.44, 0.20],
            [0.60, 0.30, 0.10],
            [0.20, 0.70, 0.10],
            [0.10, 0.80, 0.10],
            [0.10, 0.10, 0.80],
            [0.20, 0.10, 0.70]
        ];
        let configs = optimize_class_thresholds(&y, &proba, &labels(), &ThresholdSearchConfig::default(), Some(&path))
            .unwrap()
            .unwrap();
        assert!(configs.optimized.confirmed_recall >= 0.8);
        assert_eq!(configs.optimized.candidate_recall, 1.0);
        assert_eq!(configs.default.candidate_recall, 0.5);
        assert_eq!(configs.default.mode, "argmax");
        assert_eq!(ThresholdConfigs::load(&path).unwrap(), configs);
    }

    #[test]
    fn test_infeasible_returns_none() {
        let y = vec![1, 1];
        let proba = array![[0.9, 0.05, 0.05], [0.9, 0.05, 0.05]];
        let result = optimize_class_thresholds(&y, &proba, &labels(), &ThresholdSearchConfig::default(), None).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_zero_candidate_recall_is_not_chosen() {
        // Every grid point keeps CONFIRMED recall at 1.0 but no CANDIDATE
        // probability ever crosses its threshold
        let y = vec![0, 1, 1, 2];
        let proba = array![
            [0.10, 0.20, 0.70],
            [0.05, 0.90, 0.05],
            [0.05, 0.90, 0.05],
            [0.05, 0.15, 0.80]
        ];
        let result = optimize_class_thresholds(&y, &proba, &labels(), &ThresholdSearchConfig::default(), None).unwrap();
        assert!(result.is_none());
    }
}
