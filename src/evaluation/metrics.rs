//! Classification metrics over encoded labels
//!
//! All functions take dense class indices. Precision, recall and F1 treat a
//! zero denominator as 0.0, and averages run over the labels present in
//! either `y_true` or `y_pred`.

use crate::error::{KoiError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

const LOG_LOSS_EPS: f64 = 1e-15;

/// How per-class scores are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Average {
    /// Unweighted mean over classes
    Macro,
    /// Mean weighted by true support
    Weighted,
}

/// Precision, recall and F1 for a single class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    correct as f64 / y_true.len() as f64
}

/// Rows are true classes, columns predicted classes
pub fn confusion_matrix(y_true: &[usize], y_pred: &[usize], n_classes: usize) -> Vec<Vec<usize>> {
    let n = n_classes
        .max(y_true.iter().copied().max().map_or(0, |m| m + 1))
        .max(y_pred.iter().copied().max().map_or(0, |m| m + 1));
    let mut cm = vec![vec![0usize; n]; n];
    for (&t, &p) in y_true.iter().zip(y_pred) {
        cm[t][p] += 1;
    }
    cm
}

fn safe_div(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Scores for one class treated as the positive label
pub fn class_scores(y_true: &[usize], y_pred: &[usize], class: usize) -> ClassScores {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (&t, &p) in y_true.iter().zip(y_pred) {
        match (t == class, p == class) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }
    let precision = safe_div(tp as f64, (tp + fp) as f64);
    let recall = safe_div(tp as f64, (tp + fn_) as f64);
    ClassScores {
        precision,
        recall,
        f1: safe_div(2.0 * precision * recall, precision + recall),
        support: tp + fn_,
    }
}

/// Averaged (precision, recall, f1)
pub fn precision_recall_f1(y_true: &[usize], y_pred: &[usize], average: Average) -> (f64, f64, f64) {
    let labels: BTreeSet<usize> = y_true.iter().chain(y_pred).copied().collect();
    if labels.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let scores: Vec<ClassScores> = labels.iter().map(|&c| class_scores(y_true, y_pred, c)).collect();

    let (weights, total): (Vec<f64>, f64) = match average {
        Average::Macro => (vec![1.0; scores.len()], scores.len() as f64),
        Average::Weighted => (
            scores.iter().map(|s| s.support as f64).collect(),
            scores.iter().map(|s| s.support as f64).sum(),
        ),
    };
    let avg = |f: fn(&ClassScores) -> f64| {
        safe_div(scores.iter().zip(&weights).map(|(s, w)| f(s) * w).sum(), total)
    };
    (avg(|s| s.precision), avg(|s| s.recall), avg(|s| s.f1))
}

/// Recall of each class `0..n_classes`
pub fn per_class_recall(y_true: &[usize], y_pred: &[usize], n_classes: usize) -> Vec<f64> {
    (0..n_classes).map(|c| class_scores(y_true, y_pred, c).recall).collect()
}

/// Binary ROC-AUC via the Mann-Whitney rank statistic with averaged ties
pub fn roc_auc_binary(positive: &[bool], scores: &[f64]) -> Result<f64> {
    let n_pos = positive.iter().filter(|&&p| p).count();
    let n_neg = positive.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(KoiError::ComputationError(
            "ROC-AUC needs both positive and negative samples".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = ranks.iter().zip(positive).filter(|(_, &p)| p).map(|(r, _)| r).sum();
    let u = pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Ok(u / (n_pos * n_neg) as f64)
}

/// ROC-AUC from a probability matrix: positive column for two classes,
/// one-vs-rest macro average otherwise
pub fn roc_auc(y_true: &[usize], proba: &Array2<f64>) -> Result<f64> {
    if proba.ncols() == 2 {
        let positive: Vec<bool> = y_true.iter().map(|&t| t == 1).collect();
        let scores: Vec<f64> = proba.column(1).to_vec();
        return roc_auc_binary(&positive, &scores);
    }
    let mut aucs = Vec::with_capacity(proba.ncols());
    for c in 0..proba.ncols() {
        let positive: Vec<bool> = y_true.iter().map(|&t| t == c).collect();
        let scores: Vec<f64> = proba.column(c).to_vec();
        aucs.push(roc_auc_binary(&positive, &scores)?);
    }
    Ok(aucs.iter().sum::<f64>() / aucs.len().max(1) as f64)
}

/// Mean negative log-likelihood with probabilities clipped to [eps, 1 - eps]
pub fn log_loss(y_true: &[usize], proba: &Array2<f64>) -> Result<f64> {
    if y_true.len() != proba.nrows() {
        return Err(KoiError::ShapeError {
            expected: format!("{} rows", y_true.len()),
            actual: format!("{} rows", proba.nrows()),
        });
    }
    if y_true.is_empty() {
        return Ok(0.0);
    }
    let mut total = 0.0;
    for (i, &t) in y_true.iter().enumerate() {
        let p = if t < proba.ncols() { proba[[i, t]] } else { 0.0 };
        total -= p.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS).ln();
    }
    Ok(total / y_true.len() as f64)
}

/// Recall and precision of "is a planet" where planets are the given classes
pub fn planet_recall_precision(y_true: &[usize], y_pred: &[usize], planet_classes: &[usize]) -> (f64, f64) {
    let is_planet = |c: &usize| planet_classes.contains(c);
    let mut tp = 0usize;
    let mut true_planets = 0usize;
    let mut pred_planets = 0usize;
    for (t, p) in y_true.iter().zip(y_pred) {
        let (t, p) = (is_planet(t), is_planet(p));
        true_planets += usize::from(t);
        pred_planets += usize::from(p);
        tp += usize::from(t && p);
    }
    (safe_div(tp as f64, true_planets as f64), safe_div(tp as f64, pred_planets as f64))
}

/// Detailed out-of-fold evaluation of one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub model_name: String,
    pub accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub weighted_precision: f64,
    pub weighted_recall: f64,
    pub weighted_f1: f64,
    pub confusion_matrix: Vec<Vec<usize>>,
    pub per_class_recall: Vec<f64>,
    pub macro_auc: Option<f64>,
    pub log_loss: Option<f64>,
    pub planet_recall: f64,
    pub planet_precision: f64,
}

/// Planet classes by name: CANDIDATE and CONFIRMED, or CONFIRMED alone
pub fn planet_class_indices(class_names: &[String]) -> Vec<usize> {
    let has_candidate = class_names.iter().any(|c| c == "CANDIDATE");
    class_names
        .iter()
        .enumerate()
        .filter(|(_, c)| c.as_str() == "CONFIRMED" || (has_candidate && c.as_str() == "CANDIDATE"))
        .map(|(i, _)| i)
        .collect()
}

/// Bundle every metric for a model's OOF predictions and log a report
pub fn evaluate_best_model(
    model_name: &str,
    y_true: &[usize],
    y_pred: &[usize],
    proba: Option<&Array2<f64>>,
    class_names: &[String],
) -> Result<ModelEvaluation> {
    if y_true.len() != y_pred.len() {
        return Err(KoiError::ShapeError {
            expected: format!("{} predictions", y_true.len()),
            actual: format!("{} predictions", y_pred.len()),
        });
    }
    let n_classes = class_names.len();
    let (macro_precision, macro_recall, macro_f1) = precision_recall_f1(y_true, y_pred, Average::Macro);
    let (weighted_precision, weighted_recall, weighted_f1) = precision_recall_f1(y_true, y_pred, Average::Weighted);
    let cm = confusion_matrix(y_true, y_pred, n_classes);
    let recalls = per_class_recall(y_true, y_pred, n_classes);
    let macro_auc = proba.and_then(|p| roc_auc(y_true, p).ok());
    let loss = match proba {
        Some(p) => Some(log_loss(y_true, p)?),
        None => None,
    };
    let (planet_recall, planet_precision) =
        planet_recall_precision(y_true, y_pred, &planet_class_indices(class_names));

    let evaluation = ModelEvaluation {
        model_name: model_name.to_string(),
        accuracy: accuracy(y_true, y_pred),
        macro_precision,
        macro_recall,
        macro_f1,
        weighted_precision,
        weighted_recall,
        weighted_f1,
        confusion_matrix: cm,
        per_class_recall: recalls,
        macro_auc,
        log_loss: loss,
        planet_recall,
        planet_precision,
    };
    log_evaluation(&evaluation, class_names);
    Ok(evaluation)
}

fn log_evaluation(eval: &ModelEvaluation, class_names: &[String]) {
    info!(
        model = %eval.model_name,
        accuracy = eval.accuracy,
        macro_precision = eval.macro_precision,
        macro_recall = eval.macro_recall,
        macro_f1 = eval.macro_f1,
        "Detailed metrics"
    );
    for (i, name) in class_names.iter().enumerate() {
        let row = eval.confusion_matrix.get(i).cloned().unwrap_or_default();
        let detected = row.get(i).copied().unwrap_or(0);
        let total: usize = row.iter().sum();
        info!(
            class = %name,
            recall = eval.per_class_recall.get(i).copied().unwrap_or(0.0),
            detected,
            total,
            confusion_row = ?row,
            "Per-class recall"
        );
    }
    info!(
        macro_auc = ?eval.macro_auc,
        log_loss = ?eval.log_loss,
        planet_recall = eval.planet_recall,
        planet_precision = eval.planet_precision,
        "Planet detection (CONFIRMED + CANDIDATE)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_accuracy_and_confusion() {
        let y_true = [0, 1, 2, 2, 1];
        let y_pred = [0, 2, 2, 2, 1];
        assert!((accuracy(&y_true, &y_pred) - 0.8).abs() < 1e-12);
        let cm = confusion_matrix(&y_true, &y_pred, 3);
        assert_eq!(cm, vec![vec![1, 0, 0], vec![0, 1, 1], vec![0, 0, 2]]);
    }

    #[test]
    fn test_weighted_and_macro_averages() {
        let y_true = [0, 0, 0, 1];
        let y_pred = [0, 0, 1, 1];
        // class 0: p=1, r=2/3 ; class 1: p=0.5, r=1
        let (p, r, _) = precision_recall_f1(&y_true, &y_pred, Average::Macro);
        assert!((p - 0.75).abs() < 1e-12);
        assert!((r - (2.0 / 3.0 + 1.0) / 2.0).abs() < 1e-12);
        let (pw, rw, _) = precision_recall_f1(&y_true, &y_pred, Average::Weighted);
        assert!((pw - (3.0 * 1.0 + 0.5) / 4.0).abs() < 1e-12);
        assert!((rw - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let scores = class_scores(&[0, 0], &[0, 0], 1);
        assert_eq!(scores.precision, 0.0);
        assert_eq!(scores.recall, 0.0);
        assert_eq!(scores.f1, 0.0);
    }

    #[test]
    fn test_roc_auc_binary_with_ties() {
        let auc = roc_auc_binary(&[false, false, true, true], &[0.1, 0.4, 0.35, 0.8]).unwrap();
        assert!((auc - 0.75).abs() < 1e-12);
        let tied = roc_auc_binary(&[false, true], &[0.5, 0.5]).unwrap();
        assert!((tied - 0.5).abs() < 1e-12);
        assert!(roc_auc_binary(&[true, true], &[0.1, 0.2]).is_err());
    }

    #[test]
    fn test_roc_auc_ovr_perfect() {
        let proba = array![[0.8, 0.1, 0.1], [0.1, 0.8, 0.1], [0.1, 0.1, 0.8]];
        assert!((roc_auc(&[0, 1, 2], &proba).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_log_loss_clips() {
        let proba = array![[1.0, 0.0], [0.0, 1.0]];
        let loss = log_loss(&[1, 1], &proba).unwrap();
        assert!((loss - (-(1e-15f64).ln() / 2.0)).abs() < 1e-6);
    }

    #[test]
    fn test_planet_metrics() {
        let names: Vec<String> = ["CANDIDATE", "CONFIRMED", "FALSE POSITIVE"].iter().map(|s| s.to_string()).collect();
        assert_eq!(planet_class_indices(&names), vec![0, 1]);
        let (r, p) = planet_recall_precision(&[0, 1, 2, 2], &[1, 2, 0, 2], &[0, 1]);
        assert!((r - 0.5).abs() < 1e-12);
        assert!((p - 0.5).abs() < 1e-12);

        let binary: Vec<String> = ["CONFIRMED", "FALSE POSITIVE"].iter().map(|s| s.to_string()).collect();
        assert_eq!(planet_class_indices(&binary), vec![0]);
    }

    #[test]
    fn test_evaluate_best_model_bundle() {
        let names: Vec<String> = ["CANDIDATE", "CONFIRMED", "FALSE POSITIVE"].iter().map(|s| s.to_string()).collect();
        let proba = array![[0.7, 0.2, 0.1], [0.2, 0.7, 0.1], [0.1, 0.2, 0.7], [0.6, 0.3, 0.1]];
        let eval = evaluate_best_model("XGBoost", &[0, 1, 2, 1], &[0, 1, 2, 0], Some(&proba), &names).unwrap();
        assert!((eval.accuracy - 0.75).abs() < 1e-12);
        assert_eq!(eval.confusion_matrix[1], vec![1, 1, 0]);
        assert!(eval.macro_auc.is_some());
        assert!((eval.planet_recall - 1.0).abs() < 1e-12);
    }
}
