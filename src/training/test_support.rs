//! Shared fixtures for trainer tests

use crate::training::data_split::{group_fold_planner, LabelEncoder, PreparedData};
use ndarray::Array2;

/// Three separable classes on column 0, two noise columns, one row per star
pub(crate) fn synthetic_prepared(n: usize) -> PreparedData {
    let x = Array2::from_shape_fn((n, 3), |(i, j)| match j {
        0 => (i % 3) as f64 * 2.0 + ((i * 13) % 7) as f64 * 0.05,
        1 => ((i * 31) % 17) as f64,
        _ => (i % 5) as f64,
    });
    let y: Vec<usize> = (0..n).map(|i| i % 3).collect();
    let groups: Vec<i64> = (0..n).map(|i| 1000 + i as i64).collect();
    let splits = group_fold_planner(5, 42)
        .split(n, Some(&y), Some(&groups))
        .expect("fold plan");
    PreparedData {
        x,
        feature_names: vec!["signal".into(), "noise".into(), "other".into()],
        y,
        groups,
        label_encoder: LabelEncoder::fit(&["CANDIDATE", "CONFIRMED", "FALSE POSITIVE"]),
        splits,
    }
}
