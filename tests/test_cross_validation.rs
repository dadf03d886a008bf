//! Integration test: group-aware fold planning and feature manifests

use std::collections::{HashMap, HashSet};

use koi_classifier::training::{align_to_manifest, group_fold_planner, load_manifest, save_manifest, CVStrategy, CrossValidator};
use polars::prelude::*;
use tempfile::TempDir;

fn labels_and_groups(n_stars: usize) -> (Vec<usize>, Vec<i64>) {
    let mut y = Vec::new();
    let mut groups = Vec::new();
    for star in 0..n_stars {
        for k in 0..(1 + star % 3) {
            y.push((star + k) % 3);
            groups.push(500 + star as i64);
        }
    }
    (y, groups)
}

#[test]
fn test_every_star_validates_in_exactly_one_fold() {
    let (y, groups) = labels_and_groups(90);
    let splits = group_fold_planner(5, 42).split(y.len(), Some(&y), Some(&groups)).unwrap();
    assert_eq!(splits.len(), 5);

    let mut fold_of: HashMap<i64, HashSet<usize>> = HashMap::new();
    let mut seen = vec![0usize; y.len()];
    for split in &splits {
        let train: HashSet<i64> = split.train_indices.iter().map(|&i| groups[i]).collect();
        for &i in &split.test_indices {
            assert!(!train.contains(&groups[i]), "star {} leaks into training", groups[i]);
            fold_of.entry(groups[i]).or_default().insert(split.fold_idx);
            seen[i] += 1;
        }
    }
    assert!(seen.iter().all(|&count| count == 1));
    assert!(fold_of.values().all(|folds| folds.len() == 1));
}

#[test]
fn test_fold_class_mix_tracks_global() {
    let (y, groups) = labels_and_groups(150);
    let splits = group_fold_planner(5, 3).split(y.len(), Some(&y), Some(&groups)).unwrap();
    let global = y.iter().filter(|&&c| c == 0).count() as f64 / y.len() as f64;
    for split in &splits {
        let share = split.test_indices.iter().filter(|&&i| y[i] == 0).count() as f64
            / split.test_indices.len() as f64;
        assert!((share - global).abs() < 0.15, "fold {} share {}", split.fold_idx, share);
    }
}

#[test]
fn test_same_seed_same_plan() {
    let (y, groups) = labels_and_groups(60);
    let a = group_fold_planner(4, 11).split(y.len(), Some(&y), Some(&groups)).unwrap();
    let b = group_fold_planner(4, 11).split(y.len(), Some(&y), Some(&groups)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_group_strategy_requires_groups() {
    let (y, _) = labels_and_groups(20);
    let cv = CrossValidator::new(CVStrategy::StratifiedGroupKFold { n_splits: 3, shuffle: true });
    assert!(cv.split(y.len(), Some(&y), None).is_err());
}

#[test]
fn test_manifest_roundtrip_and_alignment() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("features.json");
    let names = vec!["koi_period".to_string(), "koi_prad".to_string(), "koi_depth".to_string()];
    save_manifest(&names, &path).unwrap();
    assert_eq!(load_manifest(&path).unwrap(), names);

    // Reordered, one column missing, one extra
    let df = df!(
        "koi_prad" => &[2.0, 3.0],
        "extra" => &[9.0, 9.0],
        "koi_period" => &[10.0, 20.0],
    )
    .unwrap();
    let x = align_to_manifest(&df, &names).unwrap();
    assert_eq!(x.shape(), &[2, 3]);
    assert_eq!(x[[0, 0]], 10.0);
    assert_eq!(x[[1, 1]], 3.0);
    assert_eq!(x[[1, 2]], 0.0);
}
