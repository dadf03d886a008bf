//! Integration test: CSV on disk → train → predict through the public API

use koi_classifier::inference::{Predictor, MANIFEST_FILE};
use koi_classifier::pipeline::fixtures::synthetic_koi_table;
use koi_classifier::pipeline::{ModelKind, OutputLayout, PipelineConfig, PipelineRunner};
use koi_classifier::training::{load_manifest, ModelTag};
use koi_classifier::utils::{DataLoader, REQUIRED_COLUMNS};
use polars::prelude::*;
use tempfile::TempDir;

fn write_semicolon_csv(dir: &TempDir, n_stars: usize) -> std::path::PathBuf {
    let mut df = synthetic_koi_table(n_stars);
    let path = dir.path().join("koi.csv");
    let file = std::fs::File::create(&path).unwrap();
    CsvWriter::new(file).with_separator(b';').finish(&mut df).unwrap();
    path
}

/// Every column of the cumulative KOI table, with the blanks the archive
/// export has: no kepler_name on unconfirmed rows, empty teq errors and
/// sparse uncertainty columns
fn full_schema_table(n_stars: usize) -> DataFrame {
    let base = synthetic_koi_table(n_stars);
    let n = base.height();
    let kepid: Vec<i64> = base.column("kepid").unwrap().i64().unwrap().into_no_null_iter().collect();
    let disposition: Vec<String> = base
        .column("koi_disposition")
        .unwrap()
        .str()
        .unwrap()
        .into_no_null_iter()
        .map(String::from)
        .collect();

    let mut columns = Vec::new();
    for &name in REQUIRED_COLUMNS.iter() {
        if let Ok(column) = base.column(name) {
            columns.push(column.clone());
            continue;
        }
        let column = match name {
            "rowid" => Column::new(name.into(), (1..=n as i64).collect::<Vec<_>>()),
            "kepoi_name" => Column::new(
                name.into(),
                kepid.iter().enumerate().map(|(i, k)| format!("K{}.0{}", k, 1 + i % 2)).collect::<Vec<_>>(),
            ),
            "kepler_name" => Column::new(
                name.into(),
                disposition
                    .iter()
                    .zip(&kepid)
                    .map(|(d, k)| (d == "CONFIRMED").then(|| format!("Kepler-{} b", k)))
                    .collect::<Vec<_>>(),
            ),
            "koi_pdisposition" => Column::new(
                name.into(),
                disposition
                    .iter()
                    .map(|d| if d == "FALSE POSITIVE" { d.clone() } else { "CANDIDATE".to_string() })
                    .collect::<Vec<_>>(),
            ),
            "koi_tce_delivname" => Column::new(name.into(), vec!["q1_q17_dr25_tce"; n]),
            "koi_teq_err1" | "koi_teq_err2" => Column::new(name.into(), vec![None::<f64>; n]),
            n_name if n_name.starts_with("koi_fpflag") => Column::new(name.into(), vec![0i64; n]),
            _ => {
                let sparse = name.contains("_err");
                let salt = name.len();
                Column::new(
                    name.into(),
                    (0..n)
                        .map(|i| {
                            let value = 1.0 + ((i * 7 + salt) % 13) as f64 * 0.25;
                            (!(sparse && i % 4 == 0)).then_some(value)
                        })
                        .collect::<Vec<_>>(),
                )
            }
        };
        columns.push(column);
    }
    DataFrame::new(columns).unwrap()
}

fn write_csv(dir: &TempDir, name: &str, df: &mut DataFrame) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let file = std::fs::File::create(&path).unwrap();
    CsvWriter::new(file).finish(df).unwrap();
    path
}

#[test]
fn test_semicolon_csv_trains_multistep_and_predicts() {
    let dir = TempDir::new().unwrap();
    let csv = write_semicolon_csv(&dir, 60);
    let bytes = std::fs::read(&csv).unwrap();
    let df = DataLoader::new().load_csv_bytes(&bytes).unwrap();
    assert_eq!(df.width(), 7);

    let layout = OutputLayout::new(dir.path().join("out"));
    let runner = PipelineRunner::new(PipelineConfig::quick(), layout.clone());
    let report = runner.train(ModelKind::Multistep, &df, false, true).unwrap();
    assert_eq!(report.model_type, ModelKind::Multistep);
    assert!(report.cv_accuracy > 0.0 && report.cv_accuracy <= 1.0);

    let manifest = load_manifest(&layout.root().join(MANIFEST_FILE)).unwrap();
    assert!(!manifest.contains(&"koi_disposition".to_string()));
    assert!(!manifest.contains(&"kepid".to_string()));

    let predictor = Predictor::load(layout.model_path(ModelKind::Multistep)).unwrap();
    assert_eq!(predictor.artifact().model_type, ModelTag::MultiStepNnXgb);
    let results = predictor.predict(&df, true).unwrap();
    assert_eq!(results.decoded_predictions.len(), df.height());
    assert_eq!(results.row_results.len(), df.height());
    let metrics = results.metrics.unwrap();
    assert_eq!(metrics.confusion_matrix.len(), 3);
}

#[test]
fn test_prediction_without_target_has_no_metrics() {
    let dir = TempDir::new().unwrap();
    let runner = PipelineRunner::new(PipelineConfig::quick(), OutputLayout::new(dir.path()));
    let table = synthetic_koi_table(60);
    runner.train(ModelKind::BinaryCategories, &table, false, true).unwrap();

    let unlabeled = table.drop("koi_disposition").unwrap();
    let results = runner.predict(&unlabeled, ModelKind::BinaryCategories, true).unwrap();
    assert_eq!(results.decoded_predictions.len(), unlabeled.height());
    assert!(results.metrics.is_none());
    assert!(results.row_results.is_empty());
}

#[test]
fn test_binary_metrics_skip_candidate_rows() {
    let dir = TempDir::new().unwrap();
    let runner = PipelineRunner::new(PipelineConfig::quick(), OutputLayout::new(dir.path()));
    let table = synthetic_koi_table(60);
    runner.train(ModelKind::BinaryCategories, &table, false, true).unwrap();

    let results = runner.predict(&table, ModelKind::BinaryCategories, true).unwrap();
    let metrics = results.metrics.unwrap();
    let scored: usize = metrics.confusion_matrix.iter().flatten().sum();
    assert!(scored < table.height());
    assert_eq!(results.row_results.len(), table.height());
}

#[test]
fn test_config_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pipeline.json");
    std::fs::write(&path, r#"{"seed": 7, "n_splits": 4, "target_column": "koi_disposition"}"#).unwrap();
    let config = PipelineConfig::from_file(&path).unwrap();
    assert_eq!(config.seed, 7);
    assert_eq!(config.n_splits, 4);
    assert!(config.validate().is_ok());

    std::fs::write(&path, "{not json").unwrap();
    assert!(PipelineConfig::from_file(&path).is_err());
}

#[test]
fn test_full_schema_csv_with_blanks_trains_and_predicts() {
    let dir = TempDir::new().unwrap();
    let csv = write_csv(&dir, "cumulative.csv", &mut full_schema_table(60));
    let df = DataLoader::new().load_csv_bytes(&std::fs::read(&csv).unwrap()).unwrap();
    assert_eq!(df.width(), REQUIRED_COLUMNS.len());
    // Written as empty cells, read back as text
    assert_eq!(df.column("koi_teq_err1").unwrap().dtype(), &DataType::String);

    let runner = PipelineRunner::new(PipelineConfig::quick(), OutputLayout::new(dir.path().join("out")));
    let report = runner.train(ModelKind::Multistep, &df, false, true).unwrap();
    assert!(report.features > 0);

    let manifest = load_manifest(&dir.path().join("out").join(MANIFEST_FILE)).unwrap();
    for dropped in ["kepler_name", "koi_tce_delivname", "koi_teq_err1", "koi_score"] {
        assert!(!manifest.contains(&dropped.to_string()), "{} leaked into features", dropped);
    }
    assert!(manifest.contains(&"koi_steff_err1".to_string()));

    let results = runner.predict(&df, ModelKind::Multistep, true).unwrap();
    assert_eq!(results.decoded_predictions.len(), df.height());
    assert_eq!(results.row_results.len(), df.height());
    assert!(results.metrics.is_some());

    // A single uploaded row with a blank numeric cell
    let single = DataLoader::new()
        .load_csv_bytes(b"koi_disposition,koi_period,koi_prad,koi_srad,koi_teq\nCANDIDATE,10.5,,1.0,500\n")
        .unwrap();
    let results = runner.predict(&single, ModelKind::Multistep, true).unwrap();
    assert_eq!(results.decoded_predictions.len(), 1);
    assert_eq!(results.row_results[0]["true_label"], "CANDIDATE");
}

#[test]
fn test_unseen_truth_labels_are_reported_but_not_scored() {
    let dir = TempDir::new().unwrap();
    let table = full_schema_table(60);
    let runner = PipelineRunner::new(PipelineConfig::quick(), OutputLayout::new(dir.path()));
    runner.train(ModelKind::Multistep, &table, false, true).unwrap();

    let relabeled: Vec<&str> = table
        .column("koi_disposition")
        .unwrap()
        .str()
        .unwrap()
        .into_no_null_iter()
        .enumerate()
        .map(|(i, label)| if i % 5 == 0 { "REFUTED" } else { label })
        .collect();
    let unseen = relabeled.iter().filter(|l| **l == "REFUTED").count();
    let mut upload = table.clone();
    upload
        .with_column(Column::new("koi_disposition".into(), relabeled))
        .unwrap();
    let csv = write_csv(&dir, "upload.csv", &mut upload);
    let df = DataLoader::new().load_csv_bytes(&std::fs::read(&csv).unwrap()).unwrap();

    let results = runner.predict(&df, ModelKind::Multistep, true).unwrap();
    let metrics = results.metrics.unwrap();
    let scored: usize = metrics.confusion_matrix.iter().flatten().sum();
    assert_eq!(scored, df.height() - unseen);
    assert_eq!(results.row_results.len(), df.height());
    assert_eq!(results.row_results[0]["true_label"], "REFUTED");
    assert!(results.decoded_predictions.iter().all(|p| p != "REFUTED"));
}
