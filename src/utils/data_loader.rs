//! Data loading utilities

use crate::error::{KoiError, Result};
use polars::prelude::*;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::Cursor;
use std::time::Instant;
use tracing::{info, warn};

/// Data loader for KOI tables (files, uploaded bytes or in-memory records)
pub struct DataLoader {
    /// Rows scanned for schema inference; `None` scans the whole file
    infer_schema_length: Option<usize>,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    /// Create a new data loader
    pub fn new() -> Self {
        // Sparse columns such as kepler_name only show their type late in the file.
        Self {
            infer_schema_length: None,
        }
    }

    /// Limit the number of rows used for schema inference
    pub fn with_infer_schema_length(mut self, n: Option<usize>) -> Self {
        self.infer_schema_length = n;
        self
    }

    /// Load a comma-separated CSV file
    pub fn load_csv(&self, path: &str) -> Result<DataFrame> {
        self.load_csv_with_separator(path, b',')
    }

    /// Load a CSV file with a specific separator
    pub fn load_csv_with_separator(&self, path: &str, separator: u8) -> Result<DataFrame> {
        let start = Instant::now();
        let data = std::fs::read(path)
            .map_err(|e| KoiError::DataError(format!("{}: {}", path, e)))?;

        let df = self.read_csv(&data, separator)?;
        info!(
            path = %path,
            rows = df.height(),
            columns = df.width(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded CSV"
        );
        Ok(df)
    }

    /// Load uploaded CSV bytes, detecting the separator from the header line
    pub fn load_csv_bytes(&self, data: &[u8]) -> Result<DataFrame> {
        let text = std::str::from_utf8(data)
            .map_err(|e| KoiError::DataError(format!("CSV is not valid UTF-8: {}", e)))?;
        let separator = detect_separator(text);
        info!(separator = %(separator as char), "Detected CSV separator");

        let df = self.read_csv(data, separator)?;
        if df.height() == 0 || df.width() == 0 {
            return Err(KoiError::DataError("CSV file is empty".to_string()));
        }
        Ok(df)
    }

    fn read_csv(&self, data: &[u8], separator: u8) -> Result<DataFrame> {
        let parse_opts = CsvParseOptions::default()
            .with_separator(separator)
            .with_truncate_ragged_lines(true);

        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(self.infer_schema_length)
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(Cursor::new(data))
            .finish()
            .map_err(|e| KoiError::DataError(format!("Could not parse CSV: {}", e)))
    }

    /// Build a table from in-memory JSON records.
    ///
    /// Columns are the union of all record keys in first-seen order. A column
    /// whose non-null values are all numbers (or booleans) becomes Float64,
    /// anything else becomes String.
    pub fn from_records(&self, records: &[Map<String, Value>]) -> Result<DataFrame> {
        if records.is_empty() {
            return Err(KoiError::InvalidInput("No input rows provided".to_string()));
        }

        let mut names: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !names.iter().any(|n| n == key) {
                    names.push(key.clone());
                }
            }
        }

        let columns: Vec<Column> = names
            .iter()
            .map(|name| {
                let values: Vec<Option<&Value>> = records
                    .iter()
                    .map(|r| r.get(name).filter(|v| !v.is_null()))
                    .collect();
                let numeric = values
                    .iter()
                    .flatten()
                    .all(|v| v.is_number() || v.is_boolean());

                if numeric {
                    let data: Vec<Option<f64>> = values
                        .iter()
                        .map(|v| {
                            v.and_then(|v| match v {
                                Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                                other => other.as_f64(),
                            })
                        })
                        .collect();
                    Column::new(name.as_str().into(), data)
                } else {
                    let data: Vec<Option<String>> = values
                        .iter()
                        .map(|v| {
                            v.map(|v| match v {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                        })
                        .collect();
                    Column::new(name.as_str().into(), data)
                }
            })
            .collect();

        Ok(DataFrame::new(columns)?)
    }
}

/// Rows of a table as JSON objects; numeric columns become numbers, the
/// rest strings, nulls and non-finite values `null`
pub fn to_records(df: &DataFrame) -> Result<Vec<Map<String, Value>>> {
    let mut records = vec![Map::new(); df.height()];
    for column in df.get_columns() {
        let name = column.name().to_string();
        if column.dtype().is_primitive_numeric() || column.dtype() == &DataType::Boolean {
            let cast = column.cast(&DataType::Float64)?;
            for (record, v) in records.iter_mut().zip(cast.f64()?.into_iter()) {
                let value = v
                    .and_then(serde_json::Number::from_f64)
                    .map_or(Value::Null, Value::Number);
                record.insert(name.clone(), value);
            }
        } else {
            let cast = column.cast(&DataType::String)?;
            for (record, v) in records.iter_mut().zip(cast.str()?.into_iter()) {
                let value = v.map_or(Value::Null, |s| Value::String(s.to_string()));
                record.insert(name.clone(), value);
            }
        }
    }
    Ok(records)
}

/// Columns of the cumulative KOI table every upload must carry
pub const REQUIRED_COLUMNS: [&str; 50] = [
    "rowid", "kepid", "kepoi_name", "kepler_name", "koi_disposition",
    "koi_pdisposition", "koi_score", "koi_fpflag_nt", "koi_fpflag_ss",
    "koi_fpflag_co", "koi_fpflag_ec", "koi_period", "koi_period_err1",
    "koi_period_err2", "koi_time0bk", "koi_time0bk_err1", "koi_time0bk_err2",
    "koi_impact", "koi_impact_err1", "koi_impact_err2", "koi_duration",
    "koi_duration_err1", "koi_duration_err2", "koi_depth", "koi_depth_err1",
    "koi_depth_err2", "koi_prad", "koi_prad_err1", "koi_prad_err2",
    "koi_teq", "koi_teq_err1", "koi_teq_err2", "koi_insol", "koi_insol_err1",
    "koi_insol_err2", "koi_model_snr", "koi_tce_plnt_num", "koi_tce_delivname",
    "koi_steff", "koi_steff_err1", "koi_steff_err2", "koi_slogg",
    "koi_slogg_err1", "koi_slogg_err2", "koi_srad", "koi_srad_err1",
    "koi_srad_err2", "ra", "dec", "koi_kepmag",
];

/// Required columns absent from `df`, sorted
pub fn missing_required_columns(df: &DataFrame) -> Vec<String> {
    let present: std::collections::HashSet<&str> = df.get_column_names().iter().map(|s| s.as_str()).collect();
    let mut missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !present.contains(*c))
        .map(|c| c.to_string())
        .collect();
    missing.sort();
    missing
}

/// `;` when the header line contains one, `,` otherwise
pub fn detect_separator(text: &str) -> u8 {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.contains(';') {
        b';'
    } else {
        b','
    }
}

/// Log shape, non-zero missing counts and the target distribution.
/// A missing target column is only a warning here.
pub fn log_dataset_summary(df: &DataFrame, target_column: &str) {
    info!(rows = df.height(), columns = df.width(), "Dataset shape");

    for column in df.get_columns() {
        let nulls = column.null_count();
        if nulls > 0 {
            info!(column = %column.name(), missing = nulls, "Missing values");
        }
    }

    match df.column(target_column) {
        Ok(target) => {
            let series = target.as_materialized_series();
            if let Ok(ca) = series.str() {
                let mut counts: std::collections::BTreeMap<&str, usize> = Default::default();
                for value in ca.into_iter().flatten() {
                    *counts.entry(value).or_default() += 1;
                }
                for (class, count) in counts {
                    info!(class = %class, count, "Target distribution");
                }
            }
        }
        Err(_) => warn!(target = %target_column, "Target column not found in dataset"),
    }
}

/// Save DataFrame to disk
pub struct DataSaver;

impl DataSaver {
    /// Save to a comma-separated CSV
    pub fn save_csv(df: &mut DataFrame, path: &str) -> Result<()> {
        let mut file = File::create(path)
            .map_err(|e| KoiError::DataError(e.to_string()))?;

        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(b',')
            .finish(df)
            .map_err(|e| KoiError::DataError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".csv")
            .tempfile()
            .unwrap();
        writeln!(file, "kepid,koi_period,koi_disposition").unwrap();
        writeln!(file, "1,2.5,CONFIRMED").unwrap();
        writeln!(file, "2,,FALSE POSITIVE").unwrap();
        writeln!(file, "3,9.1,CANDIDATE").unwrap();
        file
    }

    #[test]
    fn test_load_csv() {
        let file = create_test_csv();
        let loader = DataLoader::new();

        let df = loader.load_csv(file.path().to_str().unwrap()).unwrap();

        assert_eq!(df.height(), 3);
        assert_eq!(df.width(), 3);
        assert_eq!(df.column("koi_period").unwrap().null_count(), 1);
    }

    #[test]
    fn test_to_records_keeps_types_and_nulls() {
        let file = create_test_csv();
        let df = DataLoader::new().load_csv(file.path().to_str().unwrap()).unwrap();
        let records = to_records(&df).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["koi_period"], json!(2.5));
        assert_eq!(records[1]["koi_period"], Value::Null);
        assert_eq!(records[2]["koi_disposition"], json!("CANDIDATE"));
    }

    #[test]
    fn test_missing_required_columns() {
        let file = create_test_csv();
        let df = DataLoader::new().load_csv(file.path().to_str().unwrap()).unwrap();
        let missing = missing_required_columns(&df);
        assert_eq!(missing.len(), REQUIRED_COLUMNS.len() - 3);
        assert!(!missing.contains(&"kepid".to_string()));
        assert_eq!(missing[0], "dec");
    }

    #[test]
    fn test_detect_separator() {
        assert_eq!(detect_separator("a;b;c\n1;2;3"), b';');
        assert_eq!(detect_separator("a,b,c\n1;2,3"), b',');
        assert_eq!(detect_separator(""), b',');
    }

    #[test]
    fn test_load_semicolon_bytes() {
        let data = b"kepid;koi_period\n10;1.5\n11;2.5\n";
        let df = DataLoader::new().load_csv_bytes(data).unwrap();
        assert_eq!(df.width(), 2);
        assert_eq!(df.height(), 2);
    }

    #[test]
    fn test_header_only_bytes_is_error() {
        let result = DataLoader::new().load_csv_bytes(b"kepid,koi_period\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_records_types() {
        let rows = vec![
            json!({"kepid": 7, "koi_disposition": "CONFIRMED", "koi_prad": null}),
            json!({"kepid": 8, "koi_disposition": "CANDIDATE", "koi_prad": 1.2}),
        ];
        let records: Vec<Map<String, Value>> = rows
            .into_iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect();

        let df = DataLoader::new().from_records(&records).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.column("kepid").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("koi_disposition").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("koi_prad").unwrap().null_count(), 1);
    }

    #[test]
    fn test_from_records_empty() {
        assert!(DataLoader::new().from_records(&[]).is_err());
    }

    #[test]
    fn test_save_csv_roundtrip() {
        let mut df = DataFrame::new(vec![
            Column::new("a".into(), &[1.0, 2.0, 3.0]),
            Column::new("b".into(), &["x", "y", "z"]),
        ])
        .unwrap();

        let file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        let path = file.path().to_str().unwrap();
        DataSaver::save_csv(&mut df, path).unwrap();

        let loaded = DataLoader::new().load_csv(path).unwrap();
        assert_eq!(loaded.shape(), (3, 2));
    }
}
