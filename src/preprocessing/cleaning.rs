//! KOI table cleaning: identifier/leakage column removal and imputation

use crate::error::{KoiError, Result};
use crate::utils::REQUIRED_COLUMNS;
use polars::prelude::*;
use tracing::{debug, info, warn};

/// Identifier and leakage-prone columns removed before training
pub const DROP_COLUMNS: &[&str] = &[
    "rowid",
    "kepid",
    "kepoi_name",
    "kepler_name",
    "koi_pdisposition",
    "koi_score",
    "koi_tce_delivname",
    "koi_teq_err1",
    "koi_teq_err2",
];

/// Kepler false-positive flags
pub const FPFLAG_COLUMNS: &[&str] = &[
    "koi_fpflag_nt",
    "koi_fpflag_ss",
    "koi_fpflag_co",
    "koi_fpflag_ec",
];

/// Text columns of the KOI table; every other KOI column is numeric
pub const CATEGORICAL_COLUMNS: &[&str] = &[
    "kepoi_name",
    "kepler_name",
    "koi_disposition",
    "koi_pdisposition",
    "koi_tce_delivname",
];

/// Summary of what a cleaning pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleaningReport {
    /// Columns read as text but holding numbers (or nothing at all)
    pub coerced_columns: Vec<String>,
    pub dropped_columns: Vec<String>,
    pub imputed_columns: Vec<String>,
    pub dropped_rows: usize,
}

/// Clean a raw KOI table.
///
/// Text columns that belong to the numeric KOI schema, or that are entirely
/// empty, are first cast to Float64; an entirely empty categorical column is
/// dropped. Then identifier columns are dropped and the false-positive flags
/// are either dropped or zero-filled. Numeric nulls get the column median;
/// rows with a null in a remaining string column are removed.
pub fn clean_koi_dataset(df: &DataFrame, drop_fpflags: bool) -> Result<DataFrame> {
    clean_koi_dataset_with_report(df, drop_fpflags).map(|(df, _)| df)
}

/// Same as [`clean_koi_dataset`] but also returns a [`CleaningReport`]
pub fn clean_koi_dataset_with_report(
    df: &DataFrame,
    drop_fpflags: bool,
) -> Result<(DataFrame, CleaningReport)> {
    let mut report = CleaningReport::default();
    let mut out = df.clone();
    coerce_text_columns(&mut out, &mut report)?;

    let mut to_drop: Vec<&str> = DROP_COLUMNS.to_vec();
    if drop_fpflags {
        to_drop.extend_from_slice(FPFLAG_COLUMNS);
    }
    for name in to_drop {
        if out.column(name).is_ok() {
            out = out
                .drop(name)
                .map_err(|e| KoiError::PreprocessingError(e.to_string()))?;
            report.dropped_columns.push(name.to_string());
        }
    }

    if !drop_fpflags {
        for name in FPFLAG_COLUMNS {
            if let Ok(column) = out.column(name) {
                let filled = fill_numeric(column.as_materialized_series(), 0.0)?;
                out.with_column(filled)
                    .map_err(|e| KoiError::PreprocessingError(e.to_string()))?;
            }
        }
    }

    let names: Vec<String> = out
        .get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut string_columns = Vec::new();
    for name in &names {
        let series = out.column(name)?.as_materialized_series().clone();
        if matches!(series.dtype(), DataType::String) {
            string_columns.push(name.clone());
            continue;
        }
        if series.null_count() == 0 {
            continue;
        }
        let as_f64 = series
            .cast(&DataType::Float64)
            .map_err(|e| KoiError::PreprocessingError(e.to_string()))?;
        let median = as_f64.f64()?.median().unwrap_or(0.0);
        debug!(column = %name, median, "Median imputation");
        let filled = fill_numeric(&as_f64, median)?;
        out.with_column(filled)
            .map_err(|e| KoiError::PreprocessingError(e.to_string()))?;
        report.imputed_columns.push(name.clone());
    }

    if !string_columns.is_empty() {
        let before = out.height();
        let mut keep = BooleanChunked::full("keep".into(), true, before);
        for name in &string_columns {
            let mask = out.column(name)?.as_materialized_series().is_not_null();
            keep = &keep & &mask;
        }
        out = out
            .filter(&keep)
            .map_err(|e| KoiError::PreprocessingError(e.to_string()))?;
        report.dropped_rows = before - out.height();
    }

    info!(
        coerced_columns = report.coerced_columns.len(),
        dropped_columns = report.dropped_columns.len(),
        imputed_columns = report.imputed_columns.len(),
        dropped_rows = report.dropped_rows,
        rows = out.height(),
        columns = out.width(),
        "Cleaned KOI dataset"
    );

    Ok((out, report))
}

/// CSV readers type a column with no values at all as String
fn coerce_text_columns(df: &mut DataFrame, report: &mut CleaningReport) -> Result<()> {
    let text_columns: Vec<(String, bool)> = df
        .get_columns()
        .iter()
        .filter(|c| c.dtype() == &DataType::String)
        .map(|c| (c.name().to_string(), c.null_count() == c.len()))
        .collect();

    for (name, empty) in text_columns {
        let categorical = CATEGORICAL_COLUMNS.contains(&name.as_str());
        if categorical {
            if empty {
                warn!(column = %name, "Dropping categorical column without values");
                *df = df
                    .drop(&name)
                    .map_err(|e| KoiError::PreprocessingError(e.to_string()))?;
                report.dropped_columns.push(name);
            }
            continue;
        }
        if !empty && !REQUIRED_COLUMNS.contains(&name.as_str()) {
            continue;
        }
        let series = df.column(&name)?.as_materialized_series().clone();
        let nulls_before = series.null_count();
        let numeric = series
            .cast(&DataType::Float64)
            .map_err(|e| KoiError::PreprocessingError(e.to_string()))?;
        let unparsed = numeric.null_count() - nulls_before;
        if unparsed > 0 {
            warn!(column = %name, unparsed, "Non-numeric values in numeric column treated as missing");
        }
        debug!(column = %name, "Coerced text column to Float64");
        df.with_column(numeric)
            .map_err(|e| KoiError::PreprocessingError(e.to_string()))?;
        report.coerced_columns.push(name);
    }
    Ok(())
}

fn fill_numeric(series: &Series, value: f64) -> Result<Series> {
    let as_f64 = series
        .cast(&DataType::Float64)
        .map_err(|e| KoiError::PreprocessingError(e.to_string()))?;
    let filled: Float64Chunked = as_f64
        .f64()?
        .into_iter()
        .map(|v| Some(v.unwrap_or(value)))
        .collect();
    Ok(filled.with_name(series.name().clone()).into_series())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_frame() -> DataFrame {
        DataFrame::new(vec![
            Column::new("rowid".into(), &[1i64, 2, 3, 4]),
            Column::new("kepid".into(), &[10i64, 10, 11, 12]),
            Column::new("koi_score".into(), &[0.9, 0.1, 0.5, 0.7]),
            Column::new("koi_fpflag_nt".into(), &[Some(1i64), None, Some(0), Some(0)]),
            Column::new("koi_period".into(), &[Some(1.0), None, Some(3.0), Some(5.0)]),
            Column::new(
                "koi_disposition".into(),
                &[Some("CONFIRMED"), Some("CANDIDATE"), None, Some("FALSE POSITIVE")],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_drops_identifier_and_flag_columns() {
        let cleaned = clean_koi_dataset(&raw_frame(), true).unwrap();
        let names: Vec<String> = cleaned
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, vec!["koi_period", "koi_disposition"]);
    }

    #[test]
    fn test_keeps_and_zero_fills_flags() {
        let cleaned = clean_koi_dataset(&raw_frame(), false).unwrap();
        let flags = cleaned.column("koi_fpflag_nt").unwrap();
        assert_eq!(flags.null_count(), 0);
        // row 2 had a null flag and survives the string-null row drop
        assert_eq!(flags.f64().unwrap().get(1), Some(0.0));
    }

    #[test]
    fn test_median_imputation_and_row_drop() {
        let (cleaned, report) = clean_koi_dataset_with_report(&raw_frame(), true).unwrap();
        assert_eq!(report.dropped_rows, 1);
        assert_eq!(cleaned.height(), 3);
        let period = cleaned.column("koi_period").unwrap().f64().unwrap();
        // median of [1, 3, 5] = 3, imputed before the row drop
        assert_eq!(period.get(1), Some(3.0));
        assert!(report.imputed_columns.contains(&"koi_period".to_string()));
    }

    #[test]
    fn test_missing_optional_columns_are_ignored() {
        let df = DataFrame::new(vec![Column::new("koi_depth".into(), &[1.0, 2.0])]).unwrap();
        let cleaned = clean_koi_dataset(&df, true).unwrap();
        assert_eq!(cleaned.shape(), (2, 1));
    }

    #[test]
    fn test_blank_numeric_column_keeps_the_row() {
        let df = DataFrame::new(vec![
            Column::new("koi_disposition".into(), &["CANDIDATE"]),
            Column::new("koi_period".into(), &[10.5]),
            Column::new("koi_prad".into(), &[None::<&str>]),
            Column::new("koi_srad".into(), &[1.0]),
        ])
        .unwrap();
        let (cleaned, report) = clean_koi_dataset_with_report(&df, true).unwrap();
        assert_eq!(cleaned.height(), 1);
        assert_eq!(report.coerced_columns, vec!["koi_prad".to_string()]);
        let prad = cleaned.column("koi_prad").unwrap();
        assert_eq!(prad.dtype(), &DataType::Float64);
        assert_eq!(prad.f64().unwrap().get(0), Some(0.0));
    }

    #[test]
    fn test_schema_text_column_parsed_as_numbers() {
        let df = DataFrame::new(vec![
            Column::new("koi_depth".into(), &[Some("120.5"), Some("n/a"), None, Some("80.5")]),
            Column::new("note".into(), &[Some("a"), Some("b"), Some("c"), None]),
        ])
        .unwrap();
        let (cleaned, report) = clean_koi_dataset_with_report(&df, true).unwrap();
        // "note" is outside the KOI schema and stays categorical
        assert_eq!(report.coerced_columns, vec!["koi_depth".to_string()]);
        assert_eq!(report.dropped_rows, 1);
        let depth = cleaned.column("koi_depth").unwrap().f64().unwrap();
        assert_eq!(depth.get(0), Some(120.5));
        assert_eq!(depth.get(1), Some(100.5));
    }

    #[test]
    fn test_empty_target_column_is_dropped() {
        let df = DataFrame::new(vec![
            Column::new("koi_period".into(), &[1.0, 2.0]),
            Column::new("koi_disposition".into(), &[None::<&str>, None]),
        ])
        .unwrap();
        let (cleaned, report) = clean_koi_dataset_with_report(&df, true).unwrap();
        assert_eq!(cleaned.shape(), (2, 1));
        assert!(report.dropped_columns.contains(&"koi_disposition".to_string()));
    }
}
