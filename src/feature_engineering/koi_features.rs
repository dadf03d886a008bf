//! Astrophysical feature derivation for KOI tables
//!
//! Every derived feature needs a fixed set of source columns. When one of
//! them is absent the feature is skipped without error, so partially
//! populated uploads still produce a usable table.

use crate::error::{KoiError, Result};
use polars::prelude::*;
use tracing::info;

const EPS: f64 = 1e-8;

type Values = Vec<Option<f64>>;

/// Derived-feature generator for KOI tables
#[derive(Debug, Clone, Default)]
pub struct KoiFeatureEngineer {
    added: Vec<String>,
}

impl KoiFeatureEngineer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the features added by the last [`transform`](Self::transform) call
    pub fn added_features(&self) -> &[String] {
        &self.added
    }

    /// Append all derivable features to a copy of `df`
    pub fn transform(&mut self, df: &DataFrame) -> Result<DataFrame> {
        self.added.clear();
        let mut new_columns: Vec<(String, Values)> = Vec::new();
        let mut push = |name: &str, values: Values| new_columns.push((name.to_string(), values));

        let period = numeric(df, "koi_period")?;
        let prad = numeric(df, "koi_prad")?;
        let depth = numeric(df, "koi_depth")?;
        let duration = numeric(df, "koi_duration")?;
        let impact = numeric(df, "koi_impact")?;
        let srad = numeric(df, "koi_srad")?;
        let steff = numeric(df, "koi_steff")?;
        let teq = numeric(df, "koi_teq")?;
        let insol = numeric(df, "koi_insol")?;
        let snr = numeric(df, "koi_model_snr")?;
        let plnt_num = numeric(df, "koi_tce_plnt_num")?;

        // Astronomical ratios and interactions
        if let (Some(p), Some(r)) = (&period, &prad) {
            push(
                "period_radius_ratio",
                zip2(p, r, |p, r| p.ln_1p() / (r.ln_1p() + EPS)),
            );
            push("period_prad_product", zip2(p, r, |p, r| p * r));
        }

        // Polynomial and log transforms; nulls count as zero here
        for (name, values) in [("koi_period", &period), ("koi_prad", &prad), ("koi_depth", &depth)] {
            if let Some(v) = values {
                let filled: Vec<f64> = v.iter().map(|x| x.unwrap_or(0.0)).collect();
                push(
                    &format!("{}_log", name),
                    filled.iter().map(|x| Some(x.abs().ln_1p())).collect(),
                );
                push(
                    &format!("{}_sqrt", name),
                    filled.iter().map(|x| Some(x.abs().sqrt())).collect(),
                );
                push(
                    &format!("{}_squared", name),
                    filled.iter().map(|x| Some(x * x)).collect(),
                );
            }
        }

        if let (Some(d), Some(t)) = (&depth, &duration) {
            push("depth_duration_ratio", zip2(d, t, |d, t| d / (t + EPS)));
        }

        if let Some(b) = &impact {
            push("impact_centrality", map1(b, |b| 1.0 - b.abs()));
            push("is_grazing_transit", flag(b, |b| b > 0.7));
        }

        if let (Some(r), Some(s)) = (&prad, &srad) {
            let ratio = zip2(r, s, |r, s| r / (s + EPS));
            let squared = map1(&ratio, |q| q * q);
            push("prad_srad_ratio", ratio);
            push("prad_srad_ratio_squared", squared);
        }

        if let Some(st) = &steff {
            push(
                "stellar_class",
                st.iter().map(|t| Some(stellar_class(*t))).collect(),
            );
            if let Some(tq) = &teq {
                push("temp_ratio", zip2(tq, st, |tq, st| tq / (st + EPS)));
            }
        }

        if let (Some(p), Some(_)) = (&period, &srad) {
            let distance = map1(p, |p| (p * p).cbrt());
            let check = insol.as_ref().map(|i| zip2(i, &distance, |i, d| i * d * d));
            push("estimated_distance", distance);
            if let Some(check) = check {
                push("insolation_distance_check", check);
            }
        }

        if let (Some(r), Some(p)) = (&prad, &period) {
            push("detectability", zip2(r, p, |r, p| r / p.ln_1p()));
        }

        if let (Some(s), Some(d)) = (&snr, &depth) {
            push("snr_per_depth", zip2(s, d, |s, d| s / (d + EPS)));
        }

        // Measurement uncertainty
        let error_columns: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .filter(|name| name.contains("err1") || name.contains("err2"))
            .collect();
        if !error_columns.is_empty() {
            let mut total = vec![0.0; df.height()];
            for name in &error_columns {
                if let Some(values) = numeric(df, name)? {
                    for (acc, v) in total.iter_mut().zip(values) {
                        *acc += v.map(f64::abs).unwrap_or(0.0);
                    }
                }
            }
            push("total_uncertainty", total.into_iter().map(Some).collect());

            for base in ["koi_period", "koi_depth"] {
                let err1 = numeric(df, &format!("{}_err1", base))?;
                let err2 = numeric(df, &format!("{}_err2", base))?;
                let value = numeric(df, base)?;
                if let (Some(e1), Some(e2), Some(v)) = (err1, err2, value) {
                    let spread = zip2(&e1, &e2, |a, b| a.abs() + b.abs());
                    let name = format!("{}_relative_error", base.trim_start_matches("koi_"));
                    push(&name, zip2(&spread, &v, |s, v| s / (v + EPS)));
                }
            }
        }

        // Transit duration and geometry
        if let (Some(t), Some(p)) = (&duration, &period) {
            let fraction = zip2(t, p, |t, p| t / (p * 24.0 + EPS));
            let long = flag(&fraction, |f| f > 0.15);
            push("duration_fraction", fraction.clone());
            push("is_long_transit", long);
            push("transit_duration_ratio", fraction);
        }

        if let Some(n) = &plnt_num {
            push("is_multiplanet", flag(n, |n| n > 1.0));
            push("planet_position_log", map1(n, f64::ln_1p));
        }

        if let Some(s) = &snr {
            push("log_snr", map1(s, f64::ln_1p));
        }

        let mut out = df.clone();
        for (name, values) in new_columns {
            out.with_column(Column::new(name.as_str().into(), values))
                .map_err(|e| KoiError::PreprocessingError(e.to_string()))?;
            self.added.push(name);
        }

        info!(
            added = self.added.len(),
            columns_before = df.width(),
            columns_after = out.width(),
            "Feature engineering complete"
        );
        Ok(out)
    }
}

/// Convenience wrapper around [`KoiFeatureEngineer::transform`]
pub fn create_advanced_features(df: &DataFrame) -> Result<DataFrame> {
    KoiFeatureEngineer::new().transform(df)
}

/// Spectral-type bucket from effective temperature (M, K, G, F, A and hotter)
pub fn stellar_class(steff: Option<f64>) -> f64 {
    match steff {
        Some(t) if t < 3500.0 => 0.0,
        Some(t) if t < 5200.0 => 1.0,
        Some(t) if t < 6000.0 => 2.0,
        Some(t) if t < 7500.0 => 3.0,
        _ => 4.0,
    }
}

fn numeric(df: &DataFrame, name: &str) -> Result<Option<Values>> {
    let column = match df.column(name) {
        Ok(c) => c,
        Err(_) => return Ok(None),
    };
    let series = column
        .as_materialized_series()
        .cast(&DataType::Float64)
        .map_err(|e| KoiError::PreprocessingError(format!("{}: {}", name, e)))?;
    Ok(Some(series.f64()?.into_iter().collect()))
}

fn map1(a: &[Option<f64>], f: impl Fn(f64) -> f64) -> Values {
    a.iter().map(|x| x.map(&f)).collect()
}

fn zip2(a: &[Option<f64>], b: &[Option<f64>], f: impl Fn(f64, f64) -> f64) -> Values {
    a.iter()
        .zip(b)
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some(f(*x, *y)),
            _ => None,
        })
        .collect()
}

/// Null compares as false
fn flag(a: &[Option<f64>], pred: impl Fn(f64) -> bool) -> Values {
    a.iter()
        .map(|x| Some(if x.map(&pred).unwrap_or(false) { 1.0 } else { 0.0 }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleaned_frame() -> DataFrame {
        DataFrame::new(vec![
            Column::new("koi_period".into(), &[10.0, 1.0]),
            Column::new("koi_period_err1".into(), &[0.1, 0.2]),
            Column::new("koi_period_err2".into(), &[-0.1, -0.2]),
            Column::new("koi_prad".into(), &[2.0, 12.0]),
            Column::new("koi_srad".into(), &[1.0, 2.0]),
            Column::new("koi_impact".into(), &[0.2, 0.9]),
            Column::new("koi_duration".into(), &[3.0, 10.0]),
            Column::new("koi_steff".into(), &[5700.0, 3000.0]),
            Column::new("koi_tce_plnt_num".into(), &[2.0, 1.0]),
        ])
        .unwrap()
    }

    fn value(df: &DataFrame, name: &str, row: usize) -> f64 {
        df.column(name).unwrap().f64().unwrap().get(row).unwrap()
    }

    #[test]
    fn test_derived_values() {
        let df = create_advanced_features(&cleaned_frame()).unwrap();

        assert!((value(&df, "period_prad_product", 0) - 20.0).abs() < 1e-9);
        assert!((value(&df, "prad_srad_ratio", 1) - 6.0).abs() < 1e-6);
        assert_eq!(value(&df, "is_grazing_transit", 0), 0.0);
        assert_eq!(value(&df, "is_grazing_transit", 1), 1.0);
        assert_eq!(value(&df, "stellar_class", 0), 2.0);
        assert_eq!(value(&df, "stellar_class", 1), 0.0);
        assert_eq!(value(&df, "is_multiplanet", 0), 1.0);
        assert!((value(&df, "period_relative_error", 0) - 0.02).abs() < 1e-6);
        assert!((value(&df, "total_uncertainty", 1) - 0.4).abs() < 1e-9);
        // 10 h over a 1 day period is a long transit
        assert_eq!(value(&df, "is_long_transit", 1), 1.0);
        assert!((value(&df, "estimated_distance", 0) - 100f64.cbrt()).abs() < 1e-9);
    }

    #[test]
    fn test_missing_sources_skip_features() {
        let df = DataFrame::new(vec![Column::new("koi_impact".into(), &[0.5])]).unwrap();
        let mut fe = KoiFeatureEngineer::new();
        let out = fe.transform(&df).unwrap();

        assert_eq!(fe.added_features(), &["impact_centrality", "is_grazing_transit"]);
        assert!(out.column("log_snr").is_err());
        assert!(out.column("total_uncertainty").is_err());
    }

    #[test]
    fn test_stellar_class_boundaries() {
        assert_eq!(stellar_class(Some(3499.0)), 0.0);
        assert_eq!(stellar_class(Some(3500.0)), 1.0);
        assert_eq!(stellar_class(Some(7500.0)), 4.0);
        assert_eq!(stellar_class(None), 4.0);
    }

    #[test]
    fn test_polynomial_features_fill_nulls() {
        let df = DataFrame::new(vec![Column::new("koi_depth".into(), &[Some(-4.0), None])])
            .unwrap();
        let out = create_advanced_features(&df).unwrap();
        assert_eq!(value(&out, "koi_depth_sqrt", 0), 2.0);
        assert_eq!(value(&out, "koi_depth_squared", 1), 0.0);
    }

    #[test]
    fn test_features_emitted_in_derivation_order() {
        let mut frame = cleaned_frame();
        frame.with_column(Column::new("koi_insol".into(), &[1.5, 80.0])).unwrap();
        frame.with_column(Column::new("koi_model_snr".into(), &[12.0, 40.0])).unwrap();
        let mut fe = KoiFeatureEngineer::new();
        let df = fe.transform(&frame).unwrap();
        let tail: Vec<&str> = df.get_column_names()[frame.width()..].iter().map(|s| s.as_str()).collect();
        assert_eq!(tail, fe.added_features());
        let added = fe.added_features();
        let position = |name: &str| added.iter().position(|a| a == name).unwrap();
        assert!(position("prad_srad_ratio") < position("prad_srad_ratio_squared"));
        assert!(position("estimated_distance") < position("insolation_distance_check"));
        assert!(position("duration_fraction") < position("is_long_transit"));
        assert!(position("is_long_transit") < position("transit_duration_ratio"));
        assert_eq!(added.first().map(String::as_str), Some("period_radius_ratio"));
        assert_eq!(added.last().map(String::as_str), Some("log_snr"));
    }
}
