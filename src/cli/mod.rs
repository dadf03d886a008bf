//! KOI classifier CLI
//!
//! Command-line interface for training, prediction, upload validation and
//! serving the HTTP API.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::pipeline::{ModelKind, OutputLayout, PipelineConfig, PipelineRunner};
use crate::utils::{missing_required_columns, DataLoader};

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // box inner width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn line_box_top()    { println!("  {}", dim("┌─────────────────────────────────────────────────────────┐")); }
fn line_box_bottom() { println!("  {}", dim("└─────────────────────────────────────────────────────────┘")); }
fn line_box_sep()    { println!("  {}", dim("├─────────────────────────────────────────────────────────┤")); }

fn line_box(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let pad = W.saturating_sub(visible_len);
    println!("  {}  {}{} {}", dim("│"), content, " ".repeat(pad), dim("│"));
}

fn line_box_center(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let total_pad = W.saturating_sub(visible_len);
    let left = total_pad / 2;
    let right = total_pad - left;
    println!("  {}  {}{}{} {}", dim("│"), " ".repeat(left), content, " ".repeat(right), dim("│"));
}

fn line_box_empty() { line_box(""); }

fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' { in_escape = true; continue; }
        if in_escape { if c == 'm' { in_escape = false; } continue; }
        out.push(c);
    }
    out
}

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "koi")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Kepler KOI disposition classifier")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a pipeline on a KOI CSV
    Train {
        /// Input CSV (comma or semicolon separated)
        #[arg(short, long)]
        data: PathBuf,

        /// Pipeline to run
        #[arg(short, long, value_enum, default_value = "ensemble")]
        model_type: ModelKind,

        /// Folder receiving the artifacts
        #[arg(short, long, default_value = "./outputs", env = "OUTPUT_FOLDER")]
        output: PathBuf,

        /// Weight samples inversely to class frequency
        #[arg(long)]
        class_weight: bool,

        /// Keep the koi_fpflag_* columns as features
        #[arg(long)]
        keep_fpflags: bool,

        /// JSON pipeline configuration; omitted fields use the defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Predict a KOI CSV with a trained artifact
    Predict {
        /// Input CSV
        #[arg(short, long)]
        data: PathBuf,

        /// Artifact family to load
        #[arg(short, long, value_enum, default_value = "ensemble")]
        model_type: ModelKind,

        /// Folder holding the artifacts
        #[arg(short, long, default_value = "./outputs", env = "OUTPUT_FOLDER")]
        output: PathBuf,

        /// Keep the koi_fpflag_* columns as features
        #[arg(long)]
        keep_fpflags: bool,

        /// Write the full result as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Check a CSV for the required KOI columns
    Validate {
        /// Input CSV
        #[arg(short, long)]
        data: PathBuf,
    },

    /// Start the HTTP API
    Serve {
        /// Server port
        #[arg(short, long, default_value = "5005", env = "API_PORT")]
        port: u16,

        /// Server host
        #[arg(long, default_value = "0.0.0.0", env = "API_HOST")]
        host: String,
    },
}

fn load_csv(path: &Path) -> anyhow::Result<polars::prelude::DataFrame> {
    let bytes = std::fs::read(path).map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
    Ok(DataLoader::new().load_csv_bytes(&bytes)?)
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_train(
    data_path: &Path,
    kind: ModelKind,
    output: &Path,
    class_weight: bool,
    drop_fpflags: bool,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    section("Train");

    let config = match config_path {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    step_run("Loading data");
    let start = Instant::now();
    let df = load_csv(data_path)?;
    step_done(&format!("{} rows × {} cols in {:?}", df.height(), df.width(), start.elapsed()));

    step_run(&format!("Training {}", kind.as_str().cyan()));
    let runner = PipelineRunner::new(config, OutputLayout::new(output));
    let report = runner.train(kind, &df, class_weight, drop_fpflags)?;
    step_done(&format!("{:.1}s", report.elapsed_s));

    println!();
    println!("  {:<28} {}", muted("CV accuracy"), format!("{:.4}", report.cv_accuracy).white().bold());
    println!("  {:<28} {}", muted("Rows"), report.rows.to_string().white());
    println!("  {:<28} {}", muted("Features"), report.features.to_string().white());
    for (name, value) in &report.details {
        println!("  {:<28} {}", muted(name), format!("{:.4}", value).white());
    }
    println!("  {:<28} {}", muted("Artifact"), report.artifact.display().to_string().white());
    println!();

    Ok(())
}

pub fn cmd_predict(
    data_path: &Path,
    kind: ModelKind,
    output: &Path,
    drop_fpflags: bool,
    json_path: Option<&Path>,
) -> anyhow::Result<()> {
    section("Predict");

    step_run("Loading data");
    let df = load_csv(data_path)?;
    step_done(&format!("{} rows × {} cols", df.height(), df.width()));

    step_run(&format!("Predicting with {}", kind.as_str().cyan()));
    let runner = PipelineRunner::new(PipelineConfig::default(), OutputLayout::new(output));
    let results = runner.predict(&df, kind, drop_fpflags)?;
    step_done(&format!("{:.3}s", results.model_info.elapsed_s));

    let mut counts: std::collections::BTreeMap<&str, usize> = Default::default();
    for label in &results.decoded_predictions {
        *counts.entry(label.as_str()).or_default() += 1;
    }
    println!();
    for (label, count) in counts {
        println!("  {:<20} {}", muted(label), count.to_string().white());
    }
    if let Some(metrics) = &results.metrics {
        println!();
        println!("  {:<20} {}", muted("Accuracy"), format!("{:.4}", metrics.accuracy).white().bold());
        println!("  {:<20} {}", muted("Precision"), format!("{:.4}", metrics.precision).white());
        println!("  {:<20} {}", muted("Recall"), format!("{:.4}", metrics.recall).white());
        println!("  {:<20} {}", muted("F1"), format!("{:.4}", metrics.f1).white());
    }

    if let Some(path) = json_path {
        std::fs::write(path, serde_json::to_string_pretty(&results)?)?;
        println!();
        println!("  {} {}", ok("✓"), format!("results written to {}", path.display()));
    }
    println!();
    Ok(())
}

pub fn cmd_validate(data_path: &Path) -> anyhow::Result<()> {
    section("Validate");

    let df = load_csv(data_path)?;
    println!("  {:<12} {}", muted("File"), data_path.display());
    println!("  {:<12} {}", muted("Rows"), df.height());
    println!("  {:<12} {}", muted("Columns"), df.width());
    println!();

    let missing = missing_required_columns(&df);
    if missing.is_empty() {
        println!("  {} {}", ok("✓"), "CSV file is valid");
        println!();
        return Ok(());
    }
    for name in &missing {
        println!("  {} {}", "✗".red(), name);
    }
    println!();
    anyhow::bail!("missing {} required columns", missing.len())
}

// ─── Serve ─────────────────────────────────────────────────────────────────────

pub async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    use crate::server::{run_server, ServerConfig};

    println!();
    line_box_top();
    line_box_empty();
    line_box_center(&format!("{}", "KOI Classifier".white().bold()));
    line_box_center(&format!("{}", dim(&format!("v{}", env!("CARGO_PKG_VERSION")))));
    line_box_empty();
    line_box_sep();
    line_box_empty();
    line_box(&kv("API    ", &format!("http://{}:{}/api", host, port)));
    line_box(&kv("Health ", &format!("http://{}:{}/api/health", host, port)));
    line_box_empty();
    line_box_sep();
    line_box_empty();
    line_box_center(&format!("{}", dim("ctrl+c to stop")));
    line_box_empty();
    line_box_bottom();
    println!();

    let config = ServerConfig {
        host: host.to_string(),
        port,
        ..Default::default()
    };

    run_server(config).await
}

pub fn show_help() {
    section("Commands");

    let cmds: &[(&str, &str)] = &[
        ("koi train -d koi.csv", "Train the ensemble pipeline"),
        ("koi train -d koi.csv -m multistep", "Train the two-stage cascade"),
        ("koi predict -d new.csv -m ensemble", "Predict with a trained artifact"),
        ("koi validate -d koi.csv", "Check required columns"),
        ("koi serve -p 5005", "Start the HTTP API"),
    ];

    for (cmd, desc) in cmds {
        println!("  {:<44} {}", cmd.white(), muted(desc));
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_train() {
        let cli = Cli::try_parse_from([
            "koi", "train", "-d", "koi.csv", "-m", "binary_categories", "--class-weight",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Train { model_type, class_weight, keep_fpflags, .. }) => {
                assert_eq!(model_type, ModelKind::BinaryCategories);
                assert!(class_weight);
                assert!(!keep_fpflags);
            }
            _ => panic!("expected train"),
        }
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1mbold\x1b[0m"), "bold");
    }
}
