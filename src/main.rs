//! KOI classifier - Main Entry Point
//!
//! Trains and serves Kepler KOI disposition classifiers from the command line.

use clap::{CommandFactory, Parser};
use koi_classifier::cli::{cmd_predict, cmd_serve, cmd_train, cmd_validate, show_help, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "koi_classifier=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Train { data, model_type, output, class_weight, keep_fpflags, config }) => {
            cmd_train(&data, model_type, &output, class_weight, !keep_fpflags, config.as_deref())?;
        }
        Some(Commands::Predict { data, model_type, output, keep_fpflags, json }) => {
            cmd_predict(&data, model_type, &output, !keep_fpflags, json.as_deref())?;
        }
        Some(Commands::Validate { data }) => {
            cmd_validate(&data)?;
        }
        Some(Commands::Serve { port, host }) => {
            cmd_serve(&host, port).await?;
        }
        None => {
            Cli::command().print_help()?;
            show_help();
        }
    }

    Ok(())
}
