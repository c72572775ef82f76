//! target-s3-csv - load Singer streams into S3 as CSV files

use anyhow::Result;
use clap::Parser;
use s3csv_common::logging::{init_logging, LogConfig, LogLevel};
use s3csv_target::{emit_state, persist_messages, S3ObjectStore, SystemClock, TargetConfig};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "target-s3-csv")]
#[command(author, version, about = "Singer target that writes CSV files to S3")]
struct Cli {
    /// Config file
    #[arg(short, long, env = "TARGET_S3_CSV_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::new("target-s3-csv", log_level).merge_env()?;

    let guard = init_logging(&log_config)?;

    let config = match &cli.config {
        Some(path) => TargetConfig::from_file(path)?,
        None => TargetConfig::default(),
    };

    if let Err(e) = config.ensure_valid() {
        error!("{}", e);
        drop(guard);
        std::process::exit(1);
    }

    let store = S3ObjectStore::from_config(&config).await?;
    let input = BufReader::new(std::io::stdin());

    let state =
        persist_messages(input, &config, Arc::new(store), Box::new(SystemClock)).await?;

    emit_state(std::io::stdout().lock(), state.as_ref())?;

    info!("Exiting normally");
    drop(guard);
    Ok(())
}
