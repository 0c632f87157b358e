//! Command-line entry point for the extension runtime.
//!
//! # Responsibility
//! - Report the linked core version.
//! - Scan local artifacts and list the extension candidates they declare.

use anyhow::Context;
use clap::{Parser, Subcommand};
use filterkit_core::{
    ArtifactEnumerator, CandidateScanner, JsonClassInspector, RuntimeConfig, UrlLoader,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "filterkit", about = "Inspect filterkit extension artifacts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the core crate version.
    Version,
    /// List extension candidates found in archives or class directories.
    Scan {
        /// JSON runtime configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Log level override (trace, debug, info, warn, error).
        #[arg(long)]
        log_level: Option<String>,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Version => {
            println!("filterkit_core version={}", filterkit_core::core_version());
            Ok(())
        }
        Command::Scan {
            config,
            log_level,
            paths,
        } => scan(config, log_level, &paths),
    }
}

fn scan(
    config: Option<PathBuf>,
    log_level: Option<String>,
    paths: &[PathBuf],
) -> anyhow::Result<()> {
    let mut config = match config {
        Some(path) => RuntimeConfig::from_path(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RuntimeConfig::default(),
    }
    .apply_env_overrides()?;
    if let Some(level) = log_level {
        config.logging.level = level;
    }
    config.validate()?;

    match &config.logging.directory {
        Some(dir) => filterkit_core::init_logging(&config.logging.level, &dir.to_string_lossy())?,
        None => filterkit_core::init_logging_to_stderr(&config.logging.level)?,
    }

    let loader = UrlLoader::from_paths("cli", paths);
    let artifacts = ArtifactEnumerator::from_config(&config).enumerate(&loader);
    let report =
        CandidateScanner::from_config(Arc::new(JsonClassInspector), &config).scan(&artifacts);
    for candidate in &report.candidates {
        println!("{candidate}");
    }
    log::info!(
        "event=cli_scan module=cli status=ok artifacts={} candidates={} skipped={}",
        artifacts.len(),
        report.candidates.len(),
        report.skipped
    );
    Ok(())
}
