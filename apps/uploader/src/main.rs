//! dropkit command-line uploader.

mod app;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dropkit", version, about = "Chunked, resumable file uploads")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files through the configured provider
    Upload {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Maximum chunks in flight per file
        #[arg(long)]
        concurrency: Option<usize>,
        /// Chunk size in bytes
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Print the final resume states as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{out}");
    Ok(())
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;
    tracing::debug!(provider = %config.provider, "configuration loaded");

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Upload {
            files,
            concurrency,
            chunk_size,
            json,
        } => {
            let config = config.with_overrides(concurrency, chunk_size);
            let rt = tokio::runtime::Runtime::new()?;
            let report = rt.block_on(app::upload(config, files))?;

            if json {
                print_json(&report.summaries)?;
            } else {
                for (summary, result) in report.summaries.iter().zip(&report.results) {
                    let mut line = format!(
                        "{}: {} ({:.1}%, {}/{} bytes)",
                        summary.file_name,
                        summary.status,
                        summary.percentage(),
                        summary.uploaded_size,
                        summary.total_size
                    );
                    if let Some(error) = &result.error {
                        line.push_str(&format!(" - {error}"));
                    }
                    println!("{line}");
                }
            }

            if report.all_succeeded() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}
