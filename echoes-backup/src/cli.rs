//! CLI interface for echoes-backup: argument parsing, wiring of concrete
//! collaborators and dispatch to the pipeline drivers.
//!
//! All pipeline logic lives in [`echoes_backup_core`]; this module only loads the
//! configuration, builds the collaborators and reports the outcome.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use echoes_backup_core::archiver::ZipArchiver;
use echoes_backup_core::ledger::SqliteLedger;
use echoes_backup_core::scheduler::DailyScheduler;
use echoes_backup_core::stages::StageHandlers;
use echoes_backup_core::synchronise::Pipeline;

use crate::load_config::{load_config, CliConfig};
use crate::notify::build_notifier;
use crate::sftp::SftpClient;

/// CLI for echoes-backup: compress, ship and retire daily data directories.
#[derive(Parser)]
#[clap(
    name = "echoes-backup",
    version,
    about = "Compress per-day data directories, ship them over SFTP and keep a retry ledger"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process every day found in the source directory
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Process a single day
    Process {
        #[clap(long)]
        config: PathBuf,
        /// Day to process, as YYYY-MM-DD
        #[clap(long)]
        filename: String,
    },
    /// Retry every day with a failed stage
    Retry {
        #[clap(long)]
        config: PathBuf,
    },
    /// Delete sent days older than the removal offset
    Purge {
        #[clap(long)]
        config: PathBuf,
    },
    /// Yesterday, then retries, then purge
    Daily {
        #[clap(long)]
        config: PathBuf,
    },
    /// Run the daily job every day at the configured time until interrupted
    Schedule {
        #[clap(long)]
        config: PathBuf,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Sync { .. } => "sync",
            Commands::Process { .. } => "process",
            Commands::Retry { .. } => "retry",
            Commands::Purge { .. } => "purge",
            Commands::Daily { .. } => "daily",
            Commands::Schedule { .. } => "schedule",
        }
    }

    fn config_path(&self) -> &PathBuf {
        match self {
            Commands::Sync { config }
            | Commands::Process { config, .. }
            | Commands::Retry { config }
            | Commands::Purge { config }
            | Commands::Daily { config }
            | Commands::Schedule { config } => config,
        }
    }
}

/// Wires the concrete collaborators into a pipeline.
pub fn build_pipeline(config: &CliConfig) -> Result<Pipeline> {
    let ledger = SqliteLedger::open(&config.ledger.path)
        .with_context(|| format!("Failed to open ledger at {:?}", config.ledger.path))?;
    let handlers = StageHandlers::new(
        Arc::new(ledger),
        Arc::new(ZipArchiver::new()),
        Arc::new(SftpClient::new(config.sftp.clone())),
        Arc::new(build_notifier(&config.notify)),
        config.pipeline.clone(),
    );
    Ok(Pipeline::new(handlers))
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let command = cli.command.name();
    let config = load_config(cli.command.config_path())?;
    let pipeline = build_pipeline(&config)?;
    tracing::info!(command, "Starting command");

    match cli.command {
        Commands::Sync { .. } => {
            let report = pipeline.synchronise().await.context("Synchronisation failed")?;
            tracing::info!(command, ?report, "Synchronisation complete");
            if report.failed() > 0 {
                tracing::warn!(command, failed = report.failed(), "Some days were left for retry");
            }
        }
        Commands::Process { filename, .. } => {
            let report = pipeline.process_file(&filename).await;
            tracing::info!(command, ?report, "Processing complete");
            if let Some(error) = report.error {
                anyhow::bail!("Processing {filename} failed: {error}");
            }
        }
        Commands::Retry { .. } => {
            let report = pipeline.process_retries().await.context("Retry sweep failed")?;
            tracing::info!(command, ?report, "Retry sweep complete");
        }
        Commands::Purge { .. } => {
            let report = pipeline.delete_old_files().await.context("Retention sweep failed")?;
            tracing::info!(command, ?report, "Retention sweep complete");
        }
        Commands::Daily { .. } => {
            let report = pipeline.run_daily().await.context("Daily run failed")?;
            tracing::info!(command, ?report, "Daily run complete");
        }
        Commands::Schedule { .. } => {
            let mut scheduler = DailyScheduler::start(Arc::new(pipeline), config.schedule.run_at);
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            tracing::info!(command, "Shutdown requested, waiting for the current run");
            scheduler.shutdown();
            scheduler.join().await.context("Scheduler task failed")?;
        }
    }
    Ok(())
}
