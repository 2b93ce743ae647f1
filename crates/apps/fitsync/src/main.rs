//! fitsync - Google Fit metrics to CSV
//!
//! Command-line entry point over the `health` sync engine.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use health::{
    CredentialManager, CsvSink, FitnessClient, MetricKind, MetricRegistry, MetricStatus,
    OAuthClientConfig, RunSummary, SyncMode, SyncOrchestrator, SyncService, SyncSettings,
    SyncState, TokenStore,
};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "fitsync")]
#[command(about = "Sync Google Fit health metrics to per-metric CSV files")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Metrics to sync, comma separated (default: settings.json, else all)
    #[arg(short, long, value_delimiter = ',', global = true)]
    metrics: Vec<String>,

    /// Root directory for the metric folders
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync the full history, then keep running incremental syncs
    Full {
        /// Exit after the full sync instead of scheduling incremental syncs
        #[arg(long)]
        once: bool,
    },
    /// Sync recent data once
    Incremental,
    /// Keep running incremental syncs, continuing the last recorded schedule
    Watch,
    /// Authorize access and store the token
    Login,
    /// Remove the stored token
    Logout,
    /// List the available metrics
    Metrics,
}

fn main() -> Result<ExitCode> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let args = Args::parse();
    let settings = SyncSettings::load()?;
    let selection = if args.metrics.is_empty() {
        settings.metrics.clone()
    } else {
        args.metrics.clone()
    };
    let output = args.output.clone().unwrap_or_else(|| settings.output_dir.clone());

    match args.command {
        Command::Metrics => {
            list_metrics();
            Ok(ExitCode::SUCCESS)
        }
        Command::Logout => {
            TokenStore::default_location()?.clear()?;
            println!("Signed out");
            Ok(ExitCode::SUCCESS)
        }
        Command::Login => {
            let credentials = credential_manager(&settings)?;
            let registry = MetricRegistry::google_fit();
            let metrics = registry.select(&selection)?;
            credentials.acquire(&MetricRegistry::scopes_for(&metrics))?;
            println!("Signed in; token saved to {}", credentials.store().path().display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Incremental => {
            let orchestrator = build_orchestrator(&settings, output)?;
            let summary = orchestrator.run_incremental(selection)?;
            Ok(report(&summary))
        }
        Command::Watch => {
            let orchestrator = build_orchestrator(&settings, output)?;
            let service = SyncService::new(orchestrator, settings.interval());
            let mut handle = service
                .resume(selection)
                .context("Failed to start the scheduler")?;
            info!(
                "Incremental sync every {} hour(s); press Ctrl-C to stop",
                settings.interval().as_secs() / 3600
            );
            handle.join_scheduler();
            Ok(ExitCode::SUCCESS)
        }
        Command::Full { once: true } => {
            let orchestrator = build_orchestrator(&settings, output)?;
            let summary = orchestrator.run_full(selection)?;
            Ok(report(&summary))
        }
        Command::Full { once: false } => {
            let orchestrator = build_orchestrator(&settings, output)?;
            let service = SyncService::new(orchestrator, settings.interval());
            let mut handle = service
                .start(selection)
                .context("Failed to start sync threads")?;

            if let Some(result) = handle.wait_full() {
                report(&result?);
            }
            info!(
                "Incremental sync every {} hour(s); press Ctrl-C to stop",
                settings.interval().as_secs() / 3600
            );
            handle.join_scheduler();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn credential_manager(settings: &SyncSettings) -> Result<CredentialManager> {
    let client = OAuthClientConfig::load()?;
    Ok(CredentialManager::google(&client, settings.request_timeout())?)
}

fn build_orchestrator(settings: &SyncSettings, output: PathBuf) -> Result<SyncOrchestrator> {
    let credentials = credential_manager(settings)?;
    let api = Arc::new(FitnessClient::new(settings.request_timeout()));
    info!("Writing output under {}", output.display());

    let orchestrator = SyncOrchestrator::new(
        credentials,
        api,
        MetricRegistry::google_fit(),
        Box::new(CsvSink::new(output)),
        settings.to_options()?,
    );

    Ok(match config::config_path(SyncState::FILE_NAME) {
        Some(path) => orchestrator.with_state_path(path),
        None => orchestrator,
    })
}

fn list_metrics() {
    for metric in MetricRegistry::google_fit().all() {
        let kind = match &metric.kind {
            MetricKind::Scalar { .. } => "scalar",
            MetricKind::Composite { .. } => "composite",
            MetricKind::Categorical { .. } => "categorical",
        };
        println!(
            "{:<18} {:<12} {:<18} {}",
            metric.key, kind, metric.output_folder, metric.remote_type_name
        );
    }
}

/// Print the run summary; non-zero exit if any metric did not succeed
fn report(summary: &RunSummary) -> ExitCode {
    for result in &summary.results {
        let location = result
            .output
            .as_ref()
            .map(|p| format!(" -> {}", p.display()))
            .unwrap_or_default();
        println!(
            "{:<18} {} ({} records){}",
            result.metric, result.status, result.record_count, location
        );
    }
    println!("{} in {} ms", summary.headline(), summary.duration_ms);

    if summary.mode == SyncMode::Full && summary.failed().count() == 0 {
        println!("Full history sync complete");
    }

    if summary
        .results
        .iter()
        .all(|r| !matches!(r.status, MetricStatus::Failed { .. }))
    {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
