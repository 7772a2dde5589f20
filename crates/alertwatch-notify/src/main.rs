//! alertwatch - detection alert notifier.
//!
//! Queries Elasticsearch for open detection alerts, sends each one that has
//! not been notified before to Telegram, and records the identifiers it sent.
//!
//! # Usage
//!
//! ```bash
//! # Single run (for cron / systemd timers); exits non-zero on failure
//! alertwatch
//!
//! # Also fail the run when any individual notification failed
//! alertwatch --strict
//!
//! # Stay resident and poll every 5 minutes, serving metrics on :9090
//! alertwatch --interval 5m --metrics-port 9090
//! ```
//!
//! Configuration comes from the environment (optionally seeded from a
//! `.env` file); see [`alertwatch_notify::Config::from_env`].
//!
//! # Graceful Shutdown
//!
//! In loop mode SIGINT/SIGTERM stop the loop once the current run has
//! committed its state.

use alertwatch_core::metrics::{init_metrics, start_metrics_server};
use alertwatch_notify::{
    Config, ElasticSource, Pipeline, RunFailure, RunReport, TelegramNotifier, open_store,
};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Detection alert notifier.
#[derive(Parser, Debug)]
#[command(name = "alertwatch")]
#[command(about = "Send new Elastic detection alerts to Telegram")]
#[command(version)]
struct Args {
    /// Path to .env file (optional).
    #[arg(long, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,

    /// Poll continuously with this pause between runs (e.g. "5m").
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Metrics HTTP server port in loop mode (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,

    /// Exit non-zero when any notification failed, not only on run failures
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load .env file if it exists
    if std::path::Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)
            .with_context(|| format!("Failed to load {}", args.dotenv))?;
        eprintln!("Loaded environment from {}", args.dotenv);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,alertwatch_notify=debug")),
        )
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    let source =
        ElasticSource::new(config.elastic.clone()).context("Failed to create Elasticsearch source")?;
    let notifier = TelegramNotifier::new(config.telegram.clone())
        .context("Failed to create Telegram notifier")?;
    let store = open_store(config.dedupe_backend, &config.dedupe_path)
        .with_context(|| format!("Failed to open dedupe store at {:?}", config.dedupe_path))?;

    let pipeline = Pipeline::new(&source, &notifier, store.as_ref())
        .with_lookback(config.lookback)
        .with_load_policy(config.dedupe_load_policy);

    match args.interval {
        None => run_once(&pipeline, args.strict).await,
        Some(interval) => run_loop(&pipeline, interval, args.metrics_port).await,
    }
}

async fn run_once(pipeline: &Pipeline<'_>, strict: bool) -> Result<()> {
    let report = match pipeline.run_once(Utc::now()).await {
        Ok(report) => report,
        Err(failure) => {
            log_failure(&failure);
            return Err(failure.into());
        }
    };

    log_report(&report);
    check_strict(&report, strict)
}

/// Under `--strict`, a run with undelivered notifications is a failure.
fn check_strict(report: &RunReport, strict: bool) -> Result<()> {
    if strict && !report.all_delivered() {
        anyhow::bail!(
            "{} notification(s) failed: {}",
            report.failed.len(),
            report.failed.join(", ")
        );
    }
    Ok(())
}

async fn run_loop(pipeline: &Pipeline<'_>, interval: Duration, metrics_port: u16) -> Result<()> {
    if metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(metrics_port, handle)
            .await
            .context("Failed to start metrics server")?;
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping after the current run...");
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    tracing::info!(
        interval = %humantime::format_duration(interval),
        "Starting poll loop"
    );

    let mut runs = 0usize;
    let mut failures = 0usize;

    while running.load(Ordering::SeqCst) {
        runs += 1;
        match pipeline.run_once(Utc::now()).await {
            Ok(report) => log_report(&report),
            Err(failure) => {
                failures += 1;
                log_failure(&failure);
            }
        }

        pause(&running, interval).await;
    }

    tracing::info!(runs, failures, "Poll loop stopped");
    Ok(())
}

/// Sleep for `interval`, in short ticks so a shutdown signal is noticed
/// promptly.
async fn pause(running: &AtomicBool, interval: Duration) {
    let deadline = tokio::time::Instant::now() + interval;
    while running.load(Ordering::SeqCst) && tokio::time::Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        tokio::time::sleep(remaining.min(Duration::from_secs(1))).await;
    }
}

fn log_report(report: &RunReport) {
    tracing::info!(
        window_start = %report.window.start_rfc3339(),
        window_end = %report.window.end_rfc3339(),
        known = report.known,
        fetched = report.fetched,
        filtered = report.filtered,
        invalid = report.invalid,
        duplicates = report.duplicates,
        sent = report.sent.len(),
        failed = report.failed.len(),
        "Run complete"
    );
    if !report.failed.is_empty() {
        tracing::warn!(ids = ?report.failed, "Notifications pending retry");
    }
}

fn log_failure(failure: &RunFailure) {
    match failure {
        RunFailure::Aborted(e) => {
            tracing::error!(error = %e, "Run aborted; window will be retried");
        }
        RunFailure::Commit { error, report } => {
            tracing::error!(
                error = %error,
                ids = ?report.sent,
                "Sent alerts were not recorded and may be re-sent next run"
            );
        }
    }
}
