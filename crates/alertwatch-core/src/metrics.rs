//! Prometheus metrics helpers for alertwatch.
//!
//! # Usage
//!
//! ```rust,ignore
//! use alertwatch_core::metrics::{init_metrics, start_metrics_server};
//!
//! let handle = init_metrics();
//! start_metrics_server(9090, handle).await?;
//!
//! metrics::counter!(alertwatch_core::metrics::ALERTS_SENT).increment(1);
//! ```
//!
//! All metric names carry the `alertwatch_` prefix and a unit or `_total`
//! suffix.

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

pub const RUNS: &str = "alertwatch_runs_total";
pub const RUN_FAILURES: &str = "alertwatch_run_failures_total";
pub const ALERTS_FETCHED: &str = "alertwatch_alerts_fetched_total";
pub const ALERTS_FILTERED: &str = "alertwatch_alerts_filtered_total";
pub const ALERTS_INVALID: &str = "alertwatch_alerts_invalid_total";
pub const ALERTS_DUPLICATE: &str = "alertwatch_alerts_duplicate_total";
pub const ALERTS_SENT: &str = "alertwatch_alerts_sent_total";
pub const ALERTS_FAILED: &str = "alertwatch_alerts_failed_total";
pub const LAST_RUN_TIMESTAMP: &str = "alertwatch_last_run_timestamp_seconds";
pub const KNOWN_IDS: &str = "alertwatch_dedupe_known_ids";

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if a recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_metrics();
    Some(handle)
}

/// Serve `/metrics` on the given port from a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    Ok(())
}

fn register_metrics() {
    describe_counter!(RUNS, "Pipeline runs started");
    describe_counter!(
        RUN_FAILURES,
        "Runs that aborted or failed to commit dedupe state"
    );
    describe_counter!(ALERTS_FETCHED, "Raw alert documents read from the source");
    describe_counter!(
        ALERTS_FILTERED,
        "Documents dropped because the alert is not open"
    );
    describe_counter!(
        ALERTS_INVALID,
        "Open alerts skipped because a required field was missing"
    );
    describe_counter!(
        ALERTS_DUPLICATE,
        "Alerts skipped because they were already notified"
    );
    describe_counter!(ALERTS_SENT, "Notifications delivered");
    describe_counter!(ALERTS_FAILED, "Notifications that failed to deliver");
    describe_gauge!(
        LAST_RUN_TIMESTAMP,
        "Unix time of the last run that completed without a run-level failure"
    );
    describe_gauge!(KNOWN_IDS, "Identifiers in the dedupe store at run start");
}
