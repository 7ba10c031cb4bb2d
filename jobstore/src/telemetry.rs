// Telemetry module for structured logging and metrics

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging
///
/// `RUST_LOG` takes precedence over `log_level`. JSON output carries the
/// current span, so every store operation's fields (trigger key, instance id)
/// land on the log line.
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level, json, "Structured logging initialized");
    Ok(())
}

/// Install the Prometheus exporter and describe the job store metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "jobstore_triggers_acquired_total",
        "Triggers claimed by this instance"
    );
    describe_counter!(
        "jobstore_lock_contention_total",
        "Lock inserts that collided with another holder"
    );
    describe_counter!(
        "jobstore_stale_locks_reclaimed_total",
        "Expired trigger locks removed"
    );
    describe_counter!(
        "jobstore_acquire_restarts_total",
        "Acquisition passes restarted after contention"
    );
    describe_counter!("jobstore_misfires_total", "Misfire policies applied");
    describe_counter!("jobstore_triggers_fired_total", "Triggers fired");
    describe_counter!(
        "jobstore_jobs_completed_total",
        "Job executions completed, by outcome"
    );
    describe_histogram!(
        "jobstore_job_duration_seconds",
        "Duration of job executions in seconds"
    );

    tracing::info!(metrics_port, "Prometheus metrics exporter initialized");
    Ok(())
}

#[inline]
pub fn record_triggers_acquired(count: usize) {
    counter!("jobstore_triggers_acquired_total").increment(count as u64);
}

#[inline]
pub fn record_lock_contention() {
    counter!("jobstore_lock_contention_total").increment(1);
}

#[inline]
pub fn record_stale_lock_reclaimed() {
    counter!("jobstore_stale_locks_reclaimed_total").increment(1);
}

#[inline]
pub fn record_acquire_restart() {
    counter!("jobstore_acquire_restarts_total").increment(1);
}

#[inline]
pub fn record_misfire() {
    counter!("jobstore_misfires_total").increment(1);
}

#[inline]
pub fn record_trigger_fired() {
    counter!("jobstore_triggers_fired_total").increment(1);
}

/// Record one finished execution; `outcome` is "success" or "failure"
#[inline]
pub fn record_job_completed(job_type: &str, outcome: &'static str, duration_seconds: f64) {
    counter!(
        "jobstore_jobs_completed_total",
        "job_type" => job_type.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "jobstore_job_duration_seconds",
        "job_type" => job_type.to_string()
    )
    .record(duration_seconds);
}
