// Scheduler binary entry point: one node of a job store cluster

mod jobs;

use anyhow::Context;
use jobstore::bootstrap;
use jobstore::config::Settings;
use jobstore::scheduler::{Scheduler, SchedulerEngine};
use jobstore::signaler::ChannelSignaler;
use jobstore::telemetry;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings.validate().context("Invalid configuration")?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.json_logs,
    )?;

    info!("Starting job store scheduler node");

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    let instance_id = settings.resolved_instance_id();
    info!(
        instance_id = %instance_id,
        backend = ?settings.store.backend,
        table_prefix = %settings.database.table_prefix,
        "Configuration loaded"
    );

    let store = bootstrap::init_persistent_store(&settings).await?;

    let registry = Arc::new(jobs::build_registry());
    info!(job_types = ?registry.job_types(), "Job handlers registered");

    let (signaler, signals) = ChannelSignaler::new();
    let job_store = bootstrap::init_job_store(
        settings.job_store_config(instance_id),
        store,
        Arc::new(signaler),
        registry,
    )
    .await?;

    let scheduler = Arc::new(SchedulerEngine::new(
        settings.scheduler_config(),
        job_store.clone(),
        signals,
    ));
    info!("Scheduler engine created");

    let scheduler_for_shutdown = scheduler.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        if let Err(e) = scheduler_for_shutdown.stop().await {
            error!(error = %e, "Error during scheduler shutdown");
        }
    });

    info!("Starting scheduler polling loop");
    let result = scheduler.start().await;
    job_store.shutdown().await;

    if let Err(e) = result {
        error!(error = %e, "Scheduler error");
        return Err(e.into());
    }

    info!("Scheduler stopped");
    Ok(())
}
