// Bootstrap utilities for binary initialization

use crate::cluster::{ClusteredJobStore, JobStoreConfig};
use crate::config::{Settings, StoreBackend};
use crate::db::DbPool;
use crate::registry::JobRegistry;
use crate::signaler::SchedulerSignaler;
use crate::store::{InMemoryStore, PersistentStore, PostgresStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Initialize database pool
///
/// # Errors
/// Returns error if database pool initialization fails
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;

    let latency = db_pool
        .health_check()
        .await
        .context("Database health check failed")?;

    info!(
        latency_ms = latency.as_millis() as u64,
        "Database pool initialized"
    );
    Ok(db_pool)
}

/// Initialize the persistent store backend selected in `settings`
#[tracing::instrument(skip(settings), fields(backend = ?settings.store.backend))]
pub async fn init_persistent_store(settings: &Settings) -> Result<Arc<dyn PersistentStore>> {
    let store: Arc<dyn PersistentStore> = match settings.store.backend {
        StoreBackend::Postgres => {
            let db_pool = init_database_pool(settings).await?;
            Arc::new(
                PostgresStore::new(db_pool, &settings.database.table_prefix)
                    .context("Failed to create PostgreSQL store")?,
            )
        }
        StoreBackend::Memory => Arc::new(InMemoryStore::new()),
    };

    info!("Persistent store initialized");
    Ok(store)
}

/// Build and initialize the clustered job store
///
/// Creates the schema if needed and clears locks this instance id left behind.
#[tracing::instrument(skip_all, fields(instance_id = %config.instance_id))]
pub async fn init_job_store(
    config: JobStoreConfig,
    store: Arc<dyn PersistentStore>,
    signaler: Arc<dyn SchedulerSignaler>,
    registry: Arc<JobRegistry>,
) -> Result<Arc<ClusteredJobStore>> {
    let job_store = ClusteredJobStore::new(config, store, signaler, registry);
    job_store
        .initialize()
        .await
        .context("Failed to initialize job store")?;

    Ok(Arc::new(job_store))
}
