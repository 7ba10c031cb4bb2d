// Configuration management with layered configuration (defaults, file, env)

use crate::cluster::JobStoreConfig;
use crate::errors::JobStoreError;
use crate::scheduler::SchedulerConfig;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Instance id value that asks for a generated, process-unique id
pub const AUTO_INSTANCE_ID: &str = "AUTO";

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub cluster: ClusterConfig,
    pub job_store: JobStoreSettings,
    pub scheduler: SchedulerSettings,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    /// Prepended to every table name
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
}

fn default_table_prefix() -> String {
    "qrtz_".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Identity of this scheduler instance; `AUTO` generates one
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStoreSettings {
    pub misfire_threshold_ms: u64,
    pub trigger_timeout_ms: u64,
    pub max_acquire_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub poll_interval_ms: u64,
    pub max_batch_size: usize,
    pub batch_time_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default = "default_json_logs")]
    pub json_logs: bool,
    pub metrics_port: Option<u16>,
}

fn default_json_logs() -> bool {
    true
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("JOBSTORE")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), JobStoreError> {
        let invalid = |msg: &str| Err(JobStoreError::Configuration(msg.to_string()));

        if self.store.backend == StoreBackend::Postgres {
            if self.database.url.is_empty() {
                return invalid("Database URL cannot be empty");
            }
            if self.database.max_connections == 0 {
                return invalid("Database max_connections must be greater than 0");
            }
            if self.database.min_connections > self.database.max_connections {
                return invalid("Database min_connections cannot exceed max_connections");
            }
        }

        // The prefix is spliced into SQL identifiers
        if !self
            .database
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return invalid("Database table_prefix may only contain ASCII letters, digits and '_'");
        }

        if self.cluster.instance_id.trim().is_empty() {
            return invalid("Cluster instance_id cannot be empty");
        }

        if self.job_store.trigger_timeout_ms == 0 {
            return invalid("Job store trigger_timeout_ms must be greater than 0");
        }
        if self.job_store.max_acquire_attempts == 0 {
            return invalid("Job store max_acquire_attempts must be greater than 0");
        }

        if self.scheduler.poll_interval_ms == 0 {
            return invalid("Scheduler poll_interval_ms must be greater than 0");
        }
        if self.scheduler.max_batch_size == 0 {
            return invalid("Scheduler max_batch_size must be greater than 0");
        }

        Ok(())
    }

    /// Instance id with `AUTO` resolved to a generated id
    pub fn resolved_instance_id(&self) -> String {
        if self.cluster.instance_id == AUTO_INSTANCE_ID {
            format!("node-{}", uuid::Uuid::new_v4())
        } else {
            self.cluster.instance_id.clone()
        }
    }

    /// Store coordinator settings for the given resolved instance id
    pub fn job_store_config(&self, instance_id: String) -> JobStoreConfig {
        JobStoreConfig {
            instance_id,
            misfire_threshold: chrono::Duration::milliseconds(
                self.job_store.misfire_threshold_ms as i64,
            ),
            trigger_timeout: chrono::Duration::milliseconds(self.job_store.trigger_timeout_ms as i64),
            max_acquire_attempts: self.job_store.max_acquire_attempts,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_ms: self.scheduler.poll_interval_ms,
            max_batch_size: self.scheduler.max_batch_size,
            batch_time_window_ms: self.scheduler.batch_time_window_ms,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/jobstore".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
                table_prefix: default_table_prefix(),
            },
            store: StoreConfig {
                backend: StoreBackend::Postgres,
            },
            cluster: ClusterConfig {
                instance_id: AUTO_INSTANCE_ID.to_string(),
            },
            job_store: JobStoreSettings {
                misfire_threshold_ms: 5_000,
                trigger_timeout_ms: 600_000,
                max_acquire_attempts: 16,
            },
            scheduler: SchedulerSettings {
                poll_interval_ms: 1_000,
                max_batch_size: 10,
                batch_time_window_ms: 0,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
                metrics_port: Some(9090),
            },
        }
    }
}
