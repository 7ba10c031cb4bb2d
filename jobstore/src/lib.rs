// Clustered persistent job store for cron-style schedulers
//
// Scheduler instances share one database and coordinate exclusively through
// uniqueness-constrained lock rows: no external lock service is involved.

pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod db;
pub mod errors;
pub mod lock;
pub mod models;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod signaler;
pub mod store;
pub mod telemetry;

pub use cluster::{ClusteredJobStore, JobStoreConfig};
pub use errors::{DatabaseError, JobStoreError, ScheduleError};
