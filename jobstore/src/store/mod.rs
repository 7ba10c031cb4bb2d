// Persistent store abstraction for jobs, triggers, calendars and trigger locks
//
// Every operation is a single atomic record operation. Uniqueness of the
// natural keys is enforced by the backend and reported as
// `DatabaseError::DuplicateKey`, which is what makes `insert_lock` usable as
// a cluster-wide test-and-set.

pub mod marshal;
pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use crate::errors::DatabaseError;
use crate::models::{Calendar, JobId, JobKey, TriggerKey, TriggerLock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Job row as persisted
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    /// Storage identity; ignored on insert
    pub id: JobId,
    pub key: JobKey,
    pub description: Option<String>,
    pub job_type: String,
    pub job_data: serde_json::Value,
    pub concurrent_execution_disallowed: bool,
}

/// Trigger row as persisted: common columns plus the columns of every
/// schedule variant, selected by `trigger_type`
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRecord {
    pub key: TriggerKey,
    pub job_id: JobId,
    pub trigger_type: String,
    pub description: Option<String>,
    pub calendar_name: Option<String>,
    pub priority: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub final_fire_time: Option<DateTime<Utc>>,
    pub misfire_instruction: String,
    pub fire_instance_id: Option<String>,
    pub repeat_count: Option<i32>,
    pub repeat_interval_ms: Option<i64>,
    pub times_triggered: Option<i32>,
    pub cron_expression: Option<String>,
    pub time_zone: Option<String>,
}

/// Durable, indexed storage shared by every scheduler instance in a cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Create the collections and their uniqueness constraints if missing
    async fn initialize(&self) -> Result<(), DatabaseError>;

    /// Release backend resources
    async fn close(&self);

    /// Insert a job; `DuplicateKey` if its key exists. Returns the new id.
    async fn insert_job(&self, job: &JobRecord) -> Result<JobId, DatabaseError>;

    /// Overwrite the job with the same key in place, keeping its id
    async fn update_job(&self, job: &JobRecord) -> Result<bool, DatabaseError>;

    async fn find_job(&self, key: &JobKey) -> Result<Option<JobRecord>, DatabaseError>;

    async fn find_job_by_id(&self, id: JobId) -> Result<Option<JobRecord>, DatabaseError>;

    /// Delete a job by key, returning the id it had
    async fn delete_job(&self, key: &JobKey) -> Result<Option<JobId>, DatabaseError>;

    async fn count_jobs(&self) -> Result<u64, DatabaseError>;

    /// Insert a trigger; `DuplicateKey` if its key exists
    async fn insert_trigger(&self, trigger: &TriggerRecord) -> Result<(), DatabaseError>;

    /// Overwrite the trigger with the same key
    async fn update_trigger(&self, trigger: &TriggerRecord) -> Result<bool, DatabaseError>;

    async fn find_trigger(&self, key: &TriggerKey) -> Result<Option<TriggerRecord>, DatabaseError>;

    async fn find_triggers_for_job(&self, job_id: JobId) -> Result<Vec<TriggerRecord>, DatabaseError>;

    /// Triggers with `next_fire_time <= no_later_than`, ascending by next
    /// fire time, ties in storage order
    async fn find_triggers_due(
        &self,
        no_later_than: DateTime<Utc>,
    ) -> Result<Vec<TriggerRecord>, DatabaseError>;

    async fn delete_trigger(&self, key: &TriggerKey) -> Result<bool, DatabaseError>;

    async fn delete_triggers_for_job(&self, job_id: JobId) -> Result<u64, DatabaseError>;

    async fn count_triggers(&self) -> Result<u64, DatabaseError>;

    /// Insert a calendar; `DuplicateKey` if the name exists
    async fn insert_calendar(&self, name: &str, calendar: &Calendar) -> Result<(), DatabaseError>;

    async fn update_calendar(&self, name: &str, calendar: &Calendar) -> Result<bool, DatabaseError>;

    async fn find_calendar(&self, name: &str) -> Result<Option<Calendar>, DatabaseError>;

    async fn delete_calendar(&self, name: &str) -> Result<bool, DatabaseError>;

    async fn count_calendars(&self) -> Result<u64, DatabaseError>;

    /// Insert-or-fail: `DuplicateKey` if any lock exists for the trigger
    async fn insert_lock(&self, lock: &TriggerLock) -> Result<(), DatabaseError>;

    async fn find_lock(&self, key: &TriggerKey) -> Result<Option<TriggerLock>, DatabaseError>;

    /// Delete the lock for `key` only if `instance_id` holds it
    async fn delete_lock(&self, key: &TriggerKey, instance_id: &str) -> Result<bool, DatabaseError>;

    /// Delete exactly this lock (same holder and acquisition time); a lock
    /// re-acquired in the meantime is left alone
    async fn delete_lock_if_unchanged(&self, lock: &TriggerLock) -> Result<bool, DatabaseError>;

    async fn delete_locks_for_instance(&self, instance_id: &str) -> Result<u64, DatabaseError>;

    /// Remove every job, trigger and calendar (locks are left to their holders)
    async fn clear_scheduling_data(&self) -> Result<(), DatabaseError>;
}
