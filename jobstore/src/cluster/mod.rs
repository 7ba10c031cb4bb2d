// Clustered job store coordinator
//
// Several scheduler instances share one persistent store. Each instance claims
// due triggers through the lock table, fires them, and releases the lock when
// the job completes. A lock older than the trigger timeout belongs to an
// instance presumed dead and may be reclaimed by anyone.

mod acquire;
mod firing;
mod unsupported;

use crate::errors::JobStoreError;
use crate::lock::TriggerLockTable;
use crate::models::{Calendar, Job, JobId, JobKey, Trigger, TriggerKey};
use crate::registry::JobRegistry;
use crate::signaler::SchedulerSignaler;
use crate::store::{marshal, JobRecord, PersistentStore, TriggerRecord};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Tunables of one job store instance
#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    /// Identity written into every lock this instance takes
    pub instance_id: String,
    /// How late a trigger may be before its misfire policy applies
    pub misfire_threshold: Duration,
    /// Age after which a lock is considered abandoned
    pub trigger_timeout: Duration,
    /// Acquisition passes allowed before giving up with `Contention`
    pub max_acquire_attempts: u32,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("node-{}", uuid::Uuid::new_v4()),
            misfire_threshold: Duration::seconds(5),
            trigger_timeout: Duration::minutes(10),
            max_acquire_attempts: 16,
        }
    }
}

/// Job store shared by a cluster of scheduler instances
pub struct ClusteredJobStore {
    config: JobStoreConfig,
    store: Arc<dyn PersistentStore>,
    locks: TriggerLockTable,
    signaler: Arc<dyn SchedulerSignaler>,
    registry: Arc<JobRegistry>,
}

impl ClusteredJobStore {
    pub fn new(
        config: JobStoreConfig,
        store: Arc<dyn PersistentStore>,
        signaler: Arc<dyn SchedulerSignaler>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        let locks = TriggerLockTable::new(store.clone(), config.instance_id.clone());
        Self {
            config,
            store,
            locks,
            signaler,
            registry,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn config(&self) -> &JobStoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Prepare the store and drop locks a previous run of this instance left behind
    #[instrument(skip(self), fields(instance_id = %self.config.instance_id))]
    pub async fn initialize(&self) -> Result<(), JobStoreError> {
        self.store.initialize().await?;
        let cleared = self.locks.clear_instance_locks().await?;
        info!(cleared_locks = cleared, "Job store initialized");
        Ok(())
    }

    #[instrument(skip(self), fields(instance_id = %self.config.instance_id))]
    pub async fn shutdown(&self) {
        self.store.close().await;
        info!("Job store shut down");
    }

    pub fn supports_persistence(&self) -> bool {
        true
    }

    pub fn is_clustered(&self) -> bool {
        true
    }

    pub fn estimated_time_to_release_and_acquire_trigger(&self) -> std::time::Duration {
        std::time::Duration::from_millis(200)
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Store a job; with `replace_existing` an existing job keeps its storage
    /// id, has its other fields overwritten and gets the new data map merged
    /// over the stored one
    #[instrument(skip(self, job), fields(job_key = %job.key))]
    pub async fn store_job(&self, job: &Job, replace_existing: bool) -> Result<JobId, JobStoreError> {
        if replace_existing {
            if let Some(existing) = self.store.find_job(&job.key).await? {
                return self.replace_job(job, &existing).await;
            }
        }

        let record = marshal::job_to_record(job, 0)?;
        match self.store.insert_job(&record).await {
            Ok(id) => {
                debug!(job_id = id, "Job stored");
                Ok(id)
            }
            Err(e) if e.is_duplicate_key() && replace_existing => {
                // Lost a race with a concurrent insert of the same key
                let existing = self
                    .store
                    .find_job(&job.key)
                    .await?
                    .ok_or_else(|| JobStoreError::not_found("Job", &job.key))?;
                self.replace_job(job, &existing).await
            }
            Err(e) if e.is_duplicate_key() => Err(JobStoreError::already_exists("Job", &job.key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_job(&self, job: &Job, existing: &JobRecord) -> Result<JobId, JobStoreError> {
        let mut merged = job.clone();
        merged.data = marshal::record_to_job(existing)?.data;
        merged.data.extend(job.data.clone());

        self.store
            .update_job(&marshal::job_to_record(&merged, existing.id)?)
            .await?;
        debug!(job_id = existing.id, "Job replaced");
        Ok(existing.id)
    }

    /// Remove a job and every trigger pointing at it
    #[instrument(skip(self), fields(job_key = %key))]
    pub async fn remove_job(&self, key: &JobKey) -> Result<bool, JobStoreError> {
        match self.store.delete_job(key).await? {
            Some(job_id) => {
                let triggers = self.store.delete_triggers_for_job(job_id).await?;
                info!(job_id, removed_triggers = triggers, "Job removed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// True only if every key named an existing job
    pub async fn remove_jobs(&self, keys: &[JobKey]) -> Result<bool, JobStoreError> {
        let mut all_found = true;
        for key in keys {
            all_found &= self.remove_job(key).await?;
        }
        Ok(all_found)
    }

    /// Load a job and resolve its type against the registry
    #[instrument(skip(self), fields(job_key = %key))]
    pub async fn retrieve_job(&self, key: &JobKey) -> Result<Option<Job>, JobStoreError> {
        let Some(record) = self.store.find_job(key).await? else {
            return Ok(None);
        };

        let job = marshal::record_to_job(&record)?;
        if !self.registry.contains(&job.job_type) {
            warn!(job_type = %job.job_type, "Stored job has no registered handler");
            return Err(JobStoreError::JobTypeNotFound {
                job_type: job.job_type,
                job_key: key.to_string(),
            });
        }
        Ok(Some(job))
    }

    pub async fn check_job_exists(&self, key: &JobKey) -> Result<bool, JobStoreError> {
        Ok(self.store.find_job(key).await?.is_some())
    }

    pub async fn get_number_of_jobs(&self) -> Result<u64, JobStoreError> {
        Ok(self.store.count_jobs().await?)
    }

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    /// Store a trigger for the job its `job_key` names
    pub async fn store_trigger(
        &self,
        trigger: &Trigger,
        replace_existing: bool,
    ) -> Result<(), JobStoreError> {
        let job = self
            .store
            .find_job(&trigger.job_key)
            .await?
            .ok_or_else(|| JobStoreError::not_found("Job", &trigger.job_key))?;
        self.store_trigger_for_job(trigger, job.id, replace_existing)
            .await
    }

    /// Store a trigger linked to the job with storage id `job_id`
    #[instrument(skip(self, trigger), fields(trigger_key = %trigger.key))]
    pub async fn store_trigger_for_job(
        &self,
        trigger: &Trigger,
        job_id: JobId,
        replace_existing: bool,
    ) -> Result<(), JobStoreError> {
        if self.store.find_job_by_id(job_id).await?.is_none() {
            return Err(JobStoreError::not_found("Job", job_id));
        }

        let record = marshal::trigger_to_record(trigger, job_id);
        self.write_trigger(&record, replace_existing).await
    }

    async fn write_trigger(
        &self,
        record: &TriggerRecord,
        replace_existing: bool,
    ) -> Result<(), JobStoreError> {
        match self.store.insert_trigger(record).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_duplicate_key() => {
                if !replace_existing {
                    return Err(JobStoreError::already_exists("Trigger", &record.key));
                }
                if !self.store.update_trigger(record).await? {
                    // Deleted between the failed insert and the update
                    self.store.insert_trigger(record).await?;
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store a new job together with its first trigger
    pub async fn store_job_and_trigger(
        &self,
        job: &Job,
        trigger: &Trigger,
    ) -> Result<JobId, JobStoreError> {
        let job_id = self.store_job(job, false).await?;
        self.store_trigger_for_job(trigger, job_id, false).await?;
        Ok(job_id)
    }

    #[instrument(skip(self), fields(trigger_key = %key))]
    pub async fn remove_trigger(&self, key: &TriggerKey) -> Result<bool, JobStoreError> {
        let removed = self.store.delete_trigger(key).await?;
        if removed {
            debug!("Trigger removed");
        }
        Ok(removed)
    }

    /// True only if every key named an existing trigger
    pub async fn remove_triggers(&self, keys: &[TriggerKey]) -> Result<bool, JobStoreError> {
        let mut all_found = true;
        for key in keys {
            all_found &= self.remove_trigger(key).await?;
        }
        Ok(all_found)
    }

    /// Swap the trigger under `key` for `new_trigger`; false if `key` was not stored
    #[instrument(skip(self, new_trigger), fields(trigger_key = %key, new_trigger_key = %new_trigger.key))]
    pub async fn replace_trigger(
        &self,
        key: &TriggerKey,
        new_trigger: &Trigger,
    ) -> Result<bool, JobStoreError> {
        let Some(existing) = self.store.find_trigger(key).await? else {
            return Ok(false);
        };

        self.store.delete_trigger(key).await?;
        let record = marshal::trigger_to_record(new_trigger, existing.job_id);
        self.write_trigger(&record, false).await?;
        Ok(true)
    }

    pub async fn retrieve_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>, JobStoreError> {
        match self.store.find_trigger(key).await? {
            Some(record) => self.resolve_trigger(record).await,
            None => Ok(None),
        }
    }

    /// Rebuild a stored trigger; `None` if the job it points at is gone
    async fn resolve_trigger(&self, record: TriggerRecord) -> Result<Option<Trigger>, JobStoreError> {
        match self.store.find_job_by_id(record.job_id).await? {
            Some(job) => Ok(Some(marshal::record_to_trigger(&record, job.key)?)),
            None => {
                debug!(trigger_key = %record.key, job_id = record.job_id, "Trigger points at a missing job");
                Ok(None)
            }
        }
    }

    /// Every trigger of a job; empty if the job does not exist
    pub async fn get_triggers_for_job(&self, key: &JobKey) -> Result<Vec<Trigger>, JobStoreError> {
        let Some(job) = self.store.find_job(key).await? else {
            return Ok(Vec::new());
        };

        self.store
            .find_triggers_for_job(job.id)
            .await?
            .iter()
            .map(|record| marshal::record_to_trigger(record, job.key.clone()))
            .collect()
    }

    pub async fn check_trigger_exists(&self, key: &TriggerKey) -> Result<bool, JobStoreError> {
        Ok(self.store.find_trigger(key).await?.is_some())
    }

    pub async fn get_number_of_triggers(&self) -> Result<u64, JobStoreError> {
        Ok(self.store.count_triggers().await?)
    }

    // ------------------------------------------------------------------
    // Calendars
    // ------------------------------------------------------------------

    /// Store a calendar; re-evaluating triggers that use it is not supported
    #[instrument(skip(self, calendar), fields(calendar_name = %name))]
    pub async fn store_calendar(
        &self,
        name: &str,
        calendar: &Calendar,
        replace_existing: bool,
        update_triggers: bool,
    ) -> Result<(), JobStoreError> {
        if update_triggers {
            return Err(JobStoreError::Unsupported("store_calendar with update_triggers"));
        }

        match self.store.insert_calendar(name, calendar).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_duplicate_key() && replace_existing => {
                self.store.update_calendar(name, calendar).await?;
                Ok(())
            }
            Err(e) if e.is_duplicate_key() => Err(JobStoreError::already_exists("Calendar", name)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove_calendar(&self, name: &str) -> Result<bool, JobStoreError> {
        Ok(self.store.delete_calendar(name).await?)
    }

    pub async fn get_number_of_calendars(&self) -> Result<u64, JobStoreError> {
        Ok(self.store.count_calendars().await?)
    }

    /// Calendar handed through to schedule computations during acquisition and firing
    async fn load_calendar(&self, name: &str) -> Result<Option<Calendar>, JobStoreError> {
        Ok(self.store.find_calendar(name).await?)
    }

    /// Remove every job, trigger and calendar
    #[instrument(skip(self))]
    pub async fn clear_all_scheduling_data(&self) -> Result<(), JobStoreError> {
        self.store.clear_scheduling_data().await?;
        warn!("All scheduling data cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
