// Operations of the full job store contract this store does not provide.
// Each fails with `JobStoreError::Unsupported` and leaves the store untouched.

use super::ClusteredJobStore;
use crate::errors::JobStoreError;
use crate::models::{Calendar, GroupMatcher, Job, JobKey, Trigger, TriggerKey, TriggerState};

impl ClusteredJobStore {
    pub async fn store_jobs_and_triggers(
        &self,
        _jobs: &[(Job, Vec<Trigger>)],
        _replace: bool,
    ) -> Result<(), JobStoreError> {
        Err(JobStoreError::Unsupported("store_jobs_and_triggers"))
    }

    /// Calendars are stored and handed through opaquely, never read back
    pub async fn retrieve_calendar(&self, _name: &str) -> Result<Option<Calendar>, JobStoreError> {
        Err(JobStoreError::Unsupported("retrieve_calendar"))
    }

    pub async fn get_job_keys(&self, _matcher: &GroupMatcher) -> Result<Vec<JobKey>, JobStoreError> {
        Err(JobStoreError::Unsupported("get_job_keys"))
    }

    pub async fn get_trigger_keys(
        &self,
        _matcher: &GroupMatcher,
    ) -> Result<Vec<TriggerKey>, JobStoreError> {
        Err(JobStoreError::Unsupported("get_trigger_keys"))
    }

    pub async fn get_job_group_names(&self) -> Result<Vec<String>, JobStoreError> {
        Err(JobStoreError::Unsupported("get_job_group_names"))
    }

    pub async fn get_trigger_group_names(&self) -> Result<Vec<String>, JobStoreError> {
        Err(JobStoreError::Unsupported("get_trigger_group_names"))
    }

    pub async fn get_calendar_names(&self) -> Result<Vec<String>, JobStoreError> {
        Err(JobStoreError::Unsupported("get_calendar_names"))
    }

    pub async fn get_trigger_state(&self, _key: &TriggerKey) -> Result<TriggerState, JobStoreError> {
        Err(JobStoreError::Unsupported("get_trigger_state"))
    }

    pub async fn pause_trigger(&self, _key: &TriggerKey) -> Result<(), JobStoreError> {
        Err(JobStoreError::Unsupported("pause_trigger"))
    }

    pub async fn pause_triggers(&self, _matcher: &GroupMatcher) -> Result<Vec<String>, JobStoreError> {
        Err(JobStoreError::Unsupported("pause_triggers"))
    }

    pub async fn pause_job(&self, _key: &JobKey) -> Result<(), JobStoreError> {
        Err(JobStoreError::Unsupported("pause_job"))
    }

    pub async fn pause_jobs(&self, _matcher: &GroupMatcher) -> Result<Vec<String>, JobStoreError> {
        Err(JobStoreError::Unsupported("pause_jobs"))
    }

    pub async fn resume_trigger(&self, _key: &TriggerKey) -> Result<(), JobStoreError> {
        Err(JobStoreError::Unsupported("resume_trigger"))
    }

    pub async fn resume_triggers(&self, _matcher: &GroupMatcher) -> Result<Vec<String>, JobStoreError> {
        Err(JobStoreError::Unsupported("resume_triggers"))
    }

    pub async fn resume_job(&self, _key: &JobKey) -> Result<(), JobStoreError> {
        Err(JobStoreError::Unsupported("resume_job"))
    }

    pub async fn resume_jobs(&self, _matcher: &GroupMatcher) -> Result<Vec<String>, JobStoreError> {
        Err(JobStoreError::Unsupported("resume_jobs"))
    }

    pub async fn get_paused_trigger_groups(&self) -> Result<Vec<String>, JobStoreError> {
        Err(JobStoreError::Unsupported("get_paused_trigger_groups"))
    }

    pub async fn pause_all(&self) -> Result<(), JobStoreError> {
        Err(JobStoreError::Unsupported("pause_all"))
    }

    pub async fn resume_all(&self) -> Result<(), JobStoreError> {
        Err(JobStoreError::Unsupported("resume_all"))
    }
}
