// Job type registry: maps a job's `job_type` to the handler that runs it

use crate::errors::JobStoreError;
use crate::models::{Job, JobDataMap, Trigger, TriggerFiredBundle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a job handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobExecutionError {
    #[error("Job execution failed: {0}")]
    Failed(String),

    /// The handler asks for its trigger to be removed
    #[error("Job execution failed, unscheduling trigger: {0}")]
    Unschedule(String),
}

/// Everything a handler sees for one firing
#[derive(Debug, Clone)]
pub struct JobExecutionContext {
    bundle: TriggerFiredBundle,
}

impl JobExecutionContext {
    pub fn new(bundle: TriggerFiredBundle) -> Self {
        Self { bundle }
    }

    pub fn job(&self) -> &Job {
        &self.bundle.job
    }

    pub fn trigger(&self) -> &Trigger {
        &self.bundle.trigger
    }

    pub fn job_data(&self) -> &JobDataMap {
        &self.bundle.job.data
    }

    pub fn fire_time(&self) -> DateTime<Utc> {
        self.bundle.fire_time
    }

    pub fn scheduled_fire_time(&self) -> Option<DateTime<Utc>> {
        self.bundle.scheduled_fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.bundle.previous_fire_time
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.bundle.next_fire_time
    }

    pub fn fire_instance_id(&self) -> Option<&str> {
        self.bundle.trigger.fire_instance_id.as_deref()
    }

    pub fn bundle(&self) -> &TriggerFiredBundle {
        &self.bundle
    }
}

/// Executable body of a job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, context: &JobExecutionContext) -> Result<(), JobExecutionError>;
}

type JobFactory = Arc<dyn Fn() -> Arc<dyn JobHandler> + Send + Sync>;

/// Registered job types, resolved when jobs are loaded from the store
#[derive(Clone, Default)]
pub struct JobRegistry {
    factories: HashMap<String, JobFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory producing a fresh handler per execution
    pub fn register<F, H>(&mut self, job_type: impl Into<String>, factory: F)
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: JobHandler + 'static,
    {
        self.factories.insert(
            job_type.into(),
            Arc::new(move || Arc::new(factory()) as Arc<dyn JobHandler>),
        );
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.contains_key(job_type)
    }

    /// Instantiate the handler for `job`
    pub fn create(&self, job: &Job) -> Result<Arc<dyn JobHandler>, JobStoreError> {
        self.factories
            .get(&job.job_type)
            .map(|factory| factory())
            .ok_or_else(|| JobStoreError::JobTypeNotFound {
                job_type: job.job_type.clone(),
                job_key: job.key.to_string(),
            })
    }

    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
