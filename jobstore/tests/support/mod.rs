// Shared fixtures for job store tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jobstore::cluster::{ClusteredJobStore, JobStoreConfig};
use jobstore::models::{Job, JobKey, RepeatCount, Trigger, TriggerKey};
use jobstore::registry::{JobExecutionContext, JobExecutionError, JobHandler, JobRegistry};
use jobstore::signaler::{ChannelSignaler, SchedulerSignal};
use jobstore::store::InMemoryStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub const NOOP_JOB_TYPE: &str = "noop";

pub struct NoopJob;

#[async_trait]
impl JobHandler for NoopJob {
    async fn execute(&self, _context: &JobExecutionContext) -> Result<(), JobExecutionError> {
        Ok(())
    }
}

/// Counts executions across every handler instance it creates
#[derive(Clone, Default)]
pub struct CountingJob {
    pub runs: Arc<AtomicUsize>,
}

#[async_trait]
impl JobHandler for CountingJob {
    async fn execute(&self, _context: &JobExecutionContext) -> Result<(), JobExecutionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn registry() -> Arc<JobRegistry> {
    let mut registry = JobRegistry::new();
    registry.register(NOOP_JOB_TYPE, || NoopJob);
    Arc::new(registry)
}

/// One cluster node over a shared store
pub struct Node {
    pub job_store: Arc<ClusteredJobStore>,
    pub signals: UnboundedReceiver<SchedulerSignal>,
}

pub fn node(store: Arc<InMemoryStore>, instance_id: &str) -> Node {
    node_with(store, instance_id, registry())
}

pub fn node_with(store: Arc<InMemoryStore>, instance_id: &str, registry: Arc<JobRegistry>) -> Node {
    let (signaler, signals) = ChannelSignaler::new();
    let config = JobStoreConfig {
        instance_id: instance_id.to_string(),
        ..JobStoreConfig::default()
    };
    Node {
        job_store: Arc::new(ClusteredJobStore::new(
            config,
            store,
            Arc::new(signaler),
            registry,
        )),
        signals,
    }
}

pub fn job(name: &str) -> Job {
    Job::new(JobKey::with_default_group(name), NOOP_JOB_TYPE)
}

/// Forever-repeating simple trigger whose next fire time is `next`
pub fn simple_trigger(name: &str, job: &str, next: DateTime<Utc>, interval_secs: i64) -> Trigger {
    Trigger::simple(
        TriggerKey::with_default_group(name),
        JobKey::with_default_group(job),
        next,
        Duration::seconds(interval_secs),
        RepeatCount::Forever,
    )
    .with_next_fire_time(Some(next))
}

pub fn drain(signals: &mut UnboundedReceiver<SchedulerSignal>) -> Vec<SchedulerSignal> {
    let mut received = Vec::new();
    while let Ok(signal) = signals.try_recv() {
        received.push(signal);
    }
    received
}
