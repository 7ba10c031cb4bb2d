// Scheduler engine: the node loop driving acquire → fire → execute → complete

use crate::cluster::ClusteredJobStore;
use crate::errors::JobStoreError;
use crate::models::{
    CompletedExecutionInstruction, Trigger, TriggerFiredBundle, TriggerFiredResult, TriggerKey,
};
use crate::registry::{JobExecutionContext, JobExecutionError};
use crate::schedule::OperableTrigger;
use crate::signaler::SchedulerSignal;
use crate::telemetry;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the scheduler node loop
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often to poll for due triggers (in milliseconds)
    pub poll_interval_ms: u64,
    /// Maximum number of triggers acquired per poll
    pub max_batch_size: usize,
    /// Passed through to acquisition
    pub batch_time_window_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_batch_size: 10,
            batch_time_window_ms: 0,
        }
    }
}

/// Scheduler trait for node loop operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run the polling loop until `stop` is called
    async fn start(&self) -> Result<(), JobStoreError>;

    /// Stop the loop; a poll already running finishes first
    async fn stop(&self) -> Result<(), JobStoreError>;

    /// Acquire, fire and execute every trigger due now; returns how many jobs ran
    async fn process_due_triggers(&self) -> Result<usize, JobStoreError>;
}

/// Node loop over a clustered job store
pub struct SchedulerEngine {
    config: SchedulerConfig,
    job_store: Arc<ClusteredJobStore>,
    signals: Mutex<mpsc::UnboundedReceiver<SchedulerSignal>>,
    shutdown_tx: broadcast::Sender<()>,
    // Subscribed at construction so a stop issued before start is not lost
    shutdown_rx: Mutex<broadcast::Receiver<()>>,
}

impl SchedulerEngine {
    pub fn new(
        config: SchedulerConfig,
        job_store: Arc<ClusteredJobStore>,
        signals: mpsc::UnboundedReceiver<SchedulerSignal>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Self {
            config,
            job_store,
            signals: Mutex::new(signals),
            shutdown_tx,
            shutdown_rx: Mutex::new(shutdown_rx),
        }
    }

    /// Execute one fired bundle and report its outcome back to the store
    #[instrument(skip(self, bundle), fields(trigger_key = %bundle.trigger.key, job_key = %bundle.job.key))]
    async fn run_job(&self, bundle: TriggerFiredBundle) -> bool {
        let context = JobExecutionContext::new(bundle);
        let job_type = context.job().job_type.clone();

        let started = Instant::now();
        let (instruction, succeeded) = match self.job_store.registry().create(context.job()) {
            Ok(handler) => match handler.execute(&context).await {
                Ok(()) => {
                    debug!("Job executed");
                    (context.trigger().execution_complete(), true)
                }
                Err(JobExecutionError::Unschedule(reason)) => {
                    warn!(%reason, "Job failed and asked for its trigger to be removed");
                    (CompletedExecutionInstruction::DeleteTrigger, false)
                }
                Err(e @ JobExecutionError::Failed(_)) => {
                    warn!(error = %e, "Job execution failed");
                    (CompletedExecutionInstruction::SetTriggerError, false)
                }
            },
            Err(e) => {
                error!(error = %e, "No handler for fired job");
                (CompletedExecutionInstruction::SetAllJobTriggersError, false)
            }
        };

        telemetry::record_job_completed(
            &job_type,
            if succeeded { "success" } else { "failure" },
            started.elapsed().as_secs_f64(),
        );

        if let Err(e) = self
            .job_store
            .triggered_job_complete(context.trigger(), context.job(), instruction)
            .await
        {
            error!(error = %e, "Failed to complete fired trigger");
        }

        succeeded
    }

    async fn release_all(&self, triggers: &[Trigger]) {
        for trigger in triggers {
            if let Err(e) = self.job_store.release_acquired_trigger(trigger).await {
                error!(trigger_key = %trigger.key, error = %e, "Failed to release acquired trigger");
            }
        }
    }

    async fn handle_signal(&self, signal: SchedulerSignal) {
        match signal {
            SchedulerSignal::SchedulingChanged(_) => {
                debug!("Scheduling changed, polling early");
                if let Err(e) = self.process_due_triggers().await {
                    error!(error = %e, "Error processing due triggers");
                }
            }
            SchedulerSignal::TriggerMisfired(key) => {
                info!(trigger_key = %key, "Trigger misfired");
            }
            SchedulerSignal::TriggerFinalized(key) => {
                info!(trigger_key = %key, "Trigger finalized");
            }
        }
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self), fields(instance_id = %self.job_store.instance_id()))]
    async fn start(&self) -> Result<(), JobStoreError> {
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_batch_size = self.config.max_batch_size,
            "Starting scheduler engine"
        );

        let mut poll_interval = interval(Duration::from_millis(self.config.poll_interval_ms));
        let mut shutdown_rx = self.shutdown_rx.lock().await;
        let mut signals = self.signals.lock().await;

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    match self.process_due_triggers().await {
                        Ok(count) if count > 0 => info!(jobs_executed = count, "Processed due triggers"),
                        Ok(_) => debug!("No triggers due"),
                        Err(JobStoreError::Contention { attempts }) => {
                            warn!(attempts, "Trigger acquisition contended, retrying next poll");
                        }
                        Err(e) => error!(error = %e, "Error processing due triggers"),
                    }
                }
                Some(signal) = signals.recv() => {
                    self.handle_signal(signal).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Scheduler engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), JobStoreError> {
        info!("Stopping scheduler engine");
        let _ = self.shutdown_tx.send(());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn process_due_triggers(&self) -> Result<usize, JobStoreError> {
        let time_window = chrono::Duration::milliseconds(self.config.batch_time_window_ms as i64);
        let now = Utc::now();
        let acquired = self
            .job_store
            .acquire_next_triggers(now, self.config.max_batch_size, time_window)
            .await?;

        // A misfire policy may have moved a trigger past this poll; it is
        // picked up again once actually due
        let (triggers, early): (Vec<_>, Vec<_>) = acquired
            .into_iter()
            .partition(|t| t.next_fire_time.is_some_and(|next| next <= now + time_window));
        if !early.is_empty() {
            debug!(count = early.len(), "Releasing triggers rescheduled into the future");
            self.release_all(&early).await;
        }
        if triggers.is_empty() {
            return Ok(0);
        }

        let results = match self.job_store.triggers_fired(&triggers).await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "Failed to fire acquired triggers");
                self.release_all(&triggers).await;
                return Err(e);
            }
        };

        let mut reported: HashSet<TriggerKey> = HashSet::new();
        let mut bundles = Vec::new();
        for result in results {
            match result {
                TriggerFiredResult::Fired(bundle) => {
                    reported.insert(bundle.trigger.key.clone());
                    bundles.push(*bundle);
                }
                TriggerFiredResult::Failed { trigger_key, error } => {
                    warn!(trigger_key = %trigger_key, error = %error, "Trigger could not be fired");
                    reported.insert(trigger_key);
                }
            }
        }

        // Triggers skipped without a result still hold our lock
        let skipped: Vec<_> = triggers
            .into_iter()
            .filter(|t| !reported.contains(&t.key))
            .collect();
        self.release_all(&skipped).await;

        let executed = bundles.len();
        futures::future::join_all(bundles.into_iter().map(|bundle| self.run_job(bundle))).await;
        Ok(executed)
    }
}
