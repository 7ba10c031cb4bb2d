// Firing acquired triggers and reconciling them after execution

use super::ClusteredJobStore;
use crate::errors::JobStoreError;
use crate::models::{
    Calendar, CompletedExecutionInstruction, Job, Trigger, TriggerFiredBundle, TriggerFiredResult,
};
use crate::schedule::OperableTrigger;
use crate::telemetry;
use chrono::Utc;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

impl ClusteredJobStore {
    /// Turn acquired triggers into execution bundles
    ///
    /// Each trigger is advanced past the fire time being executed and
    /// persisted before its bundle is returned. A trigger whose calendar no
    /// longer exists produces no entry and keeps its lock. A trigger that
    /// cannot be fired, because its job cannot be loaded or its fired state
    /// cannot be stored, yields `TriggerFiredResult::Failed` with its lock
    /// released while the rest of the batch proceeds.
    #[instrument(skip(self, triggers), fields(instance_id = %self.config.instance_id, count = triggers.len()))]
    pub async fn triggers_fired(
        &self,
        triggers: &[Trigger],
    ) -> Result<Vec<TriggerFiredResult>, JobStoreError> {
        let mut results = Vec::with_capacity(triggers.len());

        for trigger in triggers {
            let calendar = match &trigger.calendar_name {
                Some(name) => match self.load_calendar(name).await {
                    Ok(Some(calendar)) => Some(calendar),
                    Ok(None) => {
                        warn!(trigger_key = %trigger.key, calendar = %name, "Calendar not found, skipping trigger");
                        continue;
                    }
                    Err(e) => {
                        results.push(self.fail_fired_trigger(trigger, e).await);
                        continue;
                    }
                },
                None => None,
            };

            let job = match self.job_for_fired_trigger(trigger).await {
                Ok(job) => job,
                Err(e) => {
                    results.push(self.fail_fired_trigger(trigger, e).await);
                    continue;
                }
            };

            if job.concurrent_execution_disallowed {
                self.locks.release(&trigger.key).await?;
                return Err(JobStoreError::Unsupported(
                    "jobs that disallow concurrent execution",
                ));
            }

            match self.fire_trigger(trigger, job, calendar).await {
                Ok(bundle) => results.push(TriggerFiredResult::Fired(Box::new(bundle))),
                Err(e) => results.push(self.fail_fired_trigger(trigger, e).await),
            }
        }

        Ok(results)
    }

    /// Advance a trigger past the fire time being executed and persist it
    async fn fire_trigger(
        &self,
        trigger: &Trigger,
        job: Job,
        calendar: Option<Calendar>,
    ) -> Result<TriggerFiredBundle, JobStoreError> {
        let mut fired = trigger.clone();
        let previous_fire_time = fired.previous_fire_time;
        let scheduled_fire_time = fired.next_fire_time;
        fired.triggered(calendar.as_ref())?;
        fired.fire_instance_id = Some(Uuid::new_v4().to_string());
        self.store_trigger(&fired, true).await?;

        telemetry::record_trigger_fired();
        debug!(
            trigger_key = %fired.key,
            job_key = %job.key,
            scheduled_fire_time = ?scheduled_fire_time,
            next_fire_time = ?fired.next_fire_time,
            "Trigger fired"
        );

        Ok(TriggerFiredBundle {
            job,
            next_fire_time: fired.next_fire_time,
            trigger: fired,
            calendar,
            recovering: false,
            fire_time: Utc::now(),
            scheduled_fire_time,
            previous_fire_time,
        })
    }

    async fn job_for_fired_trigger(&self, trigger: &Trigger) -> Result<Job, JobStoreError> {
        match self.retrieve_job(&trigger.job_key).await? {
            Some(job) => Ok(job),
            None => Err(JobStoreError::not_found("Job", &trigger.job_key)),
        }
    }

    /// Release a trigger that could not be fired and report it as failed
    async fn fail_fired_trigger(
        &self,
        trigger: &Trigger,
        error: JobStoreError,
    ) -> TriggerFiredResult {
        warn!(trigger_key = %trigger.key, job_key = %trigger.job_key, error = %error, "Could not fire trigger");
        if let Err(release_err) = self.locks.release(&trigger.key).await {
            error!(trigger_key = %trigger.key, error = %release_err, "Failed to release trigger lock");
        }
        TriggerFiredResult::Failed {
            trigger_key: trigger.key.clone(),
            error,
        }
    }

    /// Reconcile a trigger after its job ran, then release the trigger lock
    ///
    /// The lock is released even when the trigger cannot be read back.
    #[instrument(skip(self, trigger, job), fields(instance_id = %self.config.instance_id, trigger_key = %trigger.key, job_key = %job.key))]
    pub async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job: &Job,
        instruction: CompletedExecutionInstruction,
    ) -> Result<(), JobStoreError> {
        debug!(%instruction, "Trigger completed");

        if let Err(e) = self.reconcile_completed_trigger(trigger, instruction).await {
            error!(error = %e, "Failed to reconcile trigger after job completion");
        }

        self.locks.release(&trigger.key).await?;
        Ok(())
    }

    async fn reconcile_completed_trigger(
        &self,
        trigger: &Trigger,
        instruction: CompletedExecutionInstruction,
    ) -> Result<(), JobStoreError> {
        let Some(current) = self.retrieve_trigger(&trigger.key).await? else {
            debug!("Trigger was removed during execution");
            return Ok(());
        };

        match instruction {
            CompletedExecutionInstruction::DeleteTrigger => {
                if trigger.next_fire_time.is_some() {
                    self.remove_trigger(&trigger.key).await?;
                    self.signaler.signal_scheduling_change(None);
                } else if current.next_fire_time.is_none() {
                    self.remove_trigger(&trigger.key).await?;
                } else {
                    debug!("Deleting trigger skipped, it was rescheduled during execution");
                }
            }
            CompletedExecutionInstruction::SetTriggerComplete
            | CompletedExecutionInstruction::SetTriggerError
            | CompletedExecutionInstruction::SetAllJobTriggersComplete
            | CompletedExecutionInstruction::SetAllJobTriggersError => {
                self.signaler.signal_scheduling_change(None);
            }
            CompletedExecutionInstruction::Noop | CompletedExecutionInstruction::ReExecuteJob => {}
        }

        Ok(())
    }

    /// Give back a trigger acquired by this instance without firing it
    #[instrument(skip(self, trigger), fields(instance_id = %self.config.instance_id, trigger_key = %trigger.key))]
    pub async fn release_acquired_trigger(&self, trigger: &Trigger) -> Result<(), JobStoreError> {
        self.locks.release(&trigger.key).await?;
        Ok(())
    }
}
