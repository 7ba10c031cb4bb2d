// Trigger acquisition and misfire handling

use super::ClusteredJobStore;
use crate::errors::JobStoreError;
use crate::lock::LockAttempt;
use crate::models::{MisfireInstruction, Trigger};
use crate::schedule::OperableTrigger;
use crate::telemetry;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, warn};

enum AcquirePass {
    Complete(Vec<Trigger>),
    /// Contention forced a fresh query; locks taken in the pass were released
    Restart,
}

impl ClusteredJobStore {
    /// Claim up to `max_count` triggers due no later than `no_later_than`
    ///
    /// Candidates are visited in next-fire-time order. Misfired candidates have
    /// their policy applied first. Triggers locked by a live instance are
    /// skipped; finding an expired lock removes it and restarts the whole pass.
    /// `time_window` is accepted for interface compatibility and not used.
    #[instrument(skip(self), fields(instance_id = %self.config.instance_id))]
    pub async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> Result<Vec<Trigger>, JobStoreError> {
        let max_attempts = self.config.max_acquire_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.acquire_pass(no_later_than, max_count).await? {
                AcquirePass::Complete(triggers) => {
                    if !triggers.is_empty() {
                        telemetry::record_triggers_acquired(triggers.len());
                        debug!(acquired = triggers.len(), attempt, "Triggers acquired");
                    }
                    return Ok(triggers);
                }
                AcquirePass::Restart => {
                    telemetry::record_acquire_restart();
                    debug!(attempt, "Restarting trigger acquisition");
                }
            }
        }

        warn!(attempts = max_attempts, "Giving up trigger acquisition under lock contention");
        Err(JobStoreError::Contention {
            attempts: max_attempts,
        })
    }

    async fn acquire_pass(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
    ) -> Result<AcquirePass, JobStoreError> {
        let candidates = self.store.find_triggers_due(no_later_than).await?;
        debug!(candidates = candidates.len(), "Found triggers eligible to run");

        let mut acquired: Vec<Trigger> = Vec::new();
        for record in candidates {
            if acquired.len() >= max_count {
                break;
            }

            let key = record.key.clone();
            let mut trigger = match self.resolve_trigger(record).await {
                Ok(Some(trigger)) => trigger,
                Ok(None) => continue,
                Err(e @ JobStoreError::TypeResolution { .. }) => {
                    error!(trigger_key = %key, error = %e, "Skipping unreadable trigger");
                    continue;
                }
                Err(e) => {
                    self.release_pass(&acquired).await;
                    return Err(e);
                }
            };

            if trigger.next_fire_time.is_none() {
                continue;
            }

            let now = Utc::now();
            match self.apply_misfire(&mut trigger, now).await {
                Ok(true) if trigger.next_fire_time.is_none() => {
                    debug!(trigger_key = %key, "Trigger has no further fire time after misfire");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    self.release_pass(&acquired).await;
                    return Err(e);
                }
            }

            let attempt = match self.locks.try_acquire(&trigger.key, now).await {
                Ok(attempt) => attempt,
                Err(e) => {
                    self.release_pass(&acquired).await;
                    return Err(e.into());
                }
            };

            match attempt {
                LockAttempt::Acquired => {
                    debug!(trigger_key = %key, "Trigger acquired");
                    acquired.push(trigger);
                }
                LockAttempt::Vanished => {
                    self.release_pass(&acquired).await;
                    return Ok(AcquirePass::Restart);
                }
                LockAttempt::HeldBy(existing) => {
                    telemetry::record_lock_contention();
                    if !existing.is_expired(now, self.config.trigger_timeout) {
                        debug!(trigger_key = %key, holder = %existing.instance_id, "Trigger locked by another instance");
                        continue;
                    }

                    warn!(
                        trigger_key = %key,
                        holder = %existing.instance_id,
                        acquired_at = %existing.acquired_at,
                        "Trigger lock expired, removing it and retrying acquisition"
                    );
                    let reclaimed = self.locks.reclaim_stale(&existing).await;
                    self.release_pass(&acquired).await;
                    if reclaimed? {
                        telemetry::record_stale_lock_reclaimed();
                    }
                    return Ok(AcquirePass::Restart);
                }
            }
        }

        Ok(AcquirePass::Complete(acquired))
    }

    /// Release locks taken earlier in an abandoned pass
    async fn release_pass(&self, acquired: &[Trigger]) {
        for trigger in acquired {
            if let Err(e) = self.locks.release(&trigger.key).await {
                error!(trigger_key = %trigger.key, error = %e, "Failed to release trigger lock");
            }
        }
    }

    /// Apply the trigger's misfire policy if it is overdue at `now`
    ///
    /// Returns true when the trigger was rescheduled and persisted. Nothing is
    /// written when it is on time, ignores misfires, or the policy leaves the
    /// next fire time unchanged.
    pub(crate) async fn apply_misfire(
        &self,
        trigger: &mut Trigger,
        now: DateTime<Utc>,
    ) -> Result<bool, JobStoreError> {
        let misfire_time = if self.config.misfire_threshold > Duration::zero() {
            now - self.config.misfire_threshold
        } else {
            now
        };

        let Some(original_next) = trigger.next_fire_time else {
            return Ok(false);
        };
        if original_next > misfire_time
            || trigger.misfire_instruction == MisfireInstruction::IgnoreMisfirePolicy
        {
            return Ok(false);
        }

        let calendar = match &trigger.calendar_name {
            Some(name) => self.load_calendar(name).await?,
            None => None,
        };

        self.signaler.notify_trigger_listeners_misfired(trigger);
        trigger.update_after_misfire(calendar.as_ref(), now)?;

        match trigger.next_fire_time {
            None => self.signaler.notify_scheduler_listeners_finalized(trigger),
            Some(next) if next == original_next => return Ok(false),
            Some(_) => {}
        }

        self.store_trigger(trigger, true).await?;
        telemetry::record_misfire();
        info!(
            trigger_key = %trigger.key,
            missed_fire_time = %original_next,
            next_fire_time = ?trigger.next_fire_time,
            "Applied misfire policy"
        );
        Ok(true)
    }
}
