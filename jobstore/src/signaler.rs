// Callbacks from the store back into the scheduler

use crate::models::{Trigger, TriggerKey};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

/// Notifications the job store emits while it mutates triggers
#[cfg_attr(test, mockall::automock)]
pub trait SchedulerSignaler: Send + Sync {
    /// A trigger missed its fire time; called with the trigger as it was
    /// before the misfire policy was applied
    fn notify_trigger_listeners_misfired(&self, trigger: &Trigger);

    /// A trigger will never fire again
    fn notify_scheduler_listeners_finalized(&self, trigger: &Trigger);

    /// The schedule changed; `None` means "re-evaluate now"
    fn signal_scheduling_change(&self, candidate_new_next_fire_time: Option<DateTime<Utc>>);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerSignal {
    TriggerMisfired(TriggerKey),
    TriggerFinalized(TriggerKey),
    SchedulingChanged(Option<DateTime<Utc>>),
}

/// Signaler that forwards every notification to the scheduler loop over a channel
#[derive(Debug, Clone)]
pub struct ChannelSignaler {
    tx: mpsc::UnboundedSender<SchedulerSignal>,
}

impl ChannelSignaler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SchedulerSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, signal: SchedulerSignal) {
        if let Err(e) = self.tx.send(signal) {
            debug!(signal = ?e.0, "Scheduler signal dropped, no receiver");
        }
    }
}

impl SchedulerSignaler for ChannelSignaler {
    fn notify_trigger_listeners_misfired(&self, trigger: &Trigger) {
        self.send(SchedulerSignal::TriggerMisfired(trigger.key.clone()));
    }

    fn notify_scheduler_listeners_finalized(&self, trigger: &Trigger) {
        self.send(SchedulerSignal::TriggerFinalized(trigger.key.clone()));
    }

    fn signal_scheduling_change(&self, candidate_new_next_fire_time: Option<DateTime<Utc>>) {
        self.send(SchedulerSignal::SchedulingChanged(candidate_new_next_fire_time));
    }
}
