// Schedule calculation for simple (fixed-interval) and cron triggers
//
// Pure functions over trigger state: first fire time, fire time after an
// instant, the "triggered" transition, misfire recomputation and final fire
// time. No I/O happens here; the caller supplies the current instant where
// one is needed.

use crate::errors::ScheduleError;
use crate::models::{
    Calendar, CompletedExecutionInstruction, MisfireInstruction, RepeatCount, Trigger,
    TriggerSchedule,
};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// Schedule state transitions for a stored trigger.
///
/// Calendars are accepted so callers can pass through whatever exclusion
/// calendar the trigger names, but their rules are not evaluated.
pub trait OperableTrigger {
    /// Reject schedules that can never produce a sensible fire time
    fn validate(&self) -> Result<(), ScheduleError>;

    /// Set and return the first fire time, computed from the start time
    fn compute_first_fire_time(
        &mut self,
        calendar: Option<&Calendar>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError>;

    /// The first fire time strictly after `after`, honoring start/end bounds
    fn fire_time_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError>;

    /// Advance the schedule past the fire time that is being executed now
    fn triggered(&mut self, calendar: Option<&Calendar>) -> Result<(), ScheduleError>;

    /// Recompute the next fire time of a misfired trigger per its instruction
    fn update_after_misfire(
        &mut self,
        calendar: Option<&Calendar>,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError>;

    /// The last time this trigger will ever fire, if bounded
    fn compute_final_fire_time(&self) -> Result<Option<DateTime<Utc>>, ScheduleError>;

    /// Instruction to hand back after a successful execution
    fn execution_complete(&self) -> CompletedExecutionInstruction;
}

impl OperableTrigger for Trigger {
    fn validate(&self) -> Result<(), ScheduleError> {
        match &self.schedule {
            TriggerSchedule::Simple {
                repeat_count,
                repeat_interval,
                ..
            } => {
                if *repeat_count != RepeatCount::Times(0) && *repeat_interval <= Duration::zero() {
                    return Err(ScheduleError::InvalidConfiguration(format!(
                        "Repeat interval must be positive for repeating trigger {}",
                        self.key
                    )));
                }
            }
            TriggerSchedule::Cron { expression, .. } => {
                parse_cron_expression(expression)?;
            }
        }

        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(ScheduleError::InvalidConfiguration(format!(
                    "End time cannot be before start time for trigger {}",
                    self.key
                )));
            }
        }

        Ok(())
    }

    fn compute_first_fire_time(
        &mut self,
        _calendar: Option<&Calendar>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        self.validate()?;

        let first = match &self.schedule {
            TriggerSchedule::Simple { .. } => Some(self.start_time),
            TriggerSchedule::Cron { .. } => {
                self.fire_time_after(self.start_time - Duration::seconds(1))?
            }
        };

        self.next_fire_time = first;
        self.final_fire_time = self.compute_final_fire_time()?;
        Ok(first)
    }

    fn fire_time_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match &self.schedule {
            TriggerSchedule::Simple {
                repeat_count,
                repeat_interval,
                times_triggered,
            } => Ok(simple_fire_time_after(
                self.start_time,
                self.end_time,
                *repeat_count,
                *repeat_interval,
                *times_triggered,
                after,
            )),
            TriggerSchedule::Cron {
                expression,
                timezone,
            } => cron_fire_time_after(
                expression,
                *timezone,
                self.start_time,
                self.end_time,
                after,
            ),
        }
    }

    fn triggered(&mut self, _calendar: Option<&Calendar>) -> Result<(), ScheduleError> {
        let Some(fired_at) = self.next_fire_time else {
            return Ok(());
        };

        if let TriggerSchedule::Simple {
            times_triggered, ..
        } = &mut self.schedule
        {
            *times_triggered = times_triggered.saturating_add(1);
        }

        self.previous_fire_time = Some(fired_at);
        self.next_fire_time = self.fire_time_after(fired_at)?;
        Ok(())
    }

    fn update_after_misfire(
        &mut self,
        _calendar: Option<&Calendar>,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        let instruction = resolve_misfire_instruction(self);
        let previous_next = self.next_fire_time;

        match instruction {
            MisfireInstruction::IgnoreMisfirePolicy => {}
            MisfireInstruction::FireNow => {
                self.next_fire_time = Some(now);
            }
            MisfireInstruction::DoNothing | MisfireInstruction::RescheduleNextWithExistingCount => {
                self.next_fire_time = self.fire_time_after(now)?;
            }
            MisfireInstruction::RescheduleNextWithRemainingCount => {
                let new_fire_time = self.fire_time_after(now)?;
                if let (Some(old), Some(new)) = (previous_next, new_fire_time) {
                    let missed = self.times_fired_between(old, new);
                    if let TriggerSchedule::Simple {
                        times_triggered, ..
                    } = &mut self.schedule
                    {
                        *times_triggered = times_triggered.saturating_add(missed);
                    }
                }
                self.next_fire_time = new_fire_time;
            }
            MisfireInstruction::RescheduleNowWithExistingRepeatCount => {
                if let TriggerSchedule::Simple {
                    repeat_count: RepeatCount::Times(count),
                    times_triggered,
                    ..
                } = &mut self.schedule
                {
                    if *count != 0 {
                        *count = count.saturating_sub(*times_triggered);
                        *times_triggered = 0;
                    }
                }
                self.reschedule_now(now);
            }
            MisfireInstruction::RescheduleNowWithRemainingRepeatCount => {
                let missed = previous_next
                    .map(|old| self.times_fired_between(old, now))
                    .unwrap_or(0);
                if let TriggerSchedule::Simple {
                    repeat_count: RepeatCount::Times(count),
                    times_triggered,
                    ..
                } = &mut self.schedule
                {
                    if *count != 0 {
                        *count = count.saturating_sub(times_triggered.saturating_add(missed));
                        *times_triggered = 0;
                    }
                }
                self.reschedule_now(now);
            }
            // resolve_misfire_instruction never yields Smart
            MisfireInstruction::Smart => {}
        }

        Ok(())
    }

    fn compute_final_fire_time(&self) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match &self.schedule {
            TriggerSchedule::Simple {
                repeat_count,
                repeat_interval,
                ..
            } => {
                let fire_time_before = |end: DateTime<Utc>| {
                    if end < self.start_time {
                        return None;
                    }
                    let fired = count_intervals(self.start_time, end, *repeat_interval);
                    Some(self.start_time + *repeat_interval * fired as i32)
                };

                Ok(match repeat_count {
                    RepeatCount::Times(0) => Some(self.start_time),
                    RepeatCount::Forever => self.end_time.and_then(fire_time_before),
                    RepeatCount::Times(n) => {
                        let last = self.start_time + *repeat_interval * (*n).min(i32::MAX as u32) as i32;
                        match self.end_time {
                            Some(end) if end < last => fire_time_before(end),
                            _ => Some(last),
                        }
                    }
                })
            }
            // Walking a cron expression backwards is not supported by the
            // expression engine; cron triggers report no final fire time.
            TriggerSchedule::Cron { .. } => Ok(None),
        }
    }

    fn execution_complete(&self) -> CompletedExecutionInstruction {
        if self.next_fire_time.is_none() {
            CompletedExecutionInstruction::DeleteTrigger
        } else {
            CompletedExecutionInstruction::Noop
        }
    }
}

impl Trigger {
    fn reschedule_now(&mut self, now: DateTime<Utc>) {
        match self.end_time {
            Some(end) if end < now => self.next_fire_time = None,
            _ => {
                self.start_time = now;
                self.next_fire_time = Some(now);
            }
        }
    }

    fn times_fired_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
        match &self.schedule {
            TriggerSchedule::Simple {
                repeat_interval, ..
            } => count_intervals(start, end, *repeat_interval),
            TriggerSchedule::Cron { .. } => 0,
        }
    }
}

/// Map `Smart` and instructions that make no sense for the schedule variant
/// onto a concrete instruction
fn resolve_misfire_instruction(trigger: &Trigger) -> MisfireInstruction {
    let instruction = trigger.misfire_instruction;
    match &trigger.schedule {
        TriggerSchedule::Simple { repeat_count, .. } => match instruction {
            MisfireInstruction::Smart | MisfireInstruction::DoNothing => match repeat_count {
                RepeatCount::Times(0) => MisfireInstruction::FireNow,
                RepeatCount::Forever => MisfireInstruction::RescheduleNextWithRemainingCount,
                RepeatCount::Times(_) => MisfireInstruction::RescheduleNowWithExistingRepeatCount,
            },
            MisfireInstruction::FireNow if *repeat_count != RepeatCount::Times(0) => {
                MisfireInstruction::RescheduleNowWithRemainingRepeatCount
            }
            other => other,
        },
        TriggerSchedule::Cron { .. } => match instruction {
            MisfireInstruction::IgnoreMisfirePolicy => MisfireInstruction::IgnoreMisfirePolicy,
            MisfireInstruction::DoNothing => MisfireInstruction::DoNothing,
            _ => MisfireInstruction::FireNow,
        },
    }
}

/// Whole intervals between two instants; zero for non-positive intervals
fn count_intervals(start: DateTime<Utc>, end: DateTime<Utc>, interval: Duration) -> u32 {
    let interval_ms = interval.num_milliseconds();
    if interval_ms < 1 || end <= start {
        return 0;
    }
    let elapsed_ms = end.signed_duration_since(start).num_milliseconds();
    (elapsed_ms / interval_ms).min(u32::MAX as i64) as u32
}

fn simple_fire_time_after(
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    repeat_count: RepeatCount,
    repeat_interval: Duration,
    times_triggered: u32,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if let RepeatCount::Times(count) = repeat_count {
        if times_triggered > count {
            return None;
        }
        if count == 0 && after >= start_time {
            return None;
        }
    }

    if let Some(end) = end_time {
        if end <= after {
            return None;
        }
    }

    if after < start_time {
        return Some(start_time);
    }

    let interval_ms = repeat_interval.num_milliseconds();
    if interval_ms < 1 {
        return None;
    }

    let elapsed_ms = after.signed_duration_since(start_time).num_milliseconds();
    let executions = elapsed_ms / interval_ms + 1;

    if let RepeatCount::Times(count) = repeat_count {
        if executions > count as i64 {
            return None;
        }
    }

    let fire_time = start_time + Duration::milliseconds(interval_ms.checked_mul(executions)?);

    if let Some(end) = end_time {
        if end <= fire_time {
            return None;
        }
    }

    Some(fire_time)
}

fn cron_fire_time_after(
    expression: &str,
    timezone: Tz,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let mut after = after;
    if start_time > after {
        after = start_time - Duration::seconds(1);
    }

    if let Some(end) = end_time {
        if after >= end {
            return Ok(None);
        }
    }

    let schedule = parse_cron_expression(expression)?;
    let next = schedule
        .after(&after.with_timezone(&timezone))
        .next()
        .map(|next_in_tz| next_in_tz.with_timezone(&Utc));

    Ok(match (next, end_time) {
        (Some(next), Some(end)) if next > end => None,
        (next, _) => next,
    })
}

/// Parse and validate a cron expression (seconds precision, optional year)
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Parse an IANA timezone name as stored with cron triggers
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    Tz::from_str(name).map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Timezone used for cron triggers that do not name one
pub fn default_timezone() -> Tz {
    chrono_tz::UTC
}
