use crate::errors::JobStoreError;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Group used when a key is created without an explicit group
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Priority assigned to triggers that do not set one
pub const DEFAULT_PRIORITY: i32 = 5;

/// Storage identity of a job row, used to link triggers to their job
pub type JobId = i64;

/// Arbitrary job-specific parameters
pub type JobDataMap = BTreeMap<String, serde_json::Value>;

// ============================================================================
// Keys
// ============================================================================

/// Identity of a job: (name, group), globally unique
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    pub fn with_default_group(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_GROUP)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Identity of a trigger: (name, group), globally unique
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    pub fn with_default_group(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_GROUP)
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

// ============================================================================
// Job Models
// ============================================================================

/// Job is an opaque unit of work: the store only knows its identity,
/// which registered handler runs it, and the parameters handed to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub key: JobKey,
    pub description: Option<String>,
    /// Registry identifier of the handler that executes this job
    pub job_type: String,
    #[serde(default)]
    pub data: JobDataMap,
    #[serde(default)]
    pub concurrent_execution_disallowed: bool,
}

impl Job {
    pub fn new(key: JobKey, job_type: impl Into<String>) -> Self {
        Self {
            key,
            description: None,
            job_type: job_type.into(),
            data: JobDataMap::new(),
            concurrent_execution_disallowed: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn disallow_concurrent_execution(mut self) -> Self {
        self.concurrent_execution_disallowed = true;
        self
    }
}

// ============================================================================
// Trigger Models
// ============================================================================

/// How many times a simple trigger repeats after its first firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
    Times(u32),
    Forever,
}

impl RepeatCount {
    /// Persisted form: -1 means forever
    pub fn to_i32(self) -> i32 {
        match self {
            RepeatCount::Times(n) => n.min(i32::MAX as u32) as i32,
            RepeatCount::Forever => -1,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        if value < 0 {
            RepeatCount::Forever
        } else {
            RepeatCount::Times(value as u32)
        }
    }
}

/// Schedule variant carried by a trigger
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSchedule {
    Simple {
        repeat_count: RepeatCount,
        repeat_interval: Duration,
        times_triggered: u32,
    },
    Cron {
        expression: String,
        timezone: Tz,
    },
}

impl TriggerSchedule {
    /// Discriminant persisted alongside the variant columns
    pub fn type_name(&self) -> &'static str {
        match self {
            TriggerSchedule::Simple { .. } => TRIGGER_TYPE_SIMPLE,
            TriggerSchedule::Cron { .. } => TRIGGER_TYPE_CRON,
        }
    }
}

pub const TRIGGER_TYPE_SIMPLE: &str = "simple";
pub const TRIGGER_TYPE_CRON: &str = "cron";

/// What to do when a trigger's fire time was missed by more than the
/// misfire threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MisfireInstruction {
    #[default]
    Smart,
    IgnoreMisfirePolicy,
    /// Simple triggers fire now; cron triggers fire once now
    FireNow,
    DoNothing,
    RescheduleNowWithExistingRepeatCount,
    RescheduleNowWithRemainingRepeatCount,
    RescheduleNextWithExistingCount,
    RescheduleNextWithRemainingCount,
}

impl fmt::Display for MisfireInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MisfireInstruction::Smart => "smart",
            MisfireInstruction::IgnoreMisfirePolicy => "ignore_misfire_policy",
            MisfireInstruction::FireNow => "fire_now",
            MisfireInstruction::DoNothing => "do_nothing",
            MisfireInstruction::RescheduleNowWithExistingRepeatCount => {
                "reschedule_now_with_existing_repeat_count"
            }
            MisfireInstruction::RescheduleNowWithRemainingRepeatCount => {
                "reschedule_now_with_remaining_repeat_count"
            }
            MisfireInstruction::RescheduleNextWithExistingCount => {
                "reschedule_next_with_existing_count"
            }
            MisfireInstruction::RescheduleNextWithRemainingCount => {
                "reschedule_next_with_remaining_count"
            }
        };
        write!(f, "{}", s)
    }
}

impl FromStr for MisfireInstruction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smart" => Ok(MisfireInstruction::Smart),
            "ignore_misfire_policy" => Ok(MisfireInstruction::IgnoreMisfirePolicy),
            "fire_now" => Ok(MisfireInstruction::FireNow),
            "do_nothing" => Ok(MisfireInstruction::DoNothing),
            "reschedule_now_with_existing_repeat_count" => {
                Ok(MisfireInstruction::RescheduleNowWithExistingRepeatCount)
            }
            "reschedule_now_with_remaining_repeat_count" => {
                Ok(MisfireInstruction::RescheduleNowWithRemainingRepeatCount)
            }
            "reschedule_next_with_existing_count" => {
                Ok(MisfireInstruction::RescheduleNextWithExistingCount)
            }
            "reschedule_next_with_remaining_count" => {
                Ok(MisfireInstruction::RescheduleNextWithRemainingCount)
            }
            _ => Err(format!("Invalid misfire instruction: {}", s)),
        }
    }
}

impl TryFrom<String> for MisfireInstruction {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// Trigger is a schedule attached to a job describing when it should next run
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub description: Option<String>,
    pub calendar_name: Option<String>,
    pub priority: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub misfire_instruction: MisfireInstruction,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub final_fire_time: Option<DateTime<Utc>>,
    /// Token identifying one firing occurrence
    pub fire_instance_id: Option<String>,
    pub schedule: TriggerSchedule,
}

impl Trigger {
    fn with_schedule(
        key: TriggerKey,
        job_key: JobKey,
        start_time: DateTime<Utc>,
        schedule: TriggerSchedule,
    ) -> Self {
        Self {
            key,
            job_key,
            description: None,
            calendar_name: None,
            priority: DEFAULT_PRIORITY,
            start_time,
            end_time: None,
            misfire_instruction: MisfireInstruction::Smart,
            next_fire_time: None,
            previous_fire_time: None,
            final_fire_time: None,
            fire_instance_id: None,
            schedule,
        }
    }

    /// Fixed-interval trigger; call `compute_first_fire_time` before storing
    pub fn simple(
        key: TriggerKey,
        job_key: JobKey,
        start_time: DateTime<Utc>,
        repeat_interval: Duration,
        repeat_count: RepeatCount,
    ) -> Self {
        Self::with_schedule(
            key,
            job_key,
            start_time,
            TriggerSchedule::Simple {
                repeat_count,
                repeat_interval,
                times_triggered: 0,
            },
        )
    }

    /// Calendar-expression trigger; call `compute_first_fire_time` before storing
    pub fn cron(
        key: TriggerKey,
        job_key: JobKey,
        start_time: DateTime<Utc>,
        expression: impl Into<String>,
        timezone: Tz,
    ) -> Self {
        Self::with_schedule(
            key,
            job_key,
            start_time,
            TriggerSchedule::Cron {
                expression: expression.into(),
                timezone,
            },
        )
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_calendar(mut self, calendar_name: impl Into<String>) -> Self {
        self.calendar_name = Some(calendar_name.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_end_time(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_misfire_instruction(mut self, instruction: MisfireInstruction) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    pub fn with_next_fire_time(mut self, next_fire_time: Option<DateTime<Utc>>) -> Self {
        self.next_fire_time = next_fire_time;
        self
    }
}

// ============================================================================
// Locks & Calendars
// ============================================================================

/// Cluster-wide claim of one trigger by one scheduler instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerLock {
    pub trigger_key: TriggerKey,
    pub instance_id: String,
    pub acquired_at: DateTime<Utc>,
}

impl TriggerLock {
    pub fn new(trigger_key: TriggerKey, instance_id: impl Into<String>, acquired_at: DateTime<Utc>) -> Self {
        Self {
            trigger_key,
            instance_id: instance_id.into(),
            acquired_at,
        }
    }

    /// A lock older than the timeout belongs to a holder presumed dead
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now.signed_duration_since(self.acquired_at) > timeout
    }
}

/// Serialized exclusion rules; stored and handed through, never decoded here
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calendar {
    pub data: Vec<u8>,
}

impl Calendar {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }
}

// ============================================================================
// Firing & Completion
// ============================================================================

/// Instruction returned by job execution telling the store how to reconcile
/// the trigger afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedExecutionInstruction {
    Noop,
    ReExecuteJob,
    SetTriggerComplete,
    DeleteTrigger,
    SetAllJobTriggersComplete,
    SetTriggerError,
    SetAllJobTriggersError,
}

impl fmt::Display for CompletedExecutionInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompletedExecutionInstruction::Noop => "noop",
            CompletedExecutionInstruction::ReExecuteJob => "re_execute_job",
            CompletedExecutionInstruction::SetTriggerComplete => "set_trigger_complete",
            CompletedExecutionInstruction::DeleteTrigger => "delete_trigger",
            CompletedExecutionInstruction::SetAllJobTriggersComplete => {
                "set_all_job_triggers_complete"
            }
            CompletedExecutionInstruction::SetTriggerError => "set_trigger_error",
            CompletedExecutionInstruction::SetAllJobTriggersError => "set_all_job_triggers_error",
        };
        write!(f, "{}", s)
    }
}

/// Everything a job execution needs for one firing
#[derive(Debug, Clone)]
pub struct TriggerFiredBundle {
    pub job: Job,
    pub trigger: Trigger,
    pub calendar: Option<Calendar>,
    pub recovering: bool,
    pub fire_time: DateTime<Utc>,
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
}

/// Outcome of firing one acquired trigger
#[derive(Debug)]
pub enum TriggerFiredResult {
    Fired(Box<TriggerFiredBundle>),
    Failed {
        trigger_key: TriggerKey,
        error: JobStoreError,
    },
}

impl TriggerFiredResult {
    pub fn bundle(&self) -> Option<&TriggerFiredBundle> {
        match self {
            TriggerFiredResult::Fired(bundle) => Some(bundle),
            TriggerFiredResult::Failed { .. } => None,
        }
    }
}

/// Externally visible trigger state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    None,
    Normal,
    Paused,
    Complete,
    Error,
    Blocked,
}

/// Group selector taken by the group-enumeration and pause/resume operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMatcher {
    Equals(String),
    StartsWith(String),
    EndsWith(String),
    Contains(String),
    AnyGroup,
}
