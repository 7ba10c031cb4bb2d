// Conversion between domain models and persisted records

use crate::errors::JobStoreError;
use crate::models::{
    Job, JobDataMap, JobId, JobKey, MisfireInstruction, RepeatCount, Trigger, TriggerSchedule,
    TRIGGER_TYPE_CRON, TRIGGER_TYPE_SIMPLE,
};
use crate::schedule::{default_timezone, parse_cron_expression, parse_timezone};
use crate::store::{JobRecord, TriggerRecord};
use chrono::Duration;

pub fn job_to_record(job: &Job, id: JobId) -> Result<JobRecord, JobStoreError> {
    let job_data =
        serde_json::to_value(&job.data).map_err(|e| JobStoreError::TypeResolution {
            key: job.key.to_string(),
            reason: format!("Failed to serialize job data: {}", e),
        })?;

    Ok(JobRecord {
        id,
        key: job.key.clone(),
        description: job.description.clone(),
        job_type: job.job_type.clone(),
        job_data,
        concurrent_execution_disallowed: job.concurrent_execution_disallowed,
    })
}

pub fn record_to_job(record: &JobRecord) -> Result<Job, JobStoreError> {
    let data: JobDataMap = match &record.job_data {
        serde_json::Value::Null => JobDataMap::new(),
        value => serde_json::from_value(value.clone()).map_err(|e| JobStoreError::TypeResolution {
            key: record.key.to_string(),
            reason: format!("Failed to parse job data: {}", e),
        })?,
    };

    Ok(Job {
        key: record.key.clone(),
        description: record.description.clone(),
        job_type: record.job_type.clone(),
        data,
        concurrent_execution_disallowed: record.concurrent_execution_disallowed,
    })
}

pub fn trigger_to_record(trigger: &Trigger, job_id: JobId) -> TriggerRecord {
    let mut record = TriggerRecord {
        key: trigger.key.clone(),
        job_id,
        trigger_type: trigger.schedule.type_name().to_string(),
        description: trigger.description.clone(),
        calendar_name: trigger.calendar_name.clone(),
        priority: trigger.priority,
        start_time: trigger.start_time,
        end_time: trigger.end_time,
        next_fire_time: trigger.next_fire_time,
        previous_fire_time: trigger.previous_fire_time,
        final_fire_time: trigger.final_fire_time,
        misfire_instruction: trigger.misfire_instruction.to_string(),
        fire_instance_id: trigger.fire_instance_id.clone(),
        repeat_count: None,
        repeat_interval_ms: None,
        times_triggered: None,
        cron_expression: None,
        time_zone: None,
    };

    match &trigger.schedule {
        TriggerSchedule::Simple {
            repeat_count,
            repeat_interval,
            times_triggered,
        } => {
            record.repeat_count = Some(repeat_count.to_i32());
            record.repeat_interval_ms = Some(repeat_interval.num_milliseconds());
            record.times_triggered = Some((*times_triggered).min(i32::MAX as u32) as i32);
        }
        TriggerSchedule::Cron {
            expression,
            timezone,
        } => {
            record.cron_expression = Some(expression.clone());
            record.time_zone = Some(timezone.name().to_string());
        }
    }

    record
}

/// Rebuild a trigger from its row; `job_key` comes from the resolved job row
pub fn record_to_trigger(record: &TriggerRecord, job_key: JobKey) -> Result<Trigger, JobStoreError> {
    let unresolvable = |reason: String| JobStoreError::TypeResolution {
        key: record.key.to_string(),
        reason,
    };

    let schedule = match record.trigger_type.as_str() {
        TRIGGER_TYPE_SIMPLE => TriggerSchedule::Simple {
            repeat_count: RepeatCount::from_i32(record.repeat_count.unwrap_or(0)),
            repeat_interval: Duration::milliseconds(record.repeat_interval_ms.unwrap_or(0)),
            times_triggered: record.times_triggered.unwrap_or(0).max(0) as u32,
        },
        TRIGGER_TYPE_CRON => {
            let expression = record
                .cron_expression
                .clone()
                .ok_or_else(|| unresolvable("Cron trigger has no cron expression".to_string()))?;
            parse_cron_expression(&expression).map_err(|e| unresolvable(e.to_string()))?;

            let timezone = match record.time_zone.as_deref() {
                Some(name) => parse_timezone(name).map_err(|e| unresolvable(e.to_string()))?,
                None => default_timezone(),
            };

            TriggerSchedule::Cron {
                expression,
                timezone,
            }
        }
        other => return Err(unresolvable(format!("Unknown trigger type '{}'", other))),
    };

    let misfire_instruction = MisfireInstruction::try_from(record.misfire_instruction.clone())
        .map_err(unresolvable)?;

    Ok(Trigger {
        key: record.key.clone(),
        job_key,
        description: record.description.clone(),
        calendar_name: record.calendar_name.clone(),
        priority: record.priority,
        start_time: record.start_time,
        end_time: record.end_time,
        misfire_instruction,
        next_fire_time: record.next_fire_time,
        previous_fire_time: record.previous_fire_time,
        final_fire_time: record.final_fire_time,
        fire_instance_id: record.fire_instance_id.clone(),
        schedule,
    })
}
