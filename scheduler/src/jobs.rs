// Job handlers available to this scheduler node

use async_trait::async_trait;
use jobstore::registry::{JobExecutionContext, JobExecutionError, JobHandler, JobRegistry};
use tracing::info;

pub const LOG_JOB_TYPE: &str = "log";

/// Writes the job's `message` data entry to the log on every firing
pub struct LogJob;

#[async_trait]
impl JobHandler for LogJob {
    async fn execute(&self, context: &JobExecutionContext) -> Result<(), JobExecutionError> {
        let message = match context.job_data().get("message") {
            Some(serde_json::Value::String(message)) => message.clone(),
            Some(other) => {
                return Err(JobExecutionError::Failed(format!(
                    "message must be a string, got {}",
                    other
                )))
            }
            None => String::new(),
        };

        info!(
            job_key = %context.job().key,
            trigger_key = %context.trigger().key,
            fire_instance_id = context.fire_instance_id().unwrap_or_default(),
            scheduled_fire_time = ?context.scheduled_fire_time(),
            message = %message,
            "Log job fired"
        );
        Ok(())
    }
}

/// Registry with every handler this binary ships
pub fn build_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register(LOG_JOB_TYPE, || LogJob);
    registry
}
