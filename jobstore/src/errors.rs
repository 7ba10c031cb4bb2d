// Error handling framework for the job store, schedule calculator and backends

use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid schedule configuration: {0}")]
    InvalidConfiguration(String),
}

/// Persistent store errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Schema initialization failed: {0}")]
    SchemaFailed(String),
}

impl DatabaseError {
    /// True when the store rejected a write because of a uniqueness constraint
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, DatabaseError::DuplicateKey(_))
    }
}

/// Errors surfaced by the clustered job store
#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Trigger acquisition abandoned after {attempts} contended attempts")]
    Contention { attempts: u32 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No handler registered for job type '{job_type}' (job {job_key})")]
    JobTypeNotFound { job_type: String, job_key: String },

    #[error("Could not resolve stored record {key}: {reason}")]
    TypeResolution { key: String, reason: String },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Persistence(#[from] DatabaseError),
}

impl JobStoreError {
    pub fn already_exists(kind: &'static str, key: impl ToString) -> Self {
        JobStoreError::AlreadyExists {
            kind,
            key: key.to_string(),
        }
    }

    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        JobStoreError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// Short machine-readable code, used as a metrics label and in logs
    pub fn code(&self) -> &'static str {
        match self {
            JobStoreError::AlreadyExists { .. } => "ALREADY_EXISTS",
            JobStoreError::NotFound { .. } | JobStoreError::JobTypeNotFound { .. } => "NOT_FOUND",
            JobStoreError::Unsupported(_) => "UNSUPPORTED",
            JobStoreError::Contention { .. } => "CONTENTION",
            JobStoreError::Configuration(_) => "CONFIGURATION",
            JobStoreError::TypeResolution { .. } => "TYPE_RESOLUTION",
            JobStoreError::Schedule(_) => "SCHEDULE_ERROR",
            JobStoreError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}

// Implement From for common external errors
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                // Check for specific database error codes
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for JobStoreError {
    fn from(err: sqlx::Error) -> Self {
        JobStoreError::Persistence(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "* * * *".to_string(),
            reason: "invalid format".to_string(),
        };
        assert!(err.to_string().contains("Invalid cron expression"));
    }

    #[test]
    fn test_already_exists_display() {
        let err = JobStoreError::already_exists("Job", "DEFAULT.watch-1");
        assert_eq!(err.to_string(), "Job already exists: DEFAULT.watch-1");
        assert_eq!(err.code(), "ALREADY_EXISTS");
    }

    #[test]
    fn test_duplicate_key_detection() {
        assert!(DatabaseError::DuplicateKey("locks_key".to_string()).is_duplicate_key());
        assert!(!DatabaseError::QueryFailed("boom".to_string()).is_duplicate_key());
    }

    #[test]
    fn test_job_type_not_found_is_not_found() {
        let err = JobStoreError::JobTypeNotFound {
            job_type: "diff-matcher".to_string(),
            job_key: "DEFAULT.watch-1".to_string(),
        };
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_persistence_error_from_database_error() {
        let err: JobStoreError = DatabaseError::ConnectionFailed("refused".to_string()).into();
        assert!(matches!(err, JobStoreError::Persistence(_)));
        assert!(err.to_string().contains("refused"));
    }
}
