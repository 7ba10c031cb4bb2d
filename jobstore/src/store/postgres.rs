// PostgreSQL store backend
//
// Four tables, all named `{prefix}<name>`: jobs, triggers, calendars, locks.
// The unique constraints on the natural keys are what the clustered
// coordination relies on.

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{Calendar, JobId, JobKey, TriggerKey, TriggerLock};
use crate::store::{JobRecord, PersistentStore, TriggerRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{debug, info, instrument};

const JOB_COLUMNS: &str =
    "id, key_name, key_group, description, job_type, job_data, concurrent_execution_disallowed";

const TRIGGER_COLUMNS: &str = "key_name, key_group, job_id, trigger_type, description, \
     calendar_name, priority, start_time, end_time, next_fire_time, previous_fire_time, \
     final_fire_time, misfire_instruction, fire_instance_id, repeat_count, repeat_interval_ms, \
     times_triggered, cron_expression, time_zone";

/// Store backend over a shared PostgreSQL database
pub struct PostgresStore {
    pool: DbPool,
    jobs: String,
    triggers: String,
    calendars: String,
    locks: String,
}

impl PostgresStore {
    /// # Errors
    /// Returns `DatabaseError::SchemaFailed` if the prefix is not a safe identifier
    pub fn new(pool: DbPool, table_prefix: &str) -> Result<Self, DatabaseError> {
        if !table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(DatabaseError::SchemaFailed(format!(
                "Invalid table prefix '{}'",
                table_prefix
            )));
        }

        Ok(Self {
            pool,
            jobs: format!("{}jobs", table_prefix),
            triggers: format!("{}triggers", table_prefix),
            calendars: format!("{}calendars", table_prefix),
            locks: format!("{}locks", table_prefix),
        })
    }

    fn schema_statements(&self) -> Vec<String> {
        vec![
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {jobs} (
                    id BIGSERIAL PRIMARY KEY,
                    key_name TEXT NOT NULL,
                    key_group TEXT NOT NULL,
                    description TEXT,
                    job_type TEXT NOT NULL,
                    job_data JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    concurrent_execution_disallowed BOOLEAN NOT NULL DEFAULT FALSE,
                    CONSTRAINT {jobs}_key_unique UNIQUE (key_name, key_group)
                )
                "#,
                jobs = self.jobs
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {triggers} (
                    id BIGSERIAL PRIMARY KEY,
                    key_name TEXT NOT NULL,
                    key_group TEXT NOT NULL,
                    job_id BIGINT NOT NULL,
                    trigger_type TEXT NOT NULL,
                    description TEXT,
                    calendar_name TEXT,
                    priority INTEGER NOT NULL,
                    start_time TIMESTAMPTZ NOT NULL,
                    end_time TIMESTAMPTZ,
                    next_fire_time TIMESTAMPTZ,
                    previous_fire_time TIMESTAMPTZ,
                    final_fire_time TIMESTAMPTZ,
                    misfire_instruction TEXT NOT NULL,
                    fire_instance_id TEXT,
                    repeat_count INTEGER,
                    repeat_interval_ms BIGINT,
                    times_triggered INTEGER,
                    cron_expression TEXT,
                    time_zone TEXT,
                    CONSTRAINT {triggers}_key_unique UNIQUE (key_name, key_group)
                )
                "#,
                triggers = self.triggers
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {t}_next_fire_time_idx ON {t} (next_fire_time)",
                t = self.triggers
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {t}_job_id_idx ON {t} (job_id)",
                t = self.triggers
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY, calendar BYTEA NOT NULL)",
                self.calendars
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {locks} (
                    key_name TEXT NOT NULL,
                    key_group TEXT NOT NULL,
                    instance_id TEXT NOT NULL,
                    acquired_at TIMESTAMPTZ NOT NULL,
                    CONSTRAINT {locks}_key_unique UNIQUE (key_name, key_group)
                )
                "#,
                locks = self.locks
            ),
        ]
    }
}

fn job_from_row(row: &PgRow) -> Result<JobRecord, sqlx::Error> {
    Ok(JobRecord {
        id: row.try_get("id")?,
        key: JobKey::new(
            row.try_get::<String, _>("key_name")?,
            row.try_get::<String, _>("key_group")?,
        ),
        description: row.try_get("description")?,
        job_type: row.try_get("job_type")?,
        job_data: row.try_get("job_data")?,
        concurrent_execution_disallowed: row.try_get("concurrent_execution_disallowed")?,
    })
}

fn trigger_from_row(row: &PgRow) -> Result<TriggerRecord, sqlx::Error> {
    Ok(TriggerRecord {
        key: TriggerKey::new(
            row.try_get::<String, _>("key_name")?,
            row.try_get::<String, _>("key_group")?,
        ),
        job_id: row.try_get("job_id")?,
        trigger_type: row.try_get("trigger_type")?,
        description: row.try_get("description")?,
        calendar_name: row.try_get("calendar_name")?,
        priority: row.try_get("priority")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        next_fire_time: row.try_get("next_fire_time")?,
        previous_fire_time: row.try_get("previous_fire_time")?,
        final_fire_time: row.try_get("final_fire_time")?,
        misfire_instruction: row.try_get("misfire_instruction")?,
        fire_instance_id: row.try_get("fire_instance_id")?,
        repeat_count: row.try_get("repeat_count")?,
        repeat_interval_ms: row.try_get("repeat_interval_ms")?,
        times_triggered: row.try_get("times_triggered")?,
        cron_expression: row.try_get("cron_expression")?,
        time_zone: row.try_get("time_zone")?,
    })
}

fn lock_from_row(row: &PgRow) -> Result<TriggerLock, sqlx::Error> {
    Ok(TriggerLock {
        trigger_key: TriggerKey::new(
            row.try_get::<String, _>("key_name")?,
            row.try_get::<String, _>("key_group")?,
        ),
        instance_id: row.try_get("instance_id")?,
        acquired_at: row.try_get("acquired_at")?,
    })
}

#[async_trait]
impl PersistentStore for PostgresStore {
    #[instrument(skip(self), fields(jobs_table = %self.jobs))]
    async fn initialize(&self) -> Result<(), DatabaseError> {
        let tables = [
            self.jobs.as_str(),
            self.triggers.as_str(),
            self.calendars.as_str(),
            self.locks.as_str(),
        ];
        let missing = self.pool.missing_tables(&tables).await?;
        if !missing.is_empty() {
            info!(tables = ?missing, "Creating job store tables");
        }

        for statement in self.schema_statements() {
            sqlx::query(&statement)
                .execute(self.pool.pool())
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to create job store schema");
                    DatabaseError::SchemaFailed(e.to_string())
                })?;
        }

        let still_missing = self.pool.missing_tables(&tables).await?;
        if !still_missing.is_empty() {
            return Err(DatabaseError::SchemaFailed(format!(
                "Tables not visible after creation: {}",
                still_missing.join(", ")
            )));
        }

        info!("Job store schema ready");
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    #[instrument(skip(self, job), fields(job_key = %job.key))]
    async fn insert_job(&self, job: &JobRecord) -> Result<JobId, DatabaseError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO {} (key_name, key_group, description, job_type, job_data, concurrent_execution_disallowed)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
            self.jobs
        ))
        .bind(&job.key.name)
        .bind(&job.key.group)
        .bind(&job.description)
        .bind(&job.job_type)
        .bind(&job.job_data)
        .bind(job.concurrent_execution_disallowed)
        .fetch_one(self.pool.pool())
        .await?;

        let id: JobId = row.try_get("id")?;
        debug!(job_id = id, "Job row inserted");
        Ok(id)
    }

    #[instrument(skip(self, job), fields(job_key = %job.key))]
    async fn update_job(&self, job: &JobRecord) -> Result<bool, DatabaseError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET description = $3, job_type = $4, job_data = $5, concurrent_execution_disallowed = $6
            WHERE key_name = $1 AND key_group = $2
            "#,
            self.jobs
        ))
        .bind(&job.key.name)
        .bind(&job.key.group)
        .bind(&job.description)
        .bind(&job.job_type)
        .bind(&job.job_data)
        .bind(job.concurrent_execution_disallowed)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_job(&self, key: &JobKey) -> Result<Option<JobRecord>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE key_name = $1 AND key_group = $2",
            JOB_COLUMNS, self.jobs
        ))
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(row.as_ref().map(job_from_row).transpose()?)
    }

    async fn find_job_by_id(&self, id: JobId) -> Result<Option<JobRecord>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE id = $1",
            JOB_COLUMNS, self.jobs
        ))
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(row.as_ref().map(job_from_row).transpose()?)
    }

    #[instrument(skip(self), fields(job_key = %key))]
    async fn delete_job(&self, key: &JobKey) -> Result<Option<JobId>, DatabaseError> {
        let row = sqlx::query(&format!(
            "DELETE FROM {} WHERE key_name = $1 AND key_group = $2 RETURNING id",
            self.jobs
        ))
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(self.pool.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("id")?)),
            None => Ok(None),
        }
    }

    async fn count_jobs(&self) -> Result<u64, DatabaseError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.jobs))
            .fetch_one(self.pool.pool())
            .await?;
        Ok(count as u64)
    }

    #[instrument(skip(self, trigger), fields(trigger_key = %trigger.key))]
    async fn insert_trigger(&self, trigger: &TriggerRecord) -> Result<(), DatabaseError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
            self.triggers, TRIGGER_COLUMNS
        ))
        .bind(&trigger.key.name)
        .bind(&trigger.key.group)
        .bind(trigger.job_id)
        .bind(&trigger.trigger_type)
        .bind(&trigger.description)
        .bind(&trigger.calendar_name)
        .bind(trigger.priority)
        .bind(trigger.start_time)
        .bind(trigger.end_time)
        .bind(trigger.next_fire_time)
        .bind(trigger.previous_fire_time)
        .bind(trigger.final_fire_time)
        .bind(&trigger.misfire_instruction)
        .bind(&trigger.fire_instance_id)
        .bind(trigger.repeat_count)
        .bind(trigger.repeat_interval_ms)
        .bind(trigger.times_triggered)
        .bind(&trigger.cron_expression)
        .bind(&trigger.time_zone)
        .execute(self.pool.pool())
        .await?;

        Ok(())
    }

    #[instrument(skip(self, trigger), fields(trigger_key = %trigger.key))]
    async fn update_trigger(&self, trigger: &TriggerRecord) -> Result<bool, DatabaseError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET job_id = $3, trigger_type = $4, description = $5, calendar_name = $6,
                priority = $7, start_time = $8, end_time = $9, next_fire_time = $10,
                previous_fire_time = $11, final_fire_time = $12, misfire_instruction = $13,
                fire_instance_id = $14, repeat_count = $15, repeat_interval_ms = $16,
                times_triggered = $17, cron_expression = $18, time_zone = $19
            WHERE key_name = $1 AND key_group = $2
            "#,
            self.triggers
        ))
        .bind(&trigger.key.name)
        .bind(&trigger.key.group)
        .bind(trigger.job_id)
        .bind(&trigger.trigger_type)
        .bind(&trigger.description)
        .bind(&trigger.calendar_name)
        .bind(trigger.priority)
        .bind(trigger.start_time)
        .bind(trigger.end_time)
        .bind(trigger.next_fire_time)
        .bind(trigger.previous_fire_time)
        .bind(trigger.final_fire_time)
        .bind(&trigger.misfire_instruction)
        .bind(&trigger.fire_instance_id)
        .bind(trigger.repeat_count)
        .bind(trigger.repeat_interval_ms)
        .bind(trigger.times_triggered)
        .bind(&trigger.cron_expression)
        .bind(&trigger.time_zone)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_trigger(&self, key: &TriggerKey) -> Result<Option<TriggerRecord>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE key_name = $1 AND key_group = $2",
            TRIGGER_COLUMNS, self.triggers
        ))
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(row.as_ref().map(trigger_from_row).transpose()?)
    }

    async fn find_triggers_for_job(&self, job_id: JobId) -> Result<Vec<TriggerRecord>, DatabaseError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE job_id = $1 ORDER BY id",
            TRIGGER_COLUMNS, self.triggers
        ))
        .bind(job_id)
        .fetch_all(self.pool.pool())
        .await?;

        Ok(rows.iter().map(trigger_from_row).collect::<Result<_, _>>()?)
    }

    #[instrument(skip(self))]
    async fn find_triggers_due(
        &self,
        no_later_than: DateTime<Utc>,
    ) -> Result<Vec<TriggerRecord>, DatabaseError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM {}
            WHERE next_fire_time <= $1
            ORDER BY next_fire_time ASC, id ASC
            "#,
            TRIGGER_COLUMNS, self.triggers
        ))
        .bind(no_later_than)
        .fetch_all(self.pool.pool())
        .await?;

        let triggers: Vec<TriggerRecord> =
            rows.iter().map(trigger_from_row).collect::<Result<_, _>>()?;
        debug!(count = triggers.len(), "Found due triggers");
        Ok(triggers)
    }

    #[instrument(skip(self), fields(trigger_key = %key))]
    async fn delete_trigger(&self, key: &TriggerKey) -> Result<bool, DatabaseError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE key_name = $1 AND key_group = $2",
            self.triggers
        ))
        .bind(&key.name)
        .bind(&key.group)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_triggers_for_job(&self, job_id: JobId) -> Result<u64, DatabaseError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE job_id = $1", self.triggers))
            .bind(job_id)
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected())
    }

    async fn count_triggers(&self) -> Result<u64, DatabaseError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.triggers))
            .fetch_one(self.pool.pool())
            .await?;
        Ok(count as u64)
    }

    async fn insert_calendar(&self, name: &str, calendar: &Calendar) -> Result<(), DatabaseError> {
        sqlx::query(&format!(
            "INSERT INTO {} (name, calendar) VALUES ($1, $2)",
            self.calendars
        ))
        .bind(name)
        .bind(&calendar.data)
        .execute(self.pool.pool())
        .await?;

        Ok(())
    }

    async fn update_calendar(&self, name: &str, calendar: &Calendar) -> Result<bool, DatabaseError> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET calendar = $2 WHERE name = $1",
            self.calendars
        ))
        .bind(name)
        .bind(&calendar.data)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_calendar(&self, name: &str) -> Result<Option<Calendar>, DatabaseError> {
        let data: Option<Vec<u8>> = sqlx::query_scalar(&format!(
            "SELECT calendar FROM {} WHERE name = $1",
            self.calendars
        ))
        .bind(name)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(data.map(Calendar::new))
    }

    async fn delete_calendar(&self, name: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE name = $1", self.calendars))
            .bind(name)
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_calendars(&self) -> Result<u64, DatabaseError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.calendars))
            .fetch_one(self.pool.pool())
            .await?;
        Ok(count as u64)
    }

    #[instrument(skip(self, lock), fields(trigger_key = %lock.trigger_key, instance_id = %lock.instance_id))]
    async fn insert_lock(&self, lock: &TriggerLock) -> Result<(), DatabaseError> {
        sqlx::query(&format!(
            "INSERT INTO {} (key_name, key_group, instance_id, acquired_at) VALUES ($1, $2, $3, $4)",
            self.locks
        ))
        .bind(&lock.trigger_key.name)
        .bind(&lock.trigger_key.group)
        .bind(&lock.instance_id)
        .bind(lock.acquired_at)
        .execute(self.pool.pool())
        .await?;

        Ok(())
    }

    async fn find_lock(&self, key: &TriggerKey) -> Result<Option<TriggerLock>, DatabaseError> {
        let row = sqlx::query(&format!(
            "SELECT key_name, key_group, instance_id, acquired_at FROM {} WHERE key_name = $1 AND key_group = $2",
            self.locks
        ))
        .bind(&key.name)
        .bind(&key.group)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(row.as_ref().map(lock_from_row).transpose()?)
    }

    async fn delete_lock(&self, key: &TriggerKey, instance_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE key_name = $1 AND key_group = $2 AND instance_id = $3",
            self.locks
        ))
        .bind(&key.name)
        .bind(&key.group)
        .bind(instance_id)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_lock_if_unchanged(&self, lock: &TriggerLock) -> Result<bool, DatabaseError> {
        let result = sqlx::query(&format!(
            r#"
            DELETE FROM {}
            WHERE key_name = $1 AND key_group = $2 AND instance_id = $3 AND acquired_at = $4
            "#,
            self.locks
        ))
        .bind(&lock.trigger_key.name)
        .bind(&lock.trigger_key.group)
        .bind(&lock.instance_id)
        .bind(lock.acquired_at)
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_locks_for_instance(&self, instance_id: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE instance_id = $1", self.locks))
            .bind(instance_id)
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn clear_scheduling_data(&self) -> Result<(), DatabaseError> {
        let mut tx = self.pool.pool().begin().await?;
        for table in [&self.triggers, &self.jobs, &self.calendars] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!("Cleared all scheduling data");
        Ok(())
    }
}
