// In-process store backend
//
// Shares the same atomic record semantics as the database backend, so several
// `ClusteredJobStore` instances holding one `Arc<InMemoryStore>` behave like a
// cluster. Used for tests and single-node development runs.

use crate::errors::DatabaseError;
use crate::models::{Calendar, JobId, JobKey, TriggerKey, TriggerLock};
use crate::store::{JobRecord, PersistentStore, TriggerRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    last_job_id: JobId,
    // Vecs keep insertion order, which is the tie-break for due triggers
    jobs: Vec<JobRecord>,
    triggers: Vec<TriggerRecord>,
    calendars: BTreeMap<String, Calendar>,
    locks: HashMap<TriggerKey, TriggerLock>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trigger locks currently held, by any instance
    pub async fn lock_count(&self) -> usize {
        self.state.lock().await.locks.len()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn initialize(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    async fn close(&self) {}

    async fn insert_job(&self, job: &JobRecord) -> Result<JobId, DatabaseError> {
        let mut state = self.state.lock().await;
        if state.jobs.iter().any(|j| j.key == job.key) {
            return Err(DatabaseError::DuplicateKey(format!("job {}", job.key)));
        }

        state.last_job_id += 1;
        let id = state.last_job_id;
        state.jobs.push(JobRecord { id, ..job.clone() });
        Ok(id)
    }

    async fn update_job(&self, job: &JobRecord) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        match state.jobs.iter_mut().find(|j| j.key == job.key) {
            Some(existing) => {
                let id = existing.id;
                *existing = JobRecord { id, ..job.clone() };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_job(&self, key: &JobKey) -> Result<Option<JobRecord>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state.jobs.iter().find(|j| &j.key == key).cloned())
    }

    async fn find_job_by_id(&self, id: JobId) -> Result<Option<JobRecord>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn delete_job(&self, key: &JobKey) -> Result<Option<JobId>, DatabaseError> {
        let mut state = self.state.lock().await;
        let position = state.jobs.iter().position(|j| &j.key == key);
        Ok(position.map(|index| state.jobs.remove(index).id))
    }

    async fn count_jobs(&self) -> Result<u64, DatabaseError> {
        Ok(self.state.lock().await.jobs.len() as u64)
    }

    async fn insert_trigger(&self, trigger: &TriggerRecord) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        if state.triggers.iter().any(|t| t.key == trigger.key) {
            return Err(DatabaseError::DuplicateKey(format!("trigger {}", trigger.key)));
        }
        state.triggers.push(trigger.clone());
        Ok(())
    }

    async fn update_trigger(&self, trigger: &TriggerRecord) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        match state.triggers.iter_mut().find(|t| t.key == trigger.key) {
            Some(existing) => {
                *existing = trigger.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_trigger(&self, key: &TriggerKey) -> Result<Option<TriggerRecord>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state.triggers.iter().find(|t| &t.key == key).cloned())
    }

    async fn find_triggers_for_job(&self, job_id: JobId) -> Result<Vec<TriggerRecord>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .triggers
            .iter()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn find_triggers_due(
        &self,
        no_later_than: DateTime<Utc>,
    ) -> Result<Vec<TriggerRecord>, DatabaseError> {
        let state = self.state.lock().await;
        let mut due: Vec<TriggerRecord> = state
            .triggers
            .iter()
            .filter(|t| t.next_fire_time.is_some_and(|next| next <= no_later_than))
            .cloned()
            .collect();
        // Stable sort keeps insertion order among equal fire times
        due.sort_by_key(|t| t.next_fire_time);
        Ok(due)
    }

    async fn delete_trigger(&self, key: &TriggerKey) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        let before = state.triggers.len();
        state.triggers.retain(|t| &t.key != key);
        Ok(state.triggers.len() < before)
    }

    async fn delete_triggers_for_job(&self, job_id: JobId) -> Result<u64, DatabaseError> {
        let mut state = self.state.lock().await;
        let before = state.triggers.len();
        state.triggers.retain(|t| t.job_id != job_id);
        Ok((before - state.triggers.len()) as u64)
    }

    async fn count_triggers(&self) -> Result<u64, DatabaseError> {
        Ok(self.state.lock().await.triggers.len() as u64)
    }

    async fn insert_calendar(&self, name: &str, calendar: &Calendar) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        if state.calendars.contains_key(name) {
            return Err(DatabaseError::DuplicateKey(format!("calendar {}", name)));
        }
        state.calendars.insert(name.to_string(), calendar.clone());
        Ok(())
    }

    async fn update_calendar(&self, name: &str, calendar: &Calendar) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        match state.calendars.get_mut(name) {
            Some(existing) => {
                *existing = calendar.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_calendar(&self, name: &str) -> Result<Option<Calendar>, DatabaseError> {
        Ok(self.state.lock().await.calendars.get(name).cloned())
    }

    async fn delete_calendar(&self, name: &str) -> Result<bool, DatabaseError> {
        Ok(self.state.lock().await.calendars.remove(name).is_some())
    }

    async fn count_calendars(&self) -> Result<u64, DatabaseError> {
        Ok(self.state.lock().await.calendars.len() as u64)
    }

    async fn insert_lock(&self, lock: &TriggerLock) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        if state.locks.contains_key(&lock.trigger_key) {
            return Err(DatabaseError::DuplicateKey(format!(
                "lock {}",
                lock.trigger_key
            )));
        }
        state.locks.insert(lock.trigger_key.clone(), lock.clone());
        Ok(())
    }

    async fn find_lock(&self, key: &TriggerKey) -> Result<Option<TriggerLock>, DatabaseError> {
        Ok(self.state.lock().await.locks.get(key).cloned())
    }

    async fn delete_lock(&self, key: &TriggerKey, instance_id: &str) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        let owned = state
            .locks
            .get(key)
            .is_some_and(|lock| lock.instance_id == instance_id);
        if owned {
            state.locks.remove(key);
        }
        Ok(owned)
    }

    async fn delete_lock_if_unchanged(&self, lock: &TriggerLock) -> Result<bool, DatabaseError> {
        let mut state = self.state.lock().await;
        let unchanged = state.locks.get(&lock.trigger_key) == Some(lock);
        if unchanged {
            state.locks.remove(&lock.trigger_key);
        }
        Ok(unchanged)
    }

    async fn delete_locks_for_instance(&self, instance_id: &str) -> Result<u64, DatabaseError> {
        let mut state = self.state.lock().await;
        let before = state.locks.len();
        state.locks.retain(|_, lock| lock.instance_id != instance_id);
        Ok((before - state.locks.len()) as u64)
    }

    async fn clear_scheduling_data(&self) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().await;
        state.jobs.clear();
        state.triggers.clear();
        state.calendars.clear();
        Ok(())
    }
}
