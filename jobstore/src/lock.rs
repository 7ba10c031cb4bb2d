// Cluster-wide trigger locks on top of the persistent store
//
// A lock row per trigger key; the store's uniqueness constraint makes the
// insert an atomic test-and-set across every scheduler instance.

use crate::errors::DatabaseError;
use crate::models::{TriggerKey, TriggerLock};
use crate::store::PersistentStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of one attempt to claim a trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    /// Another claim exists; carries the lock as read back from the store
    HeldBy(TriggerLock),
    /// The insert collided but the competing lock was gone on read-back
    Vanished,
}

/// Lock table handle bound to one scheduler instance
#[derive(Clone)]
pub struct TriggerLockTable {
    store: Arc<dyn PersistentStore>,
    instance_id: String,
}

impl TriggerLockTable {
    pub fn new(store: Arc<dyn PersistentStore>, instance_id: impl Into<String>) -> Self {
        Self {
            store,
            instance_id: instance_id.into(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Try to claim `key` for this instance exactly once
    #[instrument(skip(self), fields(trigger_key = %key, instance_id = %self.instance_id))]
    pub async fn try_acquire(
        &self,
        key: &TriggerKey,
        now: DateTime<Utc>,
    ) -> Result<LockAttempt, DatabaseError> {
        let lock = TriggerLock::new(key.clone(), self.instance_id.clone(), now);

        match self.store.insert_lock(&lock).await {
            Ok(()) => {
                debug!("Trigger lock acquired");
                Ok(LockAttempt::Acquired)
            }
            Err(e) if e.is_duplicate_key() => match self.store.find_lock(key).await? {
                Some(existing) => {
                    debug!(holder = %existing.instance_id, "Trigger lock already held");
                    Ok(LockAttempt::HeldBy(existing))
                }
                None => {
                    warn!("Trigger lock collided but no lock was found on read-back");
                    Ok(LockAttempt::Vanished)
                }
            },
            Err(e) => Err(e),
        }
    }

    /// Release this instance's lock on `key`; a lock held by anyone else is untouched
    #[instrument(skip(self), fields(trigger_key = %key, instance_id = %self.instance_id))]
    pub async fn release(&self, key: &TriggerKey) -> Result<bool, DatabaseError> {
        let released = self.store.delete_lock(key, &self.instance_id).await?;
        if released {
            debug!("Trigger lock released");
        } else {
            debug!("No trigger lock held by this instance");
        }
        Ok(released)
    }

    /// Remove an expired lock, but only the exact lock that was observed
    #[instrument(skip(self, stale), fields(trigger_key = %stale.trigger_key, holder = %stale.instance_id))]
    pub async fn reclaim_stale(&self, stale: &TriggerLock) -> Result<bool, DatabaseError> {
        let removed = self.store.delete_lock_if_unchanged(stale).await?;
        if removed {
            warn!(acquired_at = %stale.acquired_at, "Removed expired trigger lock");
        }
        Ok(removed)
    }

    /// Drop every lock left behind by a previous run of this instance
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn clear_instance_locks(&self) -> Result<u64, DatabaseError> {
        let cleared = self.store.delete_locks_for_instance(&self.instance_id).await?;
        if cleared > 0 {
            info!(cleared, "Cleared trigger locks left by this instance");
        }
        Ok(cleared)
    }
}
