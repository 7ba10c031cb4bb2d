use super::*;
use crate::errors::DatabaseError;
use crate::models::{MisfireInstruction, RepeatCount, TriggerFiredResult};
use crate::registry::{JobExecutionContext, JobExecutionError, JobHandler};
use crate::signaler::{ChannelSignaler, MockSchedulerSignaler};
use crate::store::{InMemoryStore, JobRecord, MockPersistentStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};

struct Noop;

#[async_trait]
impl JobHandler for Noop {
    async fn execute(&self, _context: &JobExecutionContext) -> Result<(), JobExecutionError> {
        Ok(())
    }
}

fn registry() -> Arc<JobRegistry> {
    let mut registry = JobRegistry::new();
    registry.register("noop", || Noop);
    Arc::new(registry)
}

fn config(instance_id: &str) -> JobStoreConfig {
    JobStoreConfig {
        instance_id: instance_id.to_string(),
        ..JobStoreConfig::default()
    }
}

fn job_record(id: JobId) -> JobRecord {
    JobRecord {
        id,
        key: JobKey::with_default_group("j1"),
        description: None,
        job_type: "noop".to_string(),
        job_data: serde_json::json!({}),
        concurrent_execution_disallowed: false,
    }
}

fn due_trigger(name: &str, next: DateTime<Utc>) -> Trigger {
    Trigger::simple(
        TriggerKey::with_default_group(name),
        JobKey::with_default_group("j1"),
        next,
        Duration::seconds(60),
        RepeatCount::Forever,
    )
    .with_next_fire_time(Some(next))
}

fn contended_store(insert_lock_failures: usize) -> (MockPersistentStore, Arc<AtomicUsize>) {
    let record = marshal::trigger_to_record(&due_trigger("t1", Utc::now()), 1);
    let lock_inserts = Arc::new(AtomicUsize::new(0));

    let mut store = MockPersistentStore::new();
    store
        .expect_find_triggers_due()
        .returning(move |_| Ok(vec![record.clone()]));
    store
        .expect_find_job_by_id()
        .returning(|id| Ok(Some(job_record(id))));
    let counter = lock_inserts.clone();
    store.expect_insert_lock().returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < insert_lock_failures {
            Err(DatabaseError::DuplicateKey("locks_key_unique".to_string()))
        } else {
            Ok(())
        }
    });
    // The competing lock is always gone by the time it is read back
    store.expect_find_lock().returning(|_| Ok(None));

    (store, lock_inserts)
}

fn job_store_over(store: Arc<dyn PersistentStore>, config: JobStoreConfig) -> ClusteredJobStore {
    let (signaler, _rx) = ChannelSignaler::new();
    ClusteredJobStore::new(config, store, Arc::new(signaler), registry())
}

#[tokio::test]
async fn test_acquisition_gives_up_after_attempt_cap() {
    let (store, lock_inserts) = contended_store(usize::MAX);
    let job_store = job_store_over(
        Arc::new(store),
        JobStoreConfig {
            max_acquire_attempts: 3,
            ..config("node-a")
        },
    );

    let err = job_store
        .acquire_next_triggers(Utc::now(), 10, Duration::zero())
        .await
        .unwrap_err();

    assert!(matches!(err, JobStoreError::Contention { attempts: 3 }));
    assert_eq!(lock_inserts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_acquisition_restarts_after_vanished_lock() {
    let (store, lock_inserts) = contended_store(2);
    let job_store = job_store_over(Arc::new(store), config("node-a"));

    let acquired = job_store
        .acquire_next_triggers(Utc::now(), 10, Duration::zero())
        .await
        .unwrap();

    assert_eq!(acquired.len(), 1);
    assert_eq!(acquired[0].key.name, "t1");
    assert_eq!(lock_inserts.load(Ordering::SeqCst), 3);
}

async fn seeded_store(job_store: &ClusteredJobStore, trigger: &Trigger) {
    job_store
        .store_job(&Job::new(JobKey::with_default_group("j1"), "noop"), false)
        .await
        .unwrap();
    job_store.store_trigger(trigger, false).await.unwrap();
}

#[tokio::test]
async fn test_misfire_with_unchanged_next_fire_time_writes_nothing() {
    let now = Utc::now();
    let store = Arc::new(InMemoryStore::new());
    let job_store = job_store_over(
        store.clone(),
        JobStoreConfig {
            misfire_threshold: Duration::zero(),
            ..config("node-a")
        },
    );

    let stored = Trigger::simple(
        TriggerKey::with_default_group("once"),
        JobKey::with_default_group("j1"),
        now,
        Duration::zero(),
        RepeatCount::Times(0),
    )
    .with_misfire_instruction(MisfireInstruction::FireNow)
    .with_next_fire_time(Some(now));
    seeded_store(&job_store, &stored).await;

    // A local edit that would become visible if the trigger were persisted
    let mut trigger = stored.clone().with_description("edited in memory");

    assert!(!job_store.apply_misfire(&mut trigger, now).await.unwrap());
    assert!(!job_store.apply_misfire(&mut trigger, now).await.unwrap());

    let persisted = job_store.retrieve_trigger(&stored.key).await.unwrap().unwrap();
    assert_eq!(persisted.description, None);
    assert_eq!(persisted.next_fire_time, Some(now));
}

#[tokio::test]
async fn test_misfire_reschedules_persists_and_notifies() {
    let now = Utc::now();
    let mut signaler = MockSchedulerSignaler::new();
    signaler
        .expect_notify_trigger_listeners_misfired()
        .times(1)
        .return_const(());
    signaler.expect_notify_scheduler_listeners_finalized().never();

    let job_store = ClusteredJobStore::new(
        config("node-a"),
        Arc::new(InMemoryStore::new()),
        Arc::new(signaler),
        registry(),
    );

    let missed = now - Duration::minutes(10);
    let stored = due_trigger("forever", missed);
    seeded_store(&job_store, &stored).await;

    let mut trigger = stored.clone();
    assert!(job_store.apply_misfire(&mut trigger, now).await.unwrap());

    let next = trigger.next_fire_time.unwrap();
    assert!(next > now && next <= now + Duration::seconds(60));

    let persisted = job_store.retrieve_trigger(&stored.key).await.unwrap().unwrap();
    assert_eq!(persisted.next_fire_time, Some(next));
}

#[tokio::test]
async fn test_misfire_within_threshold_is_not_applied() {
    let now = Utc::now();
    let mut signaler = MockSchedulerSignaler::new();
    signaler.expect_notify_trigger_listeners_misfired().never();

    let job_store = ClusteredJobStore::new(
        config("node-a"),
        Arc::new(InMemoryStore::new()),
        Arc::new(signaler),
        registry(),
    );

    let mut trigger = due_trigger("late", now - Duration::seconds(1));
    assert!(!job_store.apply_misfire(&mut trigger, now).await.unwrap());
}

#[tokio::test]
async fn test_ignore_policy_never_misfires() {
    let now = Utc::now();
    let job_store = job_store_over(Arc::new(InMemoryStore::new()), config("node-a"));

    let mut trigger = due_trigger("ignored", now - Duration::hours(1))
        .with_misfire_instruction(MisfireInstruction::IgnoreMisfirePolicy);
    let before = trigger.clone();

    assert!(!job_store.apply_misfire(&mut trigger, now).await.unwrap());
    assert_eq!(trigger, before);
}

#[tokio::test]
async fn test_misfire_finalizing_trigger_notifies_finalized() {
    let now = Utc::now();
    let mut signaler = MockSchedulerSignaler::new();
    signaler
        .expect_notify_trigger_listeners_misfired()
        .times(1)
        .return_const(());
    signaler
        .expect_notify_scheduler_listeners_finalized()
        .times(1)
        .return_const(());

    let job_store = ClusteredJobStore::new(
        config("node-a"),
        Arc::new(InMemoryStore::new()),
        Arc::new(signaler),
        registry(),
    );

    // Ended an hour ago, so rescheduling "now" leaves nothing to fire
    let start = now - Duration::hours(2);
    let stored = Trigger::simple(
        TriggerKey::with_default_group("expired"),
        JobKey::with_default_group("j1"),
        start,
        Duration::seconds(60),
        RepeatCount::Times(10),
    )
    .with_end_time(now - Duration::hours(1))
    .with_next_fire_time(Some(start));
    seeded_store(&job_store, &stored).await;

    let mut trigger = stored.clone();
    assert!(job_store.apply_misfire(&mut trigger, now).await.unwrap());
    assert_eq!(trigger.next_fire_time, None);
}

#[tokio::test]
async fn test_failed_fired_state_write_does_not_lose_rest_of_batch() {
    let released = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut store = MockPersistentStore::new();
    store
        .expect_find_job()
        .returning(|_| Ok(Some(job_record(1))));
    store
        .expect_find_job_by_id()
        .returning(|id| Ok(Some(job_record(id))));
    store
        .expect_insert_trigger()
        .returning(|record| Err(DatabaseError::DuplicateKey(record.key.to_string())));
    store.expect_update_trigger().returning(|record| {
        if record.key.name == "b" {
            Err(DatabaseError::QueryFailed("connection reset".to_string()))
        } else {
            Ok(true)
        }
    });
    let sink = released.clone();
    store.expect_delete_lock().returning(move |key, _| {
        sink.lock().unwrap().push(key.name.clone());
        Ok(true)
    });

    let job_store = job_store_over(Arc::new(store), config("node-a"));
    let now = Utc::now();
    let a = due_trigger("a", now - Duration::seconds(2));
    let b = due_trigger("b", now - Duration::seconds(1));

    let results = job_store.triggers_fired(&[a.clone(), b.clone()]).await.unwrap();

    assert_eq!(results.len(), 2);
    match &results[0] {
        TriggerFiredResult::Fired(bundle) => {
            assert_eq!(bundle.trigger.key, a.key);
            assert_eq!(bundle.scheduled_fire_time, a.next_fire_time);
            assert_eq!(
                bundle.next_fire_time,
                a.next_fire_time.map(|t| t + Duration::seconds(60))
            );
        }
        other => panic!("expected a fired bundle, got {:?}", other),
    }
    match &results[1] {
        TriggerFiredResult::Failed { trigger_key, error } => {
            assert_eq!(trigger_key, &b.key);
            assert!(matches!(error, JobStoreError::Persistence(_)));
        }
        other => panic!("expected a failed result, got {:?}", other),
    }
    // Only the trigger that could not be fired gives up its lock here
    assert_eq!(*released.lock().unwrap(), vec!["b".to_string()]);
}
