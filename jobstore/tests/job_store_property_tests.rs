// Property-based tests for job, trigger and calendar storage

mod support;

use chrono::{Duration, Utc};
use jobstore::errors::JobStoreError;
use jobstore::models::{Calendar, GroupMatcher, JobKey, TriggerKey};
use jobstore::store::{InMemoryStore, PersistentStore};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use support::{job, node, simple_trigger};

/// **Property: Key uniqueness**
///
/// *For any* sequence of job and trigger inserts without replace, no two
/// records share a key; rejected inserts fail with AlreadyExists.
#[test]
fn property_store_keeps_keys_unique() {
    proptest!(|(names in prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d"]), 1..20))| {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = Arc::new(InMemoryStore::new());
            let job_store = node(store.clone(), "node-a").job_store;
            let now = Utc::now();

            let mut seen = HashSet::new();
            for name in &names {
                let first = seen.insert(*name);

                let job_result = job_store.store_job(&job(name), false).await;
                let trigger_result = job_store
                    .store_trigger(&simple_trigger(name, name, now, 60), false)
                    .await;

                if first {
                    prop_assert!(job_result.is_ok());
                    prop_assert!(trigger_result.is_ok());
                } else {
                    let job_duplicate = matches!(job_result, Err(JobStoreError::AlreadyExists { kind: "Job", .. }));
                    let trigger_duplicate = matches!(trigger_result, Err(JobStoreError::AlreadyExists { kind: "Trigger", .. }));
                    prop_assert!(job_duplicate);
                    prop_assert!(trigger_duplicate);
                }
            }

            prop_assert_eq!(job_store.get_number_of_jobs().await.unwrap(), seen.len() as u64);
            prop_assert_eq!(job_store.get_number_of_triggers().await.unwrap(), seen.len() as u64);
            Ok(())
        }).unwrap();
    });
}

#[tokio::test]
async fn test_duplicate_job_leaves_original_untouched() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;
    let original = job("report").with_description("nightly report");

    job_store.store_job(&original, false).await.unwrap();
    let err = job_store
        .store_job(&job("report").with_description("impostor"), false)
        .await
        .unwrap_err();

    assert!(matches!(err, JobStoreError::AlreadyExists { kind: "Job", .. }));
    let stored = job_store.retrieve_job(&original.key).await.unwrap().unwrap();
    assert_eq!(stored.description.as_deref(), Some("nightly report"));
}

#[tokio::test]
async fn test_replace_job_keeps_id_and_merges_data() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;

    let first = job("report")
        .with_data("recipient", serde_json::json!("ops@example.com"))
        .with_data("format", serde_json::json!("pdf"));
    let id = job_store.store_job(&first, false).await.unwrap();

    let replacement = job("report")
        .with_description("weekly report")
        .with_data("format", serde_json::json!("csv"));
    let replaced_id = job_store.store_job(&replacement, true).await.unwrap();

    assert_eq!(id, replaced_id);
    let stored = job_store.retrieve_job(&first.key).await.unwrap().unwrap();
    assert_eq!(stored.description.as_deref(), Some("weekly report"));
    assert_eq!(stored.data.get("format"), Some(&serde_json::json!("csv")));
    assert_eq!(
        stored.data.get("recipient"),
        Some(&serde_json::json!("ops@example.com"))
    );
    assert_eq!(stored.data.len(), 2);
    assert_eq!(job_store.get_number_of_jobs().await.unwrap(), 1);
}

#[tokio::test]
async fn test_replace_job_keeps_triggers_linked() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;
    job_store.store_job(&job("report"), false).await.unwrap();
    job_store
        .store_trigger(&simple_trigger("hourly", "report", Utc::now(), 3600), false)
        .await
        .unwrap();

    job_store
        .store_job(&job("report").with_description("v2"), true)
        .await
        .unwrap();

    let triggers = job_store
        .get_triggers_for_job(&JobKey::with_default_group("report"))
        .await
        .unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].key.name, "hourly");
}

#[tokio::test]
async fn test_duplicate_trigger_leaves_original_untouched() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;
    let now = Utc::now();
    job_store.store_job(&job("j1"), false).await.unwrap();

    let original = simple_trigger("t1", "j1", now, 60);
    job_store.store_trigger(&original, false).await.unwrap();

    let other = simple_trigger("t1", "j1", now + Duration::hours(1), 120);
    let err = job_store.store_trigger(&other, false).await.unwrap_err();
    assert!(matches!(err, JobStoreError::AlreadyExists { kind: "Trigger", .. }));

    let stored = job_store.retrieve_trigger(&original.key).await.unwrap().unwrap();
    assert_eq!(stored, original);

    job_store.store_trigger(&other, true).await.unwrap();
    let stored = job_store.retrieve_trigger(&original.key).await.unwrap().unwrap();
    assert_eq!(stored, other);
}

#[tokio::test]
async fn test_trigger_for_missing_job_is_not_found() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;

    let err = job_store
        .store_trigger(&simple_trigger("t1", "ghost", Utc::now(), 60), false)
        .await
        .unwrap_err();

    assert!(matches!(err, JobStoreError::NotFound { kind: "Job", .. }));
    assert_eq!(job_store.get_number_of_triggers().await.unwrap(), 0);
}

#[tokio::test]
async fn test_store_job_and_trigger_links_them() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;
    let now = Utc::now();

    job_store
        .store_job_and_trigger(&job("j1"), &simple_trigger("t1", "j1", now, 60))
        .await
        .unwrap();

    assert!(job_store.check_job_exists(&JobKey::with_default_group("j1")).await.unwrap());
    assert!(job_store
        .check_trigger_exists(&TriggerKey::with_default_group("t1"))
        .await
        .unwrap());
}

/// **Property: Cascade**
///
/// *For any* number of triggers on a job, removing the job removes them all.
#[test]
fn property_remove_job_cascades_to_triggers() {
    proptest!(|(trigger_count in 0usize..8)| {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;
            let now = Utc::now();
            let key = JobKey::with_default_group("j1");

            job_store.store_job(&job("j1"), false).await.unwrap();
            job_store.store_job(&job("bystander"), false).await.unwrap();
            job_store
                .store_trigger(&simple_trigger("keep", "bystander", now, 60), false)
                .await
                .unwrap();
            for i in 0..trigger_count {
                job_store
                    .store_trigger(&simple_trigger(&format!("t{}", i), "j1", now, 60), false)
                    .await
                    .unwrap();
            }

            prop_assert!(job_store.remove_job(&key).await.unwrap());
            prop_assert!(job_store.get_triggers_for_job(&key).await.unwrap().is_empty());
            prop_assert_eq!(job_store.get_number_of_triggers().await.unwrap(), 1);
            prop_assert!(!job_store.remove_job(&key).await.unwrap());
            Ok(())
        }).unwrap();
    });
}

#[tokio::test]
async fn test_remove_many_reports_whether_all_existed() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;
    let now = Utc::now();
    for name in ["a", "b", "c"] {
        job_store.store_job(&job(name), false).await.unwrap();
        job_store
            .store_trigger(&simple_trigger(name, name, now, 60), false)
            .await
            .unwrap();
    }

    let triggers = [TriggerKey::with_default_group("a"), TriggerKey::with_default_group("zzz")];
    assert!(!job_store.remove_triggers(&triggers).await.unwrap());
    assert!(!job_store.check_trigger_exists(&triggers[0]).await.unwrap());

    let jobs = [JobKey::with_default_group("b"), JobKey::with_default_group("c")];
    assert!(job_store.remove_jobs(&jobs).await.unwrap());
    assert_eq!(job_store.get_number_of_jobs().await.unwrap(), 1);
    assert_eq!(job_store.get_number_of_triggers().await.unwrap(), 0);
}

#[tokio::test]
async fn test_replace_trigger_moves_to_new_key_on_same_job() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;
    let now = Utc::now();
    job_store.store_job(&job("j1"), false).await.unwrap();
    job_store
        .store_trigger(&simple_trigger("old", "j1", now, 60), false)
        .await
        .unwrap();

    // The replacement names another job; the original job link wins
    let replacement = simple_trigger("new", "elsewhere", now, 30);
    let old_key = TriggerKey::with_default_group("old");

    assert!(job_store.replace_trigger(&old_key, &replacement).await.unwrap());
    assert!(!job_store.check_trigger_exists(&old_key).await.unwrap());

    let triggers = job_store
        .get_triggers_for_job(&JobKey::with_default_group("j1"))
        .await
        .unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].key.name, "new");
    assert_eq!(triggers[0].job_key, JobKey::with_default_group("j1"));

    assert!(!job_store
        .replace_trigger(&TriggerKey::with_default_group("missing"), &replacement)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_triggers_for_missing_job_are_empty() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;
    let triggers = job_store
        .get_triggers_for_job(&JobKey::with_default_group("ghost"))
        .await
        .unwrap();
    assert!(triggers.is_empty());
}

#[tokio::test]
async fn test_retrieve_job_with_unregistered_type_fails() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;
    let key = JobKey::new("legacy", "imports");
    job_store
        .store_job(&jobstore::models::Job::new(key.clone(), "removed-type"), false)
        .await
        .unwrap();

    match job_store.retrieve_job(&key).await {
        Err(JobStoreError::JobTypeNotFound { job_type, job_key }) => {
            assert_eq!(job_type, "removed-type");
            assert_eq!(job_key, "imports.legacy");
        }
        other => panic!("expected JobTypeNotFound, got {:?}", other),
    }
    assert!(job_store.check_job_exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_calendar_storage() {
    let store = Arc::new(InMemoryStore::new());
    let job_store = node(store.clone(), "node-a").job_store;
    let holidays = Calendar::new(b"2026-12-25".to_vec());

    job_store.store_calendar("holidays", &holidays, false, false).await.unwrap();
    let err = job_store
        .store_calendar("holidays", &holidays, false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, JobStoreError::AlreadyExists { kind: "Calendar", .. }));

    let updated = Calendar::new(b"2027-01-01".to_vec());
    job_store.store_calendar("holidays", &updated, true, false).await.unwrap();
    assert_eq!(store.find_calendar("holidays").await.unwrap(), Some(updated.clone()));

    assert!(matches!(
        job_store.store_calendar("holidays", &updated, true, true).await,
        Err(JobStoreError::Unsupported(_))
    ));

    assert_eq!(job_store.get_number_of_calendars().await.unwrap(), 1);
    assert!(job_store.remove_calendar("holidays").await.unwrap());
    assert!(!job_store.remove_calendar("holidays").await.unwrap());
}

#[tokio::test]
async fn test_clear_all_scheduling_data() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;
    job_store
        .store_job_and_trigger(&job("j1"), &simple_trigger("t1", "j1", Utc::now(), 60))
        .await
        .unwrap();
    job_store
        .store_calendar("holidays", &Calendar::new(vec![1, 2, 3]), false, false)
        .await
        .unwrap();

    job_store.clear_all_scheduling_data().await.unwrap();

    assert_eq!(job_store.get_number_of_jobs().await.unwrap(), 0);
    assert_eq!(job_store.get_number_of_triggers().await.unwrap(), 0);
    assert_eq!(job_store.get_number_of_calendars().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unsupported_operations_fail_without_side_effects() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;
    let job_key = JobKey::with_default_group("j1");
    let trigger_key = TriggerKey::with_default_group("t1");
    let any = GroupMatcher::AnyGroup;

    let unsupported = |result: Result<(), JobStoreError>| {
        assert!(matches!(result, Err(JobStoreError::Unsupported(_))));
    };

    unsupported(job_store.store_jobs_and_triggers(&[(job("j1"), Vec::new())], false).await);
    unsupported(job_store.retrieve_calendar("holidays").await.map(|_| ()));
    unsupported(job_store.get_job_keys(&any).await.map(|_| ()));
    unsupported(job_store.get_trigger_keys(&any).await.map(|_| ()));
    unsupported(job_store.get_job_group_names().await.map(|_| ()));
    unsupported(job_store.get_trigger_group_names().await.map(|_| ()));
    unsupported(job_store.get_calendar_names().await.map(|_| ()));
    unsupported(job_store.get_trigger_state(&trigger_key).await.map(|_| ()));
    unsupported(job_store.pause_trigger(&trigger_key).await);
    unsupported(job_store.pause_triggers(&any).await.map(|_| ()));
    unsupported(job_store.pause_job(&job_key).await);
    unsupported(job_store.pause_jobs(&any).await.map(|_| ()));
    unsupported(job_store.resume_trigger(&trigger_key).await);
    unsupported(job_store.resume_triggers(&any).await.map(|_| ()));
    unsupported(job_store.resume_job(&job_key).await);
    unsupported(job_store.resume_jobs(&any).await.map(|_| ()));
    unsupported(job_store.get_paused_trigger_groups().await.map(|_| ()));
    unsupported(job_store.pause_all().await);
    unsupported(job_store.resume_all().await);

    assert_eq!(job_store.get_number_of_jobs().await.unwrap(), 0);
}

#[tokio::test]
async fn test_store_capabilities() {
    let job_store = node(Arc::new(InMemoryStore::new()), "node-a").job_store;
    assert!(job_store.supports_persistence());
    assert!(job_store.is_clustered());
    assert_eq!(
        job_store.estimated_time_to_release_and_acquire_trigger(),
        std::time::Duration::from_millis(200)
    );
    assert_eq!(job_store.instance_id(), "node-a");
}
