//! Crash-window failure injection.
//!
//! These tests verify the protocol's crash guarantees:
//!
//! 1. **Event rollback**: a failed partition write leaves no acknowledged
//!    event files and no event index entries behind
//! 2. **Post-CAS index crash**: the consistency guard detects the
//!    divergence on the next run and rebuilds the index from events
//! 3. **Mid-consolidation crash**: the month stays `in_progress` and the
//!    next consolidation redoes it from events; the publish stands

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use ingot_core::paths::DatasetPaths;
use ingot_core::storage::StorageBackend;
use ingot_pipeline::guard::GuardConfig;
use ingot_pipeline::notify::MemoryNotifier;
use ingot_pipeline::source::StaticSource;
use ingot_pipeline::{Consolidator, DatasetStore, PipelineDriver, RunStatus};

use common::{json_source, registry, test_config, FailingBackend};

fn driver_for(backend: Arc<FailingBackend>, content: bytes::Bytes) -> PipelineDriver {
    PipelineDriver::new(
        DatasetStore::new(backend),
        registry(),
        Arc::new(StaticSource::new(content)),
    )
    .with_notifier(Arc::new(MemoryNotifier::new()))
}

/// A failed partition write rolls back every acknowledged event file.
#[tokio::test]
async fn partial_event_write_rolls_back_cleanly() {
    let backend = Arc::new(FailingBackend::new());
    let store = DatasetStore::new(backend.clone());

    // January succeeds, February fails: the January file must not survive
    backend.fail_on_write_suffix("month=02/part-0.parquet");

    let report = driver_for(
        backend.clone(),
        json_source(&[
            ("2024-01-10T00:00:00Z", 1.0, "a"),
            ("2024-02-05T00:00:00Z", 2.0, "b"),
        ]),
    )
    .run(&test_config("ds"))
    .await;

    assert_eq!(report.status, RunStatus::Error);

    // No event data files, no event index entries, no pointer, no index
    let event_keys = store.list_keys("datasets/ds/events/").await.unwrap();
    assert!(
        !event_keys.iter().any(|k| k.ends_with(".parquet")),
        "acknowledged partitions must be rolled back, found: {event_keys:?}"
    );
    assert!(
        !event_keys.iter().any(|k| k.contains("/index/")),
        "no event index entries may be written for a failed version"
    );
    assert!(store.read_pointer("ds").await.unwrap().is_none());
    assert!(store.read_index("ds").await.unwrap().is_none());
}

/// A failure while updating the second month's event index must also take
/// down the first month's entry: a rolled-back version may not linger in
/// any `versions.json`.
#[tokio::test]
async fn index_update_failure_leaves_no_index_entries() {
    let backend = Arc::new(FailingBackend::new());
    let store = DatasetStore::new(backend.clone());

    // Both partition writes succeed; January's index entry commits; then
    // February's index write fails
    backend.fail_on_write_suffix("/2024/02/versions.json");

    let report = driver_for(
        backend.clone(),
        json_source(&[
            ("2024-01-10T00:00:00Z", 1.0, "a"),
            ("2024-02-05T00:00:00Z", 2.0, "b"),
        ]),
    )
    .run(&test_config("ds"))
    .await;

    assert_eq!(report.status, RunStatus::Error);

    // Data files rolled back, and neither month's index survived
    let event_keys = store.list_keys("datasets/ds/events/").await.unwrap();
    assert!(
        !event_keys.iter().any(|k| k.ends_with(".parquet")),
        "partitions must be rolled back, found: {event_keys:?}"
    );
    assert!(store.read_event_index("ds", 2024, 1).await.unwrap().is_none());
    assert!(store.read_event_index("ds", 2024, 2).await.unwrap().is_none());
    assert!(store.read_pointer("ds").await.unwrap().is_none());
}

/// When a month already had an index from a previous publish, rollback
/// restores that pre-image instead of deleting the index outright.
#[tokio::test]
async fn index_rollback_restores_the_prior_months_entry() {
    let backend = Arc::new(FailingBackend::new());
    let store = DatasetStore::new(backend.clone());
    let config = test_config("ds");

    let first = driver_for(
        backend.clone(),
        json_source(&[("2024-01-10T00:00:00Z", 1.0, "a")]),
    )
    .run(&config)
    .await;
    assert_eq!(first.status, RunStatus::Completed);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    // Second version touches January again plus February; February's
    // index write fails after January's entry was already extended
    backend.fail_on_write_suffix("/2024/02/versions.json");
    let second = driver_for(
        backend.clone(),
        json_source(&[
            ("2024-01-10T00:00:00Z", 1.0, "a"),
            ("2024-01-20T00:00:00Z", 2.0, "b"),
            ("2024-02-05T00:00:00Z", 3.0, "c"),
        ]),
    )
    .run(&config)
    .await;
    assert_eq!(second.status, RunStatus::Error);

    // January's index is back to exactly the first publish
    let january = store
        .read_event_index("ds", 2024, 1)
        .await
        .unwrap()
        .expect("index");
    assert_eq!(january.versions, vec![first.version_ts.clone()]);
    assert!(store.read_event_index("ds", 2024, 2).await.unwrap().is_none());

    // The failed version left no data files and the pointer is untouched
    let event_keys = store.list_keys("datasets/ds/events/").await.unwrap();
    assert!(!event_keys
        .iter()
        .any(|k| k.ends_with(".parquet") && k.contains(&second.version_ts)));
    assert_eq!(
        store.read_pointer("ds").await.unwrap().expect("pointer").current_version,
        first.version_ts
    );
    assert_eq!(store.read_index("ds").await.unwrap().unwrap().len(), 1);
}

/// Crash after the pointer CAS but before the index write: the next run's
/// guard rebuilds the index from events and the pipeline proceeds.
#[tokio::test]
async fn crash_between_cas_and_index_write_self_heals() {
    let backend = Arc::new(FailingBackend::new());
    let store = DatasetStore::new(backend.clone());
    let config = test_config("ds");

    let first = driver_for(
        backend.clone(),
        json_source(&[("2024-01-10T00:00:00Z", 1.0, "a")]),
    )
    .run(&config)
    .await;
    assert_eq!(first.status, RunStatus::Completed);

    // Distinct version for the second publish
    tokio::time::sleep(Duration::from_millis(1100)).await;

    // The index write is the first write after a successful CAS; failing it
    // simulates the crash window
    backend.fail_on_write(&DatasetPaths::index_key("ds"));

    let source_v2 = json_source(&[
        ("2024-01-10T00:00:00Z", 1.0, "a"),
        ("2024-01-20T00:00:00Z", 2.0, "b"),
    ]);
    let second = driver_for(backend.clone(), source_v2.clone()).run(&config).await;
    assert_eq!(second.status, RunStatus::Error);

    // The pointer advanced but the index is stale
    let pointer = store.read_pointer("ds").await.unwrap().expect("pointer");
    assert_eq!(pointer.current_version, second.version_ts);
    assert_eq!(store.read_index("ds").await.unwrap().unwrap().len(), 1);

    // Next run: guard detects the divergence and rebuilds before anything else
    let third = PipelineDriver::new(
        DatasetStore::new(backend.clone()),
        registry(),
        Arc::new(StaticSource::new(source_v2)),
    )
    .with_guard_config(GuardConfig { tolerance: 0 })
    .run(&config)
    .await;

    // Source unchanged since the crashed run, so nothing new - but the
    // index now reflects both published versions
    assert_eq!(third.status, RunStatus::NoChange);
    assert_eq!(store.read_index("ds").await.unwrap().unwrap().len(), 2);
}

/// Crash during the projection promote: the publish stands, the month stays
/// `in_progress`, and the next consolidation redoes it from events.
#[tokio::test]
async fn crash_mid_consolidation_heals_on_reentry() {
    let backend = Arc::new(FailingBackend::new());
    let store = DatasetStore::new(backend.clone());
    let config = test_config("ds");

    // The promote copy to the visible key fails after .tmp was written
    backend.fail_on_copy_suffix("month=01/data.parquet");

    let report = driver_for(
        backend.clone(),
        json_source(&[("2024-01-10T00:00:00Z", 1.0, "a")]),
    )
    .run(&config)
    .await;

    // Projection failure never retracts the publish
    assert_eq!(report.status, RunStatus::Completed);
    assert!(store.read_pointer("ds").await.unwrap().is_some());

    // WAL state: manifest in_progress, .tmp present, visible key absent
    let manifest = store
        .read_consolidation_manifest("ds", 2024, 1)
        .await
        .unwrap()
        .expect("manifest");
    assert!(!manifest.is_completed());
    assert!(store
        .backend()
        .head(&DatasetPaths::projection_temp_key("ds", 2024, 1))
        .await
        .unwrap()
        .is_some());
    assert!(store
        .backend()
        .head(&DatasetPaths::projection_key("ds", 2024, 1))
        .await
        .unwrap()
        .is_none());

    // Re-entry (restart path, not forced): cleans temp, redoes the month
    Consolidator::new(store.clone())
        .consolidate_month(&config, 2024, 1, false)
        .await
        .expect("reconsolidate");

    assert!(store
        .read_consolidation_manifest("ds", 2024, 1)
        .await
        .unwrap()
        .expect("manifest")
        .is_completed());
    let projection = store
        .read_event_rows(&DatasetPaths::projection_key("ds", 2024, 1))
        .await
        .unwrap();
    assert_eq!(projection.len(), 1);
    assert!(store
        .backend()
        .head(&DatasetPaths::projection_temp_key("ds", 2024, 1))
        .await
        .unwrap()
        .is_none());
}

/// A completed month that is not re-touched is skipped on restart.
#[tokio::test]
async fn completed_month_is_not_redone_on_restart() {
    let backend = Arc::new(FailingBackend::new());
    let store = DatasetStore::new(backend.clone());
    let config = test_config("ds");

    let report = driver_for(
        backend.clone(),
        json_source(&[("2024-01-10T00:00:00Z", 1.0, "a")]),
    )
    .run(&config)
    .await;
    assert_eq!(report.status, RunStatus::Completed);

    let bytes_before = store
        .backend()
        .get(&DatasetPaths::projection_key("ds", 2024, 1))
        .await
        .unwrap();

    // Restart path consolidation: month already completed, nothing touched
    Consolidator::new(store.clone())
        .consolidate_month(&config, 2024, 1, false)
        .await
        .expect("skip");

    let bytes_after = store
        .backend()
        .get(&DatasetPaths::projection_key("ds", 2024, 1))
        .await
        .unwrap();
    assert_eq!(bytes_before, bytes_after);
}

/// Event objects are never rewritten by later runs (bit-exact immutability).
#[tokio::test]
async fn published_events_are_immutable_across_runs() {
    let backend = Arc::new(FailingBackend::new());
    let store = DatasetStore::new(backend.clone());
    let config = test_config("ds");

    let first = driver_for(
        backend.clone(),
        json_source(&[("2024-01-10T00:00:00Z", 1.0, "a")]),
    )
    .run(&config)
    .await;
    assert_eq!(first.status, RunStatus::Completed);

    let first_event_key = format!(
        "datasets/ds/events/{}/data/year=2024/month=01/part-0.parquet",
        first.version_ts
    );
    let bytes_before = store.backend().get(&first_event_key).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let second = driver_for(
        backend.clone(),
        json_source(&[
            ("2024-01-10T00:00:00Z", 1.0, "a"),
            ("2024-01-20T00:00:00Z", 2.0, "b"),
        ]),
    )
    .run(&config)
    .await;
    assert_eq!(second.status, RunStatus::Completed);

    let bytes_after = store.backend().get(&first_event_key).await.unwrap();
    assert_eq!(bytes_before, bytes_after, "event bytes must never change");
}
