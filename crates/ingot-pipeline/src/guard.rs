//! Consistency guard: detects and repairs pointer/index divergence.
//!
//! The publish protocol writes the primary-key index strictly after the
//! pointer CAS, so a crash in between leaves a pointer that references
//! more (or newer) keys than the index holds. This guard runs at the start
//! of every pipeline invocation, before delta computation:
//!
//! - `verify` compares index cardinality against the current event
//!   manifest's `rows_total`, within a tolerance
//! - `rebuild_from_pointer` regenerates the index from every event
//!   partition with `version_ts <= current_version`
//!
//! Rebuild is the only self-healing mechanism in the system. It relies on
//! the `version_ts` key format: lexicographic order of event prefixes
//! equals temporal order.

use std::collections::HashSet;

use ingot_core::paths::DatasetPaths;

use crate::delta::compute_key_hash;
use crate::error::Result;
use crate::store::DatasetStore;

/// Tuning for the divergence check.
#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    /// Allowed absolute difference between index cardinality and the
    /// manifest's `rows_total`.
    ///
    /// Accommodates primary-key-hash collisions and dedup differences
    /// across runs. Nonzero drift inside the tolerance is logged as a
    /// warning; do not raise the default without empirical justification.
    pub tolerance: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self { tolerance: 10 }
    }
}

/// Result of a consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyStatus {
    /// Pointer and index agree (within tolerance).
    Consistent,
    /// Pointer and index diverged; a rebuild is needed.
    Inconsistent,
}

/// Pointer/index consistency guard.
pub struct ConsistencyGuard {
    store: DatasetStore,
    config: GuardConfig,
}

impl ConsistencyGuard {
    /// Creates a guard with the default tolerance.
    #[must_use]
    pub fn new(store: DatasetStore) -> Self {
        Self {
            store,
            config: GuardConfig::default(),
        }
    }

    /// Creates a guard with explicit tuning.
    #[must_use]
    pub fn with_config(store: DatasetStore, config: GuardConfig) -> Self {
        Self { store, config }
    }

    /// Checks whether the pointer and the primary-key index agree.
    ///
    /// With no pointer, the dataset is consistent iff the index is empty
    /// or absent. With a pointer, the index cardinality must match the
    /// current event manifest's `rows_total` within the tolerance; a
    /// missing manifest or missing index is inconsistent.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn verify(&self, dataset_id: &str) -> Result<ConsistencyStatus> {
        let Some(pointer) = self.store.read_pointer(dataset_id).await? else {
            let index = self.store.read_index(dataset_id).await?;
            return Ok(match index {
                None => ConsistencyStatus::Consistent,
                Some(hashes) if hashes.is_empty() => ConsistencyStatus::Consistent,
                Some(_) => ConsistencyStatus::Inconsistent,
            });
        };

        let Some(manifest) = self
            .store
            .read_event_manifest(dataset_id, &pointer.current_version)
            .await?
        else {
            tracing::warn!(
                dataset_id,
                version = %pointer.current_version,
                "pointer references a version without a manifest"
            );
            return Ok(ConsistencyStatus::Inconsistent);
        };

        let Some(index) = self.store.read_index(dataset_id).await? else {
            return Ok(ConsistencyStatus::Inconsistent);
        };

        let index_rows = index.len() as u64;
        let expected_rows = manifest.outputs.rows_total;
        let drift = index_rows.abs_diff(expected_rows);

        if drift > self.config.tolerance {
            return Ok(ConsistencyStatus::Inconsistent);
        }
        if drift > 0 {
            tracing::warn!(
                dataset_id,
                index_rows,
                expected_rows,
                drift,
                "pointer/index drift within tolerance"
            );
        }
        Ok(ConsistencyStatus::Consistent)
    }

    /// Rebuilds the primary-key index from events.
    ///
    /// Reads every event partition with `version_ts <= current_version`,
    /// recomputes the key hash over the manifest's primary-key columns,
    /// unions and deduplicates, then overwrites `index/keys.parquet`.
    /// A dataset without a pointer has nothing to rebuild.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or when an event partition
    /// cannot be decoded.
    pub async fn rebuild_from_pointer(&self, dataset_id: &str) -> Result<()> {
        let Some(pointer) = self.store.read_pointer(dataset_id).await? else {
            return Ok(());
        };
        let current_version = pointer.current_version;

        let Some(manifest) = self
            .store
            .read_event_manifest(dataset_id, &current_version)
            .await?
        else {
            tracing::warn!(
                dataset_id,
                version = %current_version,
                "cannot rebuild: current version has no manifest"
            );
            return Ok(());
        };
        let primary_keys = manifest.index.key_columns;

        tracing::info!(
            dataset_id,
            version = %current_version,
            "rebuilding primary-key index from events"
        );

        // Collect all partition keys for versions <= current, in version order
        let all_keys = self
            .store
            .list_keys(&DatasetPaths::events_root(dataset_id))
            .await?;

        let mut partition_keys: Vec<&String> = all_keys
            .iter()
            .filter(|key| key.ends_with(".parquet"))
            .filter(|key| {
                DatasetPaths::version_from_event_key(key)
                    .is_some_and(|version| version <= current_version.as_str())
            })
            .collect();
        partition_keys.sort();

        let mut seen: HashSet<String> = HashSet::new();
        let mut hashes: Vec<String> = Vec::new();

        for key in partition_keys {
            let rows = self.store.read_event_rows(key).await?;
            for row in &rows {
                let hash = compute_key_hash(row, &primary_keys)?;
                if seen.insert(hash.clone()) {
                    hashes.push(hash);
                }
            }
        }

        self.store.write_index(dataset_id, &hashes).await?;
        tracing::info!(dataset_id, keys = hashes.len(), "index rebuilt");
        Ok(())
    }

    /// Verifies and rebuilds when inconsistent. Returns whether a rebuild
    /// ran. Inconsistency is not an error; the pipeline continues.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure during verify or rebuild.
    pub async fn ensure_consistent(&self, dataset_id: &str) -> Result<bool> {
        match self.verify(dataset_id).await? {
            ConsistencyStatus::Consistent => Ok(false),
            ConsistencyStatus::Inconsistent => {
                tracing::warn!(dataset_id, "pointer/index divergence detected, rebuilding");
                self.rebuild_from_pointer(dataset_id).await?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_writer::EventWriter;
    use crate::manifest::{EventManifest, PointerManifest, SourceFileInfo};
    use chrono::{TimeZone, Utc};
    use ingot_core::row::Row;
    use ingot_core::storage::{MemoryBackend, PutCondition};
    use std::sync::Arc;

    fn store() -> DatasetStore {
        DatasetStore::new(Arc::new(MemoryBackend::new()))
    }

    fn row(day: u32, series: &str) -> Row {
        let t = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        let mut r = Row::observation(Some(t), f64::from(day), series);
        r.version = "2024-02-01T00-00-00".into();
        r
    }

    async fn seed_version(
        store: &DatasetStore,
        version_ts: &str,
        rows: &[Row],
        rows_total: u64,
        set_pointer: bool,
    ) {
        let writer = EventWriter::new(store.clone());
        let keys = writer
            .write_events("ds", version_ts, rows)
            .await
            .expect("write events");

        let manifest = EventManifest::build(
            "ds",
            version_ts,
            SourceFileInfo {
                path: None,
                sha256: "00".repeat(32),
                size: 1,
            },
            keys,
            rows.len() as u64,
            rows_total,
            vec!["obs_time".into(), "internal_series_code".into()],
        );
        store.write_event_manifest(&manifest).await.expect("manifest");

        if set_pointer {
            store
                .put_pointer(
                    &PointerManifest {
                        dataset_id: "ds".into(),
                        current_version: version_ts.into(),
                    },
                    PutCondition::Always,
                )
                .await
                .expect("pointer");
        }
    }

    #[tokio::test]
    async fn no_pointer_no_index_is_consistent() {
        let store = store();
        let guard = ConsistencyGuard::new(store);
        assert_eq!(
            guard.verify("ds").await.expect("verify"),
            ConsistencyStatus::Consistent
        );
    }

    #[tokio::test]
    async fn no_pointer_with_index_is_inconsistent() {
        let store = store();
        store.write_index("ds", &["a".into()]).await.expect("index");

        let guard = ConsistencyGuard::new(store);
        assert_eq!(
            guard.verify("ds").await.expect("verify"),
            ConsistencyStatus::Inconsistent
        );
    }

    #[tokio::test]
    async fn matching_counts_are_consistent() {
        let store = store();
        seed_version(&store, "2024-02-01T00-00-00", &[row(1, "s1"), row(2, "s1")], 2, true).await;
        store
            .write_index("ds", &["h1".into(), "h2".into()])
            .await
            .expect("index");

        let guard = ConsistencyGuard::new(store);
        assert_eq!(
            guard.verify("ds").await.expect("verify"),
            ConsistencyStatus::Consistent
        );
    }

    #[tokio::test]
    async fn missing_index_with_pointer_is_inconsistent() {
        let store = store();
        seed_version(&store, "2024-02-01T00-00-00", &[row(1, "s1")], 1, true).await;

        let guard = ConsistencyGuard::new(store.clone());
        assert_eq!(
            guard.verify("ds").await.expect("verify"),
            ConsistencyStatus::Inconsistent
        );
    }

    #[tokio::test]
    async fn drift_beyond_tolerance_is_inconsistent() {
        let store = store();
        seed_version(&store, "2024-02-01T00-00-00", &[row(1, "s1")], 100, true).await;
        store.write_index("ds", &["h1".into()]).await.expect("index");

        let guard = ConsistencyGuard::new(store.clone());
        assert_eq!(
            guard.verify("ds").await.expect("verify"),
            ConsistencyStatus::Inconsistent
        );

        // With a huge tolerance the same state verifies clean
        let lenient =
            ConsistencyGuard::with_config(store, GuardConfig { tolerance: 1000 });
        assert_eq!(
            lenient.verify("ds").await.expect("verify"),
            ConsistencyStatus::Consistent
        );
    }

    #[tokio::test]
    async fn rebuild_regenerates_index_from_events() {
        let store = store();
        let rows = vec![row(1, "s1"), row(2, "s1"), row(3, "s2")];
        seed_version(&store, "2024-02-01T00-00-00", &rows, 3, true).await;

        // Simulate the crash window: pointer advanced, index never written
        let guard = ConsistencyGuard::new(store.clone());
        let rebuilt = guard.ensure_consistent("ds").await.expect("ensure");
        assert!(rebuilt);

        let index = store.read_index("ds").await.expect("read").expect("some");
        assert_eq!(index.len(), 3);

        // Now consistent; a second pass does nothing
        assert!(!guard.ensure_consistent("ds").await.expect("ensure"));
    }

    #[tokio::test]
    async fn rebuild_ignores_versions_beyond_pointer() {
        let store = store();
        seed_version(&store, "2024-02-01T00-00-00", &[row(1, "s1")], 1, true).await;
        // A later orphaned version (lost CAS) must not leak into the index
        seed_version(&store, "2024-03-01T00-00-00", &[row(2, "s1")], 2, false).await;

        let guard = ConsistencyGuard::new(store.clone());
        guard.rebuild_from_pointer("ds").await.expect("rebuild");

        let index = store.read_index("ds").await.expect("read").expect("some");
        assert_eq!(index.len(), 1);
    }
}
