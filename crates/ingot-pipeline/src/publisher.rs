//! Publisher: atomic pointer advance via CAS.
//!
//! The publish sequence is the serialization point of the whole pipeline:
//!
//! 1. Write the event manifest (unconditional - invisible until the
//!    pointer references it)
//! 2. Read the pointer's live ETag, or detect its absence
//! 3. CAS the pointer to the new version (`IfMatches`, or `IfAbsent` when
//!    no pointer existed)
//! 4. Only after CAS success, overwrite the primary-key index
//!
//! A lost CAS is a normal outcome: the loser returns `cas_conflict`
//! without touching the index or projections, and its event files remain
//! orphaned but unreachable.

use ingot_core::storage::{PutCondition, PutOutcome as StoragePutOutcome};

use crate::error::Result;
use crate::manifest::{EventManifest, PointerManifest, SourceFileInfo};
use crate::store::DatasetStore;

/// Why a publish did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishSkipReason {
    /// The delta was empty and empty versions are not published.
    EmptyDelta,
    /// Another run advanced the pointer first.
    CasConflict,
}

impl PublishSkipReason {
    /// Returns the wire string used in run reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyDelta => "empty_delta",
            Self::CasConflict => "cas_conflict",
        }
    }
}

/// Outcome of a publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Whether the pointer now references the new version.
    pub published: bool,
    /// Reason when not published.
    pub reason: Option<PublishSkipReason>,
}

impl PublishOutcome {
    fn published() -> Self {
        Self {
            published: true,
            reason: None,
        }
    }

    fn skipped(reason: PublishSkipReason) -> Self {
        Self {
            published: false,
            reason: Some(reason),
        }
    }
}

/// Everything the publisher needs to publish one version.
#[derive(Debug)]
pub struct PublishRequest {
    /// Dataset being published.
    pub dataset_id: String,
    /// Version timestamp of this run.
    pub version_ts: String,
    /// Fingerprint of the fetched source.
    pub source_file: SourceFileInfo,
    /// Keys of the event files written for this version.
    pub event_keys: Vec<String>,
    /// Rows added by this version.
    pub rows_added: u64,
    /// Primary-key columns the hashes were computed over.
    pub primary_keys: Vec<String>,
    /// Index content after merging the delta (written post-CAS).
    pub updated_index: Vec<String>,
    /// When true, a zero-row version is still published.
    pub allow_empty: bool,
}

/// Publishes versions atomically using CAS on the dataset pointer.
pub struct Publisher {
    store: DatasetStore,
}

impl Publisher {
    /// Creates a new publisher.
    #[must_use]
    pub fn new(store: DatasetStore) -> Self {
        Self { store }
    }

    /// Attempts to publish one version.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure. A lost CAS is NOT an error;
    /// it comes back as a `cas_conflict` outcome.
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishOutcome> {
        if request.rows_added == 0 && !request.allow_empty {
            tracing::info!(dataset_id = %request.dataset_id, "skipping publish: 0 rows added");
            return Ok(PublishOutcome::skipped(PublishSkipReason::EmptyDelta));
        }

        tracing::info!(
            dataset_id = %request.dataset_id,
            version_ts = %request.version_ts,
            rows_added = request.rows_added,
            "publishing version"
        );

        // 1. Event manifest: safe to write unconditionally, it lives under
        //    its own version prefix
        let rows_total = request.updated_index.len() as u64;
        let manifest = EventManifest::build(
            &request.dataset_id,
            &request.version_ts,
            request.source_file,
            request.event_keys,
            request.rows_added,
            rows_total,
            request.primary_keys,
        );
        self.store.write_event_manifest(&manifest).await?;

        // 2. Live ETag, or absence
        let condition = match self.store.pointer_etag(&request.dataset_id).await? {
            Some(etag) => PutCondition::IfMatches(etag),
            None => PutCondition::IfAbsent,
        };

        // 3. The CAS
        let pointer = PointerManifest {
            dataset_id: request.dataset_id.clone(),
            current_version: request.version_ts.clone(),
        };
        match self.store.put_pointer(&pointer, condition).await? {
            StoragePutOutcome::Stored(_) => {}
            StoragePutOutcome::Rejected { live_etag } => {
                tracing::warn!(
                    dataset_id = %request.dataset_id,
                    version_ts = %request.version_ts,
                    live_etag = live_etag.as_ref().map_or("<gone>", |e| e.as_str()),
                    "publish lost CAS; pointer unchanged, index not updated"
                );
                return Ok(PublishOutcome::skipped(PublishSkipReason::CasConflict));
            }
        }

        // 4. Index write, only after the CAS succeeded. A crash between the
        //    CAS and this write is the window the consistency guard heals.
        self.store
            .write_index(&request.dataset_id, &request.updated_index)
            .await?;

        tracing::info!(
            dataset_id = %request.dataset_id,
            version_ts = %request.version_ts,
            "published version"
        );
        Ok(PublishOutcome::published())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingot_core::storage::{Etag, MemoryBackend, StorageBackend};
    use std::sync::Arc;

    fn request(version_ts: &str, rows_added: u64, index: Vec<String>) -> PublishRequest {
        PublishRequest {
            dataset_id: "ds".into(),
            version_ts: version_ts.into(),
            source_file: SourceFileInfo {
                path: None,
                sha256: "aa".repeat(32),
                size: 10,
            },
            event_keys: vec![format!("datasets/ds/events/{version_ts}/data/part-0.parquet")],
            rows_added,
            primary_keys: vec!["obs_time".into()],
            updated_index: index,
            allow_empty: false,
        }
    }

    fn publisher() -> (Publisher, DatasetStore) {
        let store = DatasetStore::new(Arc::new(MemoryBackend::new()));
        (Publisher::new(store.clone()), store)
    }

    #[tokio::test]
    async fn first_publish_creates_pointer() {
        let (publisher, store) = publisher();

        let outcome = publisher
            .publish(request("2024-01-15T10-30-00", 3, vec!["a".into(), "b".into(), "c".into()]))
            .await
            .expect("publish");

        assert!(outcome.published);
        let pointer = store.read_pointer("ds").await.expect("read").expect("some");
        assert_eq!(pointer.current_version, "2024-01-15T10-30-00");

        let index = store.read_index("ds").await.expect("read").expect("some");
        assert_eq!(index.len(), 3);

        let manifest = store
            .read_event_manifest("ds", "2024-01-15T10-30-00")
            .await
            .expect("read")
            .expect("some");
        assert_eq!(manifest.outputs.rows_total, 3);
        assert_eq!(manifest.outputs.rows_added_this_version, 3);
    }

    #[tokio::test]
    async fn second_publish_advances_pointer() {
        let (publisher, store) = publisher();

        publisher
            .publish(request("2024-01-15T10-30-00", 1, vec!["a".into()]))
            .await
            .expect("first");
        let outcome = publisher
            .publish(request("2024-01-16T10-30-00", 1, vec!["a".into(), "b".into()]))
            .await
            .expect("second");

        assert!(outcome.published);
        let pointer = store.read_pointer("ds").await.expect("read").expect("some");
        assert_eq!(pointer.current_version, "2024-01-16T10-30-00");
        assert_eq!(
            store.read_index("ds").await.expect("read").expect("some").len(),
            2
        );
    }

    #[tokio::test]
    async fn zero_rows_skips_by_default() {
        let (publisher, store) = publisher();

        let outcome = publisher
            .publish(request("2024-01-15T10-30-00", 0, vec![]))
            .await
            .expect("publish");

        assert!(!outcome.published);
        assert_eq!(outcome.reason, Some(PublishSkipReason::EmptyDelta));
        assert!(store.read_pointer("ds").await.expect("read").is_none());
    }

    #[tokio::test]
    async fn zero_rows_publishes_when_allowed() {
        let (publisher, store) = publisher();

        let mut req = request("2024-01-15T10-30-00", 0, vec![]);
        req.allow_empty = true;
        let outcome = publisher.publish(req).await.expect("publish");

        assert!(outcome.published);
        assert!(store.read_pointer("ds").await.expect("read").is_some());
    }

    /// Backend that advances the pointer right after its ETag is observed,
    /// so the observer's CAS is guaranteed to lose.
    struct RacingBackend {
        inner: MemoryBackend,
        pointer_key: String,
        raced: std::sync::atomic::AtomicBool,
    }

    impl RacingBackend {
        fn new(pointer_key: &str) -> Self {
            Self {
                inner: MemoryBackend::new(),
                pointer_key: pointer_key.to_string(),
                raced: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl ingot_core::storage::StorageBackend for RacingBackend {
        async fn get(&self, key: &str) -> ingot_core::Result<bytes::Bytes> {
            self.inner.get(key).await
        }

        async fn head(&self, key: &str) -> ingot_core::Result<Option<Etag>> {
            let etag = self.inner.head(key).await?;
            if key == self.pointer_key
                && !self.raced.swap(true, std::sync::atomic::Ordering::SeqCst)
            {
                // Competing publish wins between our head and put
                let competing = serde_json::to_vec(&PointerManifest {
                    dataset_id: "ds".into(),
                    current_version: "2024-01-15T11-00-00".into(),
                })
                .expect("serialize");
                self.inner
                    .put(key, bytes::Bytes::from(competing), PutCondition::Always)
                    .await?;
            }
            Ok(etag)
        }

        async fn put(
            &self,
            key: &str,
            body: bytes::Bytes,
            condition: PutCondition,
        ) -> ingot_core::Result<StoragePutOutcome> {
            self.inner.put(key, body, condition).await
        }

        async fn delete(&self, key: &str) -> ingot_core::Result<()> {
            self.inner.delete(key).await
        }

        async fn list(&self, prefix: &str) -> ingot_core::Result<Vec<String>> {
            self.inner.list(prefix).await
        }

        async fn copy(&self, src: &str, dst: &str) -> ingot_core::Result<()> {
            self.inner.copy(src, dst).await
        }
    }

    #[tokio::test]
    async fn lost_cas_leaves_pointer_and_index_alone() {
        let backend = Arc::new(RacingBackend::new("datasets/ds/current/manifest.json"));
        let store = DatasetStore::new(backend);
        let publisher = Publisher::new(store.clone());

        // Seed the index the winner will be credited with
        store.write_index("ds", &["a".into()]).await.expect("seed");

        let outcome = publisher
            .publish(request(
                "2024-01-15T12-00-00",
                1,
                vec!["a".into(), "z".into()],
            ))
            .await
            .expect("publish");

        assert!(!outcome.published);
        assert_eq!(outcome.reason, Some(PublishSkipReason::CasConflict));

        // Loser mutated neither the pointer nor the index
        let pointer = store.read_pointer("ds").await.expect("read").expect("some");
        assert_eq!(pointer.current_version, "2024-01-15T11-00-00");
        let index = store.read_index("ds").await.expect("read").expect("some");
        assert_eq!(index, vec!["a".to_string()]);

        // Loser's event manifest exists but is unreachable from the pointer
        assert!(store
            .read_event_manifest("ds", "2024-01-15T12-00-00")
            .await
            .expect("read")
            .is_some());
    }
}
