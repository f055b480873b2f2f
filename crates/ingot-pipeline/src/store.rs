//! Typed dataset store over the object-storage backend.
//!
//! `DatasetStore` composes the storage backend with the canonical key
//! layout and the JSON/Parquet codecs, so pipeline components read and
//! write typed documents instead of raw bytes. It adds no policy of its
//! own: CAS decisions, rollback and ordering all live in the components.

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use ingot_core::paths::DatasetPaths;
use ingot_core::row::Row;
use ingot_core::storage::{Etag, PutCondition, PutOutcome, StorageBackend};
use ingot_core::Error as CoreError;

use crate::error::{PipelineError, Result};
use crate::manifest::{
    ConsolidationManifest, ConsolidationStatus, EventIndex, EventManifest, PointerManifest,
};
use crate::parquet_util;

/// Typed facade over the object store for one deployment.
#[derive(Clone)]
pub struct DatasetStore {
    storage: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for DatasetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetStore").finish_non_exhaustive()
    }
}

impl DatasetStore {
    /// Creates a store over the given backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Returns the underlying backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    // =========================================================================
    // Raw helpers
    // =========================================================================

    /// Reads a JSON document, returning `None` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or malformed JSON.
    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.storage.get(key).await {
            Ok(bytes) => {
                let value =
                    serde_json::from_slice(&bytes).map_err(|e| PipelineError::Serialization {
                        message: format!("failed to parse '{key}': {e}"),
                    })?;
                Ok(Some(value))
            }
            Err(CoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a JSON document unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error on storage or serialization failure.
    pub async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| PipelineError::Serialization {
            message: format!("failed to serialize '{key}': {e}"),
        })?;
        self.storage
            .put(key, Bytes::from(bytes), PutCondition::Always)
            .await?;
        Ok(())
    }

    /// Lists keys under a prefix, sorted lexicographically.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = self.storage.list(prefix).await?;
        // Backends promise no ordering - sort explicitly
        keys.sort();
        Ok(keys)
    }

    /// Deletes a key (idempotent).
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.storage.delete(key).await?;
        Ok(())
    }

    /// Copies an object within the store.
    ///
    /// # Errors
    ///
    /// Returns an error when the source is missing or storage fails.
    pub async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        self.storage.copy(src, dst).await?;
        Ok(())
    }

    // =========================================================================
    // Pointer
    // =========================================================================

    /// Reads the pointer, if published.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or malformed JSON.
    pub async fn read_pointer(&self, dataset_id: &str) -> Result<Option<PointerManifest>> {
        self.read_json(&DatasetPaths::current_manifest_key(dataset_id))
            .await
    }

    /// Returns the pointer's live ETag, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn pointer_etag(&self, dataset_id: &str) -> Result<Option<Etag>> {
        Ok(self
            .storage
            .head(&DatasetPaths::current_manifest_key(dataset_id))
            .await?)
    }

    /// Writes the pointer under the given condition (the CAS).
    ///
    /// # Errors
    ///
    /// Returns an error on storage or serialization failure. A failed
    /// condition is returned as `PutOutcome::Rejected`.
    pub async fn put_pointer(
        &self,
        pointer: &PointerManifest,
        condition: PutCondition,
    ) -> Result<PutOutcome> {
        let key = DatasetPaths::current_manifest_key(&pointer.dataset_id);
        let bytes = serde_json::to_vec_pretty(pointer).map_err(|e| {
            PipelineError::Serialization {
                message: format!("failed to serialize pointer: {e}"),
            }
        })?;
        Ok(self
            .storage
            .put(&key, Bytes::from(bytes), condition)
            .await?)
    }

    // =========================================================================
    // Event manifests & partitions
    // =========================================================================

    /// Reads the manifest of one event version.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or malformed JSON.
    pub async fn read_event_manifest(
        &self,
        dataset_id: &str,
        version_ts: &str,
    ) -> Result<Option<EventManifest>> {
        self.read_json(&DatasetPaths::event_manifest_key(dataset_id, version_ts))
            .await
    }

    /// Writes the manifest of one event version.
    ///
    /// # Errors
    ///
    /// Returns an error on storage or serialization failure.
    pub async fn write_event_manifest(&self, manifest: &EventManifest) -> Result<()> {
        let key = DatasetPaths::event_manifest_key(&manifest.dataset_id, &manifest.version);
        self.write_json(&key, manifest).await
    }

    /// Reads one event partition (or projection) into rows.
    ///
    /// # Errors
    ///
    /// Returns an error when the key is missing, storage fails, or the
    /// payload is not a valid row file.
    pub async fn read_event_rows(&self, key: &str) -> Result<Vec<Row>> {
        let bytes = self.storage.get(key).await?;
        parquet_util::read_rows(&bytes)
    }

    /// Writes rows as one event partition (or projection).
    ///
    /// # Errors
    ///
    /// Returns an error on encoding or storage failure.
    pub async fn write_event_rows(&self, key: &str, rows: &[Row]) -> Result<()> {
        let bytes = parquet_util::write_rows(rows)?;
        self.storage
            .put(key, bytes, PutCondition::Always)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Primary-key index
    // =========================================================================

    /// Reads the primary-key index, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or a malformed index file.
    pub async fn read_index(&self, dataset_id: &str) -> Result<Option<Vec<String>>> {
        match self.storage.get(&DatasetPaths::index_key(dataset_id)).await {
            Ok(bytes) => Ok(Some(parquet_util::read_key_index(&bytes)?)),
            Err(CoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrites the primary-key index.
    ///
    /// # Errors
    ///
    /// Returns an error on encoding or storage failure.
    pub async fn write_index(&self, dataset_id: &str, hashes: &[String]) -> Result<()> {
        let bytes = parquet_util::write_key_index(hashes)?;
        self.storage
            .put(&DatasetPaths::index_key(dataset_id), bytes, PutCondition::Always)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Event index (per month)
    // =========================================================================

    /// Reads the per-month event index, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or malformed JSON.
    pub async fn read_event_index(
        &self,
        dataset_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Option<EventIndex>> {
        self.read_json(&DatasetPaths::event_index_key(dataset_id, year, month))
            .await
    }

    /// Writes the per-month event index.
    ///
    /// # Errors
    ///
    /// Returns an error on storage or serialization failure.
    pub async fn write_event_index(&self, index: &EventIndex) -> Result<()> {
        let key = DatasetPaths::event_index_key(&index.dataset_id, index.year, index.month);
        self.write_json(&key, index).await
    }

    // =========================================================================
    // Consolidation manifests
    // =========================================================================

    /// Reads the per-month consolidation manifest, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure or malformed JSON.
    pub async fn read_consolidation_manifest(
        &self,
        dataset_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Option<ConsolidationManifest>> {
        self.read_json(&DatasetPaths::consolidation_manifest_key(
            dataset_id, year, month,
        ))
        .await
    }

    /// Writes the per-month consolidation status.
    ///
    /// # Errors
    ///
    /// Returns an error on storage or serialization failure.
    pub async fn write_consolidation_status(
        &self,
        dataset_id: &str,
        year: i32,
        month: u32,
        status: ConsolidationStatus,
    ) -> Result<()> {
        let manifest = ConsolidationManifest::new(dataset_id, year, month, status);
        self.write_json(
            &DatasetPaths::consolidation_manifest_key(dataset_id, year, month),
            &manifest,
        )
        .await
    }

    // =========================================================================
    // Run staging
    // =========================================================================

    /// Stages the raw source bytes for a run, returning the staging key.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn stage_raw_source(
        &self,
        dataset_id: &str,
        run_id: &str,
        filename: &str,
        content: Bytes,
    ) -> Result<String> {
        let key = DatasetPaths::run_raw_key(dataset_id, run_id, filename);
        self.storage
            .put(&key, content, PutCondition::Always)
            .await?;
        Ok(key)
    }
}
