//! Projection consolidator: WAL-staged per-month read models.
//!
//! For each month touched by a published delta, the consolidator rebuilds
//! `projections/windows/year=YYYY/month=MM/data.parquet` from *all* events
//! for that month, deduplicated on primary keys keeping the last occurrence
//! in event-time order. The rebuild is idempotent and crash-safe:
//!
//! 1. delete leftovers under `.tmp/`
//! 2. write the consolidation manifest as `in_progress`
//! 3. enumerate event partitions (event index fast path, listing fallback)
//! 4. read, concatenate in version order, dedupe
//! 5. write to `.tmp/data.parquet`
//! 6. promote: copy `.tmp` to the visible key, then delete `.tmp`
//! 7. write the manifest as `completed`
//!
//! A crash anywhere in 3-6 leaves the manifest `in_progress`; the next run
//! re-enters and redoes the month from events. Readers only look at the
//! non-`.tmp` key, so copy-then-delete is atomic enough for them.

use std::collections::HashMap;

use tracing::Instrument as _;

use ingot_core::config::DatasetConfig;
use ingot_core::observability::consolidation_span;
use ingot_core::paths::DatasetPaths;
use ingot_core::row::Row;

use crate::delta::compute_key_hash;
use crate::error::Result;
use crate::manifest::{ConsolidationStatus, EventIndex};
use crate::store::DatasetStore;

/// Rebuilds per-month projections from events.
pub struct Consolidator {
    store: DatasetStore,
}

impl Consolidator {
    /// Creates a new consolidator.
    #[must_use]
    pub fn new(store: DatasetStore) -> Self {
        Self { store }
    }

    /// Consolidates every month in `months` (the months the just-published
    /// delta touched).
    ///
    /// Failures are contained per month: a failed month logs and leaves its
    /// manifest `in_progress` for the next run; remaining months still
    /// consolidate. Projection failure never retracts a publish.
    pub async fn consolidate_months(&self, config: &DatasetConfig, months: &[(i32, u32)]) {
        if months.is_empty() {
            return;
        }
        tracing::info!(
            dataset_id = %config.dataset_id,
            months = months.len(),
            "consolidating projections"
        );

        for &(year, month) in months {
            let span = consolidation_span(&config.dataset_id, year, month);

            // Months touched by new data always re-consolidate; the
            // completed-skip only protects untouched months on restart
            if let Err(e) = self
                .consolidate_month(config, year, month, true)
                .instrument(span)
                .await
            {
                tracing::error!(
                    dataset_id = %config.dataset_id,
                    year,
                    month,
                    error = %e,
                    "failed to consolidate month"
                );
            }
        }
    }

    /// Consolidates a single month.
    ///
    /// With `force` false, a month whose manifest is already `completed` is
    /// skipped (restart idempotence). With `force` true the month is redone
    /// regardless, which is what a fresh publish into the month requires.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure; the consolidation manifest is
    /// left `in_progress` so the next run self-heals.
    pub async fn consolidate_month(
        &self,
        config: &DatasetConfig,
        year: i32,
        month: u32,
        force: bool,
    ) -> Result<()> {
        let dataset_id = &config.dataset_id;

        if !force {
            let already_done = self
                .store
                .read_consolidation_manifest(dataset_id, year, month)
                .await?
                .is_some_and(|m| m.is_completed());
            if already_done {
                tracing::info!(year, month, "skipping month (already consolidated)");
                return Ok(());
            }
        }

        self.cleanup_temp(dataset_id, year, month).await;
        self.store
            .write_consolidation_status(dataset_id, year, month, ConsolidationStatus::InProgress)
            .await?;

        let mut event_keys = self.list_events_for_month(dataset_id, year, month).await?;

        // Projections cover events up to the published version only; orphan
        // versions from a lost CAS stay invisible here as everywhere else
        if let Some(pointer) = self.store.read_pointer(dataset_id).await? {
            let current = pointer.current_version;
            event_keys.retain(|key| {
                DatasetPaths::version_from_event_key(key)
                    .is_some_and(|version| version <= current.as_str())
            });
        }

        if event_keys.is_empty() {
            tracing::warn!(year, month, "no events found for month, nothing to write");
            // Nothing to project; complete so restarts don't re-enter forever
            self.store
                .write_consolidation_status(dataset_id, year, month, ConsolidationStatus::Completed)
                .await?;
            return Ok(());
        }

        let consolidated = self
            .read_and_deduplicate(&event_keys, &config.normalize.primary_keys)
            .await?;

        // WAL: stage under .tmp, then promote
        let temp_key = DatasetPaths::projection_temp_key(dataset_id, year, month);
        let final_key = DatasetPaths::projection_key(dataset_id, year, month);
        self.store.write_event_rows(&temp_key, &consolidated).await?;
        self.store.copy(&temp_key, &final_key).await?;
        if let Err(e) = self.store.delete(&temp_key).await {
            tracing::warn!(key = %temp_key, error = %e, "temp delete failed");
        }

        self.store
            .write_consolidation_status(dataset_id, year, month, ConsolidationStatus::Completed)
            .await?;
        self.cleanup_temp(dataset_id, year, month).await;

        tracing::info!(year, month, rows = consolidated.len(), "month consolidated");
        Ok(())
    }

    /// Enumerates event partition keys for a month, version-ascending.
    ///
    /// Fast path reads the per-month event index. When the index is absent
    /// (or lost to a concurrent-writer race), falls back to listing all
    /// event objects filtered by partition suffix, and repairs the index
    /// from what the listing found.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn list_events_for_month(
        &self,
        dataset_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Vec<String>> {
        if let Some(index) = self.store.read_event_index(dataset_id, year, month).await? {
            let partition = DatasetPaths::event_partition_path(year, month);
            let mut keys: Vec<String> = index
                .versions
                .iter()
                .map(|version| {
                    DatasetPaths::event_file_key(
                        &DatasetPaths::events_prefix(dataset_id, version),
                        Some(&partition),
                    )
                })
                .collect();
            keys.sort();
            return Ok(keys);
        }

        // Fallback: list everything under events/ and filter by suffix
        tracing::info!(year, month, "event index missing, listing events");
        let partition_suffix = format!(
            "{}part-0.parquet",
            DatasetPaths::event_partition_path(year, month)
        );
        let mut keys: Vec<String> = self
            .store
            .list_keys(&DatasetPaths::events_root(dataset_id))
            .await?
            .into_iter()
            .filter(|key| key.ends_with(&partition_suffix))
            .collect();
        keys.sort();

        // Repair the index so the next consolidation takes the fast path
        if !keys.is_empty() {
            let versions: Vec<String> = keys
                .iter()
                .filter_map(|key| DatasetPaths::version_from_event_key(key))
                .map(String::from)
                .collect();
            if !versions.is_empty() {
                let index = EventIndex::build(dataset_id, year, month, versions);
                self.store.write_event_index(&index).await?;
            }
        }

        Ok(keys)
    }

    /// Reads all partitions, concatenates in event order and deduplicates
    /// on primary keys keeping the last occurrence.
    async fn read_and_deduplicate(
        &self,
        event_keys: &[String],
        primary_keys: &[String],
    ) -> Result<Vec<Row>> {
        let mut all_rows: Vec<Row> = Vec::new();
        for key in event_keys {
            match self.store.read_event_rows(key).await {
                Ok(rows) => all_rows.extend(rows),
                Err(e) => {
                    // A listed-but-unreadable partition (e.g. rolled back
                    // mid-listing) must not poison the whole month
                    tracing::warn!(key = %key, error = %e, "failed to read event partition");
                }
            }
        }

        // Last occurrence wins; event_keys are version-ascending so later
        // versions overwrite earlier ones for the same key
        let mut winner_by_key: HashMap<String, Row> = HashMap::new();
        for row in all_rows {
            let hash = compute_key_hash(&row, primary_keys)?;
            winner_by_key.insert(hash, row);
        }

        // Deterministic output order so reruns are byte-identical
        let mut consolidated: Vec<Row> = winner_by_key.into_values().collect();
        consolidated.sort_by(|a, b| {
            (&a.internal_series_code, a.obs_time, a.obs_date).cmp(&(
                &b.internal_series_code,
                b.obs_time,
                b.obs_date,
            ))
        });
        Ok(consolidated)
    }

    /// Best-effort removal of everything under the month's `.tmp/` prefix.
    async fn cleanup_temp(&self, dataset_id: &str, year: i32, month: u32) {
        let temp_marker = format!(
            "year={year}/month={month:02}/.tmp/"
        );
        let keys = match self
            .store
            .list_keys(&DatasetPaths::projections_root(dataset_id))
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "temp cleanup listing failed");
                return;
            }
        };

        for key in keys.iter().filter(|k| k.contains(&temp_marker)) {
            if let Err(e) = self.store.delete(key).await {
                tracing::warn!(key = %key, error = %e, "temp cleanup delete failed");
            }
        }
    }
}
