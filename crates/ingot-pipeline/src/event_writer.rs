//! Event writer: immutable, per-month Parquet partitions with rollback.
//!
//! An event version is only ever visible through the pointer, so writing
//! its files needs no put condition - but nothing from a failed call may
//! survive it. Two kinds of state are recorded before anything else can
//! fail: every acknowledged partition put, and the pre-image of every
//! per-month event index about to gain this `version_ts`. On any error the
//! recorded partition keys are deleted and the touched indexes are
//! restored to their pre-images (best-effort on both), then the error
//! propagates. A failed `write_events` therefore leaves neither data files
//! nor index entries behind for this version.

use std::collections::BTreeMap;

use ingot_core::paths::DatasetPaths;
use ingot_core::row::Row;

use crate::error::Result;
use crate::manifest::EventIndex;
use crate::store::DatasetStore;

/// Pre-image of one month's event index, kept until the call commits.
struct IndexPreImage {
    year: i32,
    month: u32,
    previous: Option<EventIndex>,
}

/// Writes the event partitions of one version.
pub struct EventWriter {
    store: DatasetStore,
}

impl EventWriter {
    /// Creates a new event writer.
    #[must_use]
    pub fn new(store: DatasetStore) -> Self {
        Self { store }
    }

    /// Writes `rows` as the event payload of `version_ts`.
    ///
    /// Rows are grouped by `(year, month)` derived from `obs_time` (falling
    /// back to `obs_date`) and each non-empty group becomes one partition
    /// file, written in deterministic month order. When no row carries a
    /// date, a single unpartitioned file is written instead.
    ///
    /// Returns the keys of all written files (empty input writes nothing).
    ///
    /// # Errors
    ///
    /// Returns an error if any put or event-index update fails; in that
    /// case every file written by this call has been deleted again and
    /// every event index it touched has been restored.
    pub async fn write_events(
        &self,
        dataset_id: &str,
        version_ts: &str,
        rows: &[Row],
    ) -> Result<Vec<String>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(dataset_id, version_ts, rows = rows.len(), "writing events");

        let prefix = DatasetPaths::events_prefix(dataset_id, version_ts);
        let groups = partition_rows(rows);

        if groups.is_empty() {
            // Dataset without any date column: one unpartitioned file
            let key = DatasetPaths::event_file_key(&prefix, None);
            self.store.write_event_rows(&key, rows).await?;
            return Ok(vec![key]);
        }

        let mut written: Vec<String> = Vec::new();
        let mut touched_indexes: Vec<IndexPreImage> = Vec::new();
        match self
            .write_partitioned(
                dataset_id,
                version_ts,
                &prefix,
                &groups,
                &mut written,
                &mut touched_indexes,
            )
            .await
        {
            Ok(()) => Ok(written),
            Err(e) => {
                self.rollback(dataset_id, &written, &touched_indexes).await;
                Err(e)
            }
        }
    }

    async fn write_partitioned(
        &self,
        dataset_id: &str,
        version_ts: &str,
        prefix: &str,
        groups: &BTreeMap<(i32, u32), Vec<Row>>,
        written: &mut Vec<String>,
        touched_indexes: &mut Vec<IndexPreImage>,
    ) -> Result<()> {
        for ((year, month), group) in groups {
            let partition = DatasetPaths::event_partition_path(*year, *month);
            let key = DatasetPaths::event_file_key(prefix, Some(&partition));

            // Write first; record the key only after the put acknowledged
            self.store.write_event_rows(&key, group).await?;
            written.push(key);
        }

        for (&(year, month), _) in groups {
            let previous = self.store.read_event_index(dataset_id, year, month).await?;

            let mut versions = previous
                .as_ref()
                .map(|index| index.versions.clone())
                .unwrap_or_default();
            if versions.iter().any(|v| v == version_ts) {
                // Listed by an earlier call for the same version; not ours
                // to roll back
                continue;
            }
            versions.push(version_ts.to_string());

            // Record the pre-image before the put so a failure of the put
            // itself also lands in the rollback set
            touched_indexes.push(IndexPreImage {
                year,
                month,
                previous,
            });
            self.store
                .write_event_index(&EventIndex::build(dataset_id, year, month, versions))
                .await?;
        }
        Ok(())
    }

    /// Undoes everything this call managed to write: deletes the partition
    /// files and restores each touched event index to its pre-image
    /// (deleting indexes that did not exist before). Best-effort; individual
    /// failures are logged and skipped.
    async fn rollback(
        &self,
        dataset_id: &str,
        written: &[String],
        touched_indexes: &[IndexPreImage],
    ) {
        tracing::warn!(
            files = written.len(),
            indexes = touched_indexes.len(),
            "rolling back event write"
        );
        for key in written {
            if let Err(e) = self.store.delete(key).await {
                tracing::warn!(key = %key, error = %e, "rollback delete failed");
            }
        }

        // Restoring may clobber a concurrent writer's entry for the same
        // month; the consolidator's listing fallback repairs the index
        for image in touched_indexes {
            let result = match &image.previous {
                Some(index) => self.store.write_event_index(index).await,
                None => {
                    self.store
                        .delete(&DatasetPaths::event_index_key(
                            dataset_id,
                            image.year,
                            image.month,
                        ))
                        .await
                }
            };
            if let Err(e) = result {
                tracing::warn!(
                    year = image.year,
                    month = image.month,
                    error = %e,
                    "rollback of event index failed"
                );
            }
        }
    }
}

/// Groups rows by `(year, month)`, keeping input order within a group.
///
/// Returns an empty map when no row carries a date. Rows without a date
/// are skipped when other rows have one (they cannot be placed in any
/// partition).
fn partition_rows(rows: &[Row]) -> BTreeMap<(i32, u32), Vec<Row>> {
    let mut groups: BTreeMap<(i32, u32), Vec<Row>> = BTreeMap::new();
    let mut skipped = 0usize;

    for row in rows {
        match row.partition_month() {
            Some(month) => groups.entry(month).or_default().push(row.clone()),
            None => skipped += 1,
        }
    }

    if !groups.is_empty() && skipped > 0 {
        tracing::warn!(skipped, "dropped rows without a date from partitioned write");
    }
    groups
}
