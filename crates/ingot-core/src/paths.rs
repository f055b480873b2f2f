//! Canonical object-store key layout for a dataset.
//!
//! This module is the **single source of truth** for all dataset storage
//! keys. All writers must use these functions to construct keys; no
//! hardcoded key strings should exist outside this module.
//!
//! # Key Layout
//!
//! ```text
//! datasets/{dataset_id}/
//! ├── configs/config.yaml
//! ├── current/manifest.json                  # pointer, CAS target
//! ├── index/keys.parquet                     # primary-key hash index
//! ├── events/
//! │   ├── {version_ts}/
//! │   │   ├── manifest.json
//! │   │   └── data/year=YYYY/month=MM/part-0.parquet
//! │   └── index/YYYY/MM/versions.json        # per-month event index
//! ├── projections/
//! │   ├── windows/year=YYYY/month=MM/data.parquet
//! │   │   └── .tmp/data.parquet              # WAL staging
//! │   └── consolidation/YYYY/MM/manifest.json
//! └── runs/{run_id}/raw/{filename}           # fetched source staging
//! ```
//!
//! `version_ts` has the form `YYYY-MM-DDTHH-MM-SS` (UTC, `:` replaced with
//! `-`) so lexicographic key order equals temporal order.

/// Canonical key generator for dataset storage.
///
/// All key generation goes through this struct to keep writers, the guard
/// and the consolidator in agreement about the layout.
pub struct DatasetPaths;

impl DatasetPaths {
    // =========================================================================
    // Dataset roots
    // =========================================================================

    /// Returns the root prefix for a dataset.
    #[must_use]
    pub fn dataset_root(dataset_id: &str) -> String {
        format!("datasets/{dataset_id}/")
    }

    /// Returns the informational config key.
    #[must_use]
    pub fn config_key(dataset_id: &str) -> String {
        format!("datasets/{dataset_id}/configs/config.yaml")
    }

    // =========================================================================
    // Pointer & index
    // =========================================================================

    /// Returns the pointer key (the single CAS target).
    #[must_use]
    pub fn current_manifest_key(dataset_id: &str) -> String {
        format!("datasets/{dataset_id}/current/manifest.json")
    }

    /// Returns the primary-key index key.
    #[must_use]
    pub fn index_key(dataset_id: &str) -> String {
        format!("datasets/{dataset_id}/index/keys.parquet")
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Returns the prefix all event versions live under.
    #[must_use]
    pub fn events_root(dataset_id: &str) -> String {
        format!("datasets/{dataset_id}/events/")
    }

    /// Returns the data prefix for one event version.
    #[must_use]
    pub fn events_prefix(dataset_id: &str, version_ts: &str) -> String {
        format!("datasets/{dataset_id}/events/{version_ts}/data/")
    }

    /// Returns the event manifest key for a version.
    #[must_use]
    pub fn event_manifest_key(dataset_id: &str, version_ts: &str) -> String {
        format!("datasets/{dataset_id}/events/{version_ts}/manifest.json")
    }

    /// Returns the manifest pointer path for notifications (bucket-relative,
    /// without the `datasets/` prefix).
    #[must_use]
    pub fn event_manifest_pointer(dataset_id: &str, version_ts: &str) -> String {
        format!("{dataset_id}/events/{version_ts}/manifest.json")
    }

    /// Returns the `year=YYYY/month=MM/` partition path segment.
    #[must_use]
    pub fn event_partition_path(year: i32, month: u32) -> String {
        format!("year={year}/month={month:02}/")
    }

    /// Returns the event file key under `prefix`, optionally partitioned.
    #[must_use]
    pub fn event_file_key(prefix: &str, partition_path: Option<&str>) -> String {
        match partition_path {
            Some(partition) => format!("{prefix}{partition}part-0.parquet"),
            None => format!("{prefix}part-0.parquet"),
        }
    }

    /// Returns the per-month event index key.
    #[must_use]
    pub fn event_index_key(dataset_id: &str, year: i32, month: u32) -> String {
        format!("datasets/{dataset_id}/events/index/{year}/{month:02}/versions.json")
    }

    // =========================================================================
    // Projections
    // =========================================================================

    /// Returns the per-month projection key.
    #[must_use]
    pub fn projection_key(dataset_id: &str, year: i32, month: u32) -> String {
        format!("datasets/{dataset_id}/projections/windows/year={year}/month={month:02}/data.parquet")
    }

    /// Returns the per-month projection WAL staging key.
    #[must_use]
    pub fn projection_temp_key(dataset_id: &str, year: i32, month: u32) -> String {
        format!(
            "datasets/{dataset_id}/projections/windows/year={year}/month={month:02}/.tmp/data.parquet"
        )
    }

    /// Returns the prefix all projection windows live under.
    #[must_use]
    pub fn projections_root(dataset_id: &str) -> String {
        format!("datasets/{dataset_id}/projections/windows/")
    }

    /// Returns the per-month consolidation manifest key.
    #[must_use]
    pub fn consolidation_manifest_key(dataset_id: &str, year: i32, month: u32) -> String {
        format!("datasets/{dataset_id}/projections/consolidation/{year}/{month:02}/manifest.json")
    }

    // =========================================================================
    // Run staging & lock
    // =========================================================================

    /// Returns the raw source staging key for a run.
    #[must_use]
    pub fn run_raw_key(dataset_id: &str, run_id: &str, filename: &str) -> String {
        format!("datasets/{dataset_id}/runs/{run_id}/raw/{filename}")
    }

    /// Returns the lock key for a dataset's pipeline runs.
    #[must_use]
    pub fn pipeline_lock_key(dataset_id: &str) -> String {
        format!("pipeline:{dataset_id}")
    }

    /// Extracts the `version_ts` segment from an event key, if present.
    ///
    /// Works for any key of the form `datasets/{id}/events/{version_ts}/...`
    /// that is not under the `events/index/` prefix.
    #[must_use]
    pub fn version_from_event_key(key: &str) -> Option<&str> {
        let mut parts = key.split('/');
        while let Some(part) = parts.next() {
            if part == "events" {
                return match parts.next() {
                    Some("index") | Some("") | None => None,
                    Some(version) => Some(version),
                };
            }
        }
        None
    }
}
