//! Manifest and index document types.
//!
//! Four small JSON documents describe the state of a dataset:
//! - the **pointer** `current/manifest.json`, the sole CAS target and the
//!   single source of truth for "latest published version"
//! - the **event manifest** `events/{version_ts}/manifest.json`, describing
//!   one immutable version (partition files, source fingerprints, counts)
//! - the **event index** `events/index/YYYY/MM/versions.json`, an
//!   append-only per-month listing used as a consolidation fast path
//! - the **consolidation manifest**
//!   `projections/consolidation/YYYY/MM/manifest.json`, the per-month WAL
//!   status record
//!
//! Field names are a wire contract shared with readers in other languages;
//! they stay `snake_case` exactly as serialized here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ingot_core::paths::DatasetPaths;

// ============================================================================
// Pointer
// ============================================================================

/// The dataset pointer, updated only by CAS against its ETag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerManifest {
    /// Dataset this pointer belongs to.
    pub dataset_id: String,
    /// Version timestamp of the latest published version.
    pub current_version: String,
}

// ============================================================================
// Event manifest
// ============================================================================

/// Fingerprint of one fetched source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileInfo {
    /// Staging key of the raw source, when staged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// SHA-256 of the source bytes, hex-encoded.
    pub sha256: String,
    /// Source size in bytes.
    pub size: u64,
}

/// Source section of an event manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Fingerprints of the files this version was derived from.
    pub files: Vec<SourceFileInfo>,
}

/// Outputs section of an event manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputsInfo {
    /// Prefix the partition files live under.
    pub data_prefix: String,
    /// Keys of all partition files of this version.
    pub files: Vec<String>,
    /// Total distinct primary keys after this version (index cardinality).
    pub rows_total: u64,
    /// Rows added by this version alone.
    pub rows_added_this_version: u64,
}

/// Index section of an event manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Key of the primary-key index.
    pub path: String,
    /// Primary-key columns the hashes were computed over.
    pub key_columns: Vec<String>,
    /// Name of the hash column in the index file.
    pub hash_column: String,
}

/// Manifest describing one immutable event version.
///
/// Safe to write unconditionally: it lives under its own version prefix and
/// is invisible until the pointer references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventManifest {
    /// Dataset this version belongs to.
    pub dataset_id: String,
    /// Version timestamp.
    pub version: String,
    /// Creation time, RFC 3339.
    pub created_at: DateTime<Utc>,
    /// Source fingerprints.
    pub source: SourceInfo,
    /// Output files and row counts.
    pub outputs: OutputsInfo,
    /// Index description.
    pub index: IndexInfo,
}

impl EventManifest {
    /// Builds the manifest for a version about to be published.
    #[must_use]
    pub fn build(
        dataset_id: &str,
        version_ts: &str,
        source_file: SourceFileInfo,
        event_keys: Vec<String>,
        rows_added: u64,
        rows_total: u64,
        primary_keys: Vec<String>,
    ) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            version: version_ts.to_string(),
            created_at: Utc::now(),
            source: SourceInfo {
                files: vec![source_file],
            },
            outputs: OutputsInfo {
                data_prefix: DatasetPaths::events_prefix(dataset_id, version_ts),
                files: event_keys,
                rows_total,
                rows_added_this_version: rows_added,
            },
            index: IndexInfo {
                path: DatasetPaths::index_key(dataset_id),
                key_columns: primary_keys,
                hash_column: "key_hash".to_string(),
            },
        }
    }

    /// Returns the first source fingerprint, if any.
    #[must_use]
    pub fn source_sha256(&self) -> Option<&str> {
        self.source.files.first().map(|f| f.sha256.as_str())
    }
}

// ============================================================================
// Event index (per month)
// ============================================================================

/// Per-month listing of versions that carry a partition for that month.
///
/// Append-only optimization with no formal invariant under concurrent
/// writers; a missing or stale entry is tolerated because the consolidator
/// falls back to listing and repairs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventIndex {
    /// Dataset this index belongs to.
    pub dataset_id: String,
    /// Year of the month window.
    pub year: i32,
    /// Month of the month window (1-12).
    pub month: u32,
    /// Version timestamps with a partition for this month, sorted.
    pub versions: Vec<String>,
    /// Last update time.
    pub last_updated: DateTime<Utc>,
    /// Number of versions listed.
    pub event_count: usize,
}

impl EventIndex {
    /// Builds an index document from a version list (sorted, deduplicated).
    #[must_use]
    pub fn build(dataset_id: &str, year: i32, month: u32, mut versions: Vec<String>) -> Self {
        versions.sort();
        versions.dedup();
        let event_count = versions.len();
        Self {
            dataset_id: dataset_id.to_string(),
            year,
            month,
            versions,
            last_updated: Utc::now(),
            event_count,
        }
    }
}

// ============================================================================
// Consolidation manifest (per month)
// ============================================================================

/// Status of a per-month consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationStatus {
    /// Rebuild started; a crash here is healed by the next run.
    InProgress,
    /// Projection is complete and visible.
    Completed,
}

/// Per-month consolidation status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationManifest {
    /// Dataset this record belongs to.
    pub dataset_id: String,
    /// Year of the month window.
    pub year: i32,
    /// Month of the month window (1-12).
    pub month: u32,
    /// Current status.
    pub status: ConsolidationStatus,
    /// When the status was written.
    pub timestamp: DateTime<Utc>,
}

impl ConsolidationManifest {
    /// Creates a status record stamped now.
    #[must_use]
    pub fn new(dataset_id: &str, year: i32, month: u32, status: ConsolidationStatus) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            year,
            month,
            status,
            timestamp: Utc::now(),
        }
    }

    /// Returns whether this month is fully consolidated.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == ConsolidationStatus::Completed
    }
}
