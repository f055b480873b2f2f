//! Resolved per-dataset configuration.
//!
//! The pipeline core receives this struct already resolved; YAML loading
//! and credential handling live outside the core. Fields mirror the
//! dataset config document one-to-one so the same serde derives can back a
//! file loader.

use serde::{Deserialize, Serialize};

/// Where source bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOrigin {
    /// Fetched over HTTP.
    Http,
    /// Read from a local file.
    Local,
}

/// Source section of the dataset config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Origin of the source bytes.
    pub kind: SourceOrigin,
    /// Source URL (required for `Http`).
    #[serde(default)]
    pub url: Option<String>,
    /// File format tag (e.g. "csv", "xlsx"); informs parser selection.
    #[serde(default)]
    pub format: Option<String>,
    /// Sheet name for workbook formats.
    #[serde(default)]
    pub sheet: Option<String>,
    /// Header row index for tabular formats.
    #[serde(default)]
    pub header_row: Option<u32>,
}

/// Parse section of the dataset config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseConfig {
    /// Parser plugin tag.
    #[serde(default)]
    pub plugin: Option<String>,
}

/// Normalization section of the dataset config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Normalizer plugin tag.
    #[serde(default)]
    pub plugin: Option<String>,
    /// Primary-key columns used for delta hashing and dedup.
    pub primary_keys: Vec<String>,
    /// IANA timezone applied to naive observation times.
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Notification section of the dataset config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Downstream topic to announce publishes on; `None` disables.
    #[serde(default)]
    pub topic: Option<String>,
}

/// Resolved configuration for one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset identifier; namespaces every storage key.
    pub dataset_id: String,
    /// Data provider name, carried onto every published row.
    #[serde(default)]
    pub provider: Option<String>,
    /// Observation frequency tag (e.g. "monthly").
    pub frequency: String,
    /// Measurement unit, carried onto rows lacking one.
    #[serde(default)]
    pub unit: Option<String>,
    /// Publication lag of the source, in days.
    #[serde(default)]
    pub lag_days: i64,
    /// When true, process even if the source fingerprint is unchanged.
    #[serde(default)]
    pub full_reload: bool,
    /// When true, an empty delta still publishes a zero-row version.
    #[serde(default)]
    pub publish_empty_versions: bool,
    /// Source section.
    pub source: SourceConfig,
    /// Parse section.
    #[serde(default)]
    pub parse: ParseConfig,
    /// Normalization section.
    pub normalize: NormalizeConfig,
    /// Notification section.
    #[serde(default)]
    pub notify: Option<NotifyConfig>,
    /// Lock table name; `None` disables locking (runs proceed unguarded).
    #[serde(default)]
    pub lock_table_name: Option<String>,
}

impl DatasetConfig {
    /// Returns the notification topic, if configured.
    #[must_use]
    pub fn notify_topic(&self) -> Option<&str> {
        self.notify.as_ref().and_then(|n| n.topic.as_deref())
    }

    /// Validates invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns an error when `dataset_id` is empty or no primary keys are
    /// configured. A bad config must fail before any write is attempted.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.dataset_id.is_empty() {
            return Err(crate::error::Error::InvalidInput(
                "dataset_id must not be empty".into(),
            ));
        }
        if self.normalize.primary_keys.is_empty() {
            return Err(crate::error::Error::InvalidInput(format!(
                "dataset '{}' has no primary keys configured",
                self.dataset_id
            )));
        }
        Ok(())
    }
}
