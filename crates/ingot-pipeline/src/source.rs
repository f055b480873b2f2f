//! Source capabilities: fetching, change detection, date filtering and the
//! parser/normalizer plugin registry.
//!
//! The pipeline core treats format knowledge as pluggable: a [`Parser`]
//! turns raw bytes into rows, a [`Normalizer`] cleans them up, and both are
//! selected by a string tag from the dataset config out of a
//! [`PluginRegistry`]. Production fetchers (HTTP) and format codecs
//! (Excel/CSV) live outside this crate; [`StaticSource`] and the
//! [`GenericNormalizer`] ship in-tree.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use ingot_core::config::DatasetConfig;
use ingot_core::row::Row;

use crate::error::{PipelineError, Result};
use crate::store::DatasetStore;

// ============================================================================
// Fetching & fingerprints
// ============================================================================

/// Produces the raw source bytes for a run.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetches the source for the dataset.
    async fn fetch(&self, config: &DatasetConfig) -> Result<Bytes>;
}

/// Fetcher that returns a fixed payload; the file-backed and test fetcher.
#[derive(Debug, Clone)]
pub struct StaticSource {
    content: Bytes,
}

impl StaticSource {
    /// Creates a fetcher over fixed content.
    #[must_use]
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl SourceFetcher for StaticSource {
    async fn fetch(&self, _config: &DatasetConfig) -> Result<Bytes> {
        Ok(self.content.clone())
    }
}

/// SHA-256 fingerprint of source bytes, hex-encoded.
#[must_use]
pub fn fingerprint(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Checks whether the source changed compared to the current version.
///
/// Compares `sha256` against the first source fingerprint recorded in the
/// current version's event manifest. Anything missing along that path
/// (pointer, manifest, fingerprint) counts as changed: when in doubt,
/// process.
///
/// # Errors
///
/// Returns an error on storage failure.
pub async fn source_changed(
    store: &DatasetStore,
    dataset_id: &str,
    sha256: &str,
) -> Result<bool> {
    let Some(pointer) = store.read_pointer(dataset_id).await? else {
        tracing::info!(dataset_id, "first run: no previous pointer");
        return Ok(true);
    };

    let Some(manifest) = store
        .read_event_manifest(dataset_id, &pointer.current_version)
        .await?
    else {
        tracing::info!(dataset_id, "current version manifest not found");
        return Ok(true);
    };

    let Some(last_hash) = manifest.source_sha256() else {
        tracing::info!(dataset_id, "no source fingerprint in current manifest");
        return Ok(true);
    };

    let changed = last_hash != sha256;
    if changed {
        tracing::info!(
            dataset_id,
            from = &last_hash[..8.min(last_hash.len())],
            to = &sha256[..8.min(sha256.len())],
            "source changed"
        );
    } else {
        tracing::info!(dataset_id, "source unchanged");
    }
    Ok(changed)
}

/// Drops rows at or before the latest observation time already published.
///
/// The cutoff is the maximum `obs_time` across the current version's event
/// files. With no published version (or no cutoff derivable) all rows pass.
/// When a cutoff exists, rows without an `obs_time` cannot be compared and
/// are dropped.
///
/// # Errors
///
/// Returns an error on storage failure.
pub async fn filter_new_rows(
    store: &DatasetStore,
    dataset_id: &str,
    rows: Vec<Row>,
) -> Result<Vec<Row>> {
    let Some(cutoff) = latest_published_obs_time(store, dataset_id).await? else {
        tracing::info!(dataset_id, "no previous data, keeping all rows");
        return Ok(rows);
    };

    let total = rows.len();
    let kept: Vec<Row> = rows
        .into_iter()
        .filter(|row| row.obs_time.is_some_and(|t| t > cutoff))
        .collect();

    tracing::info!(
        dataset_id,
        total,
        kept = kept.len(),
        skipped = total - kept.len(),
        cutoff = %cutoff,
        "filtered rows by observation time"
    );
    Ok(kept)
}

/// Returns the max `obs_time` across the current version's event files.
async fn latest_published_obs_time(
    store: &DatasetStore,
    dataset_id: &str,
) -> Result<Option<DateTime<Utc>>> {
    let Some(pointer) = store.read_pointer(dataset_id).await? else {
        return Ok(None);
    };
    let Some(manifest) = store
        .read_event_manifest(dataset_id, &pointer.current_version)
        .await?
    else {
        return Ok(None);
    };

    let mut latest: Option<DateTime<Utc>> = None;
    for key in &manifest.outputs.files {
        match store.read_event_rows(key).await {
            Ok(rows) => {
                for row in rows {
                    if let Some(t) = row.obs_time {
                        latest = Some(latest.map_or(t, |cur| cur.max(t)));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "could not read published event file");
            }
        }
    }
    Ok(latest)
}

// ============================================================================
// Parser / normalizer plugins
// ============================================================================

/// Parses raw source bytes into rows.
pub trait Parser: Send + Sync {
    /// Stable tag this parser registers under.
    fn id(&self) -> &str;

    /// Parses `raw` into observation rows.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload cannot be parsed.
    fn parse(&self, config: &DatasetConfig, raw: &Bytes) -> Result<Vec<Row>>;
}

/// Normalizes parsed rows.
pub trait Normalizer: Send + Sync {
    /// Stable tag this normalizer registers under.
    fn id(&self) -> &str;

    /// Normalizes `rows`.
    ///
    /// # Errors
    ///
    /// Returns an error when the rows cannot be normalized.
    fn normalize(&self, config: &DatasetConfig, rows: Vec<Row>) -> Result<Vec<Row>>;
}

/// Name-to-implementation registry for parsers and normalizers.
#[derive(Default)]
pub struct PluginRegistry {
    parsers: HashMap<String, Arc<dyn Parser>>,
    normalizers: HashMap<String, Arc<dyn Normalizer>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("parsers", &self.parsers.keys().collect::<Vec<_>>())
            .field("normalizers", &self.normalizers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    /// Creates an empty registry with the built-in `generic` normalizer.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register_normalizer(Arc::new(GenericNormalizer));
        registry
    }

    /// Registers a parser under its tag.
    pub fn register_parser(&mut self, parser: Arc<dyn Parser>) {
        self.parsers.insert(parser.id().to_string(), parser);
    }

    /// Registers a normalizer under its tag.
    pub fn register_normalizer(&mut self, normalizer: Arc<dyn Normalizer>) {
        self.normalizers
            .insert(normalizer.id().to_string(), normalizer);
    }

    /// Looks up a parser by tag.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the tag is missing or unregistered;
    /// there is no default parser.
    pub fn parser(&self, tag: Option<&str>) -> Result<Arc<dyn Parser>> {
        let tag = tag.ok_or_else(|| {
            PipelineError::validation("parser plugin tag is required, no default available")
        })?;
        self.parsers.get(tag).cloned().ok_or_else(|| {
            PipelineError::validation(format!("parser plugin '{tag}' not found"))
        })
    }

    /// Looks up a normalizer by tag.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the tag is missing or unregistered.
    pub fn normalizer(&self, tag: Option<&str>) -> Result<Arc<dyn Normalizer>> {
        let tag = tag.ok_or_else(|| {
            PipelineError::validation("normalizer plugin tag is required, no default available")
        })?;
        self.normalizers.get(tag).cloned().ok_or_else(|| {
            PipelineError::validation(format!("normalizer plugin '{tag}' not found"))
        })
    }
}

/// Generic normalizer for standard date/value cleanup.
///
/// Drops rows without an observation time or with a non-finite value and
/// backfills `obs_date` from `obs_time`. Datasets needing more register
/// their own normalizer.
#[derive(Debug, Clone, Copy)]
pub struct GenericNormalizer;

impl Normalizer for GenericNormalizer {
    fn id(&self) -> &str {
        "generic"
    }

    fn normalize(&self, _config: &DatasetConfig, rows: Vec<Row>) -> Result<Vec<Row>> {
        let total = rows.len();
        let normalized: Vec<Row> = rows
            .into_iter()
            .filter(|row| row.obs_time.is_some() && row.value.is_finite())
            .map(|mut row| {
                if row.obs_date.is_none() {
                    row.obs_date = row.obs_time.map(|t| t.date_naive());
                }
                row
            })
            .collect();

        if normalized.len() < total {
            tracing::info!(
                dropped = total - normalized.len(),
                "dropped rows lacking obs_time or a finite value"
            );
        }
        Ok(normalized)
    }
}
