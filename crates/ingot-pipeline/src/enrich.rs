//! Metadata enricher: completes delta rows with dataset- and run-scoped
//! columns before they are written as an event.
//!
//! Values already set by the normalizer win; the enricher only fills what
//! is missing. `version` is the run's `version_ts`, `vintage_date` is the
//! run start time.

use chrono::{DateTime, Utc};

use ingot_core::config::{DatasetConfig, SourceOrigin};
use ingot_core::row::{Row, SourceKind};

use crate::delta::KeyedRow;

/// Enriches delta rows in place, preserving their key hashes.
#[must_use]
pub fn enrich_delta(
    delta: Vec<KeyedRow>,
    config: &DatasetConfig,
    version_ts: &str,
    vintage_date: DateTime<Utc>,
) -> Vec<KeyedRow> {
    delta
        .into_iter()
        .map(|keyed| KeyedRow {
            key_hash: keyed.key_hash,
            row: enrich_row(keyed.row, config, version_ts, vintage_date),
        })
        .collect()
}

/// Enriches a single row with the metadata columns.
#[must_use]
pub fn enrich_row(
    mut row: Row,
    config: &DatasetConfig,
    version_ts: &str,
    vintage_date: DateTime<Utc>,
) -> Row {
    // Series fallback: rows without a series code belong to the dataset-wide
    // default series
    if row.internal_series_code.is_empty() {
        row.internal_series_code = config.dataset_id.clone();
    }

    row.dataset_id = config.dataset_id.clone();
    row.provider = config.provider.clone().unwrap_or_default();

    if row.frequency.is_empty() {
        row.frequency = config.frequency.clone();
    }
    if row.unit.is_empty() {
        row.unit = config.unit.clone().unwrap_or_default();
    }

    row.source_kind = resolve_source_kind(config);

    if row.obs_date.is_none() {
        row.obs_date = row.obs_time.map(|t| t.date_naive());
    }

    row.version = version_ts.to_string();
    row.vintage_date = Some(vintage_date);
    // quality_flag stays as the normalizer set it (defaults to OK)

    row
}

fn resolve_source_kind(config: &DatasetConfig) -> SourceKind {
    // A declared file format means the source is a file regardless of how
    // it was transported
    if config.source.format.is_some() {
        return SourceKind::File;
    }
    match config.source.kind {
        SourceOrigin::Http => SourceKind::Api,
        SourceOrigin::Local => SourceKind::File,
    }
}
