//! Delta computation: which rows has this dataset never published before.
//!
//! Pure functions, no I/O. The primary-key hash is the identity of a row
//! across runs: `SHA1(join('|', canonical primary-key values))`. Any change
//! to the primary-key columns or their canonical string form changes the
//! hash and therefore the delta - the canonical forms live in
//! [`Row::canonical_value`] and are a stability contract.

use std::collections::HashSet;

use sha1::{Digest, Sha1};

use ingot_core::row::Row;

use crate::error::{PipelineError, Result};

/// A delta row paired with its primary-key hash.
///
/// The hash stays alongside the row through enrichment and is dropped just
/// before event serialization; it is never part of the stored payload.
#[derive(Debug, Clone)]
pub struct KeyedRow {
    /// SHA-1 hash over the canonical primary-key values.
    pub key_hash: String,
    /// The row itself.
    pub row: Row,
}

/// Result of a delta computation.
#[derive(Debug, Clone)]
pub struct DeltaResult {
    /// Rows absent from the index, in input order.
    pub delta: Vec<KeyedRow>,
    /// Index after merging the delta hashes (first occurrence kept).
    pub updated_index: Vec<String>,
    /// The index as read, before the merge.
    pub index_snapshot: Vec<String>,
}

impl DeltaResult {
    /// Returns whether nothing new was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    /// Returns the delta rows without their hashes.
    #[must_use]
    pub fn rows(&self) -> Vec<Row> {
        self.delta.iter().map(|k| k.row.clone()).collect()
    }
}

/// Computes the primary-key hash of one row.
///
/// # Errors
///
/// Returns a validation error when a primary-key column is unknown or has
/// no value on this row; a delta over such rows must fail before any write
/// is attempted.
pub fn compute_key_hash(row: &Row, primary_keys: &[String]) -> Result<String> {
    let mut parts = Vec::with_capacity(primary_keys.len());
    for column in primary_keys {
        let value = row.canonical_value(column).ok_or_else(|| {
            PipelineError::validation(format!(
                "primary-key column '{column}' missing on row (series '{}')",
                row.internal_series_code
            ))
        })?;
        parts.push(value);
    }

    let mut hasher = Sha1::new();
    hasher.update(parts.join("|").as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Computes the delta of `normalized` against the current index.
///
/// 1. Hash every normalized row over `primary_keys`.
/// 2. Anti-join: keep rows whose hash is not in the index.
/// 3. Merge: index ∪ delta hashes, deduplicated keeping first occurrence.
///
/// Rows with an existing hash are silently dropped (no update-in-place).
///
/// # Errors
///
/// Returns a validation error when hashing fails (see [`compute_key_hash`]).
pub fn compute_delta(
    normalized: &[Row],
    index: Option<&[String]>,
    primary_keys: &[String],
) -> Result<DeltaResult> {
    let index_snapshot: Vec<String> = index.unwrap_or_default().to_vec();
    let existing: HashSet<&str> = index_snapshot.iter().map(String::as_str).collect();

    let mut delta = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for row in normalized {
        let key_hash = compute_key_hash(row, primary_keys)?;
        if existing.contains(key_hash.as_str()) || !seen.insert(key_hash.clone()) {
            continue;
        }
        delta.push(KeyedRow {
            key_hash,
            row: row.clone(),
        });
    }

    let mut updated_index = index_snapshot.clone();
    updated_index.extend(delta.iter().map(|k| k.key_hash.clone()));

    Ok(DeltaResult {
        delta,
        updated_index,
        index_snapshot,
    })
}
