//! Pipeline lock backed by a conditional-write key-value table.
//!
//! This module prevents concurrent runs for the same dataset. It uses:
//! - **Conditional writes**: acquisition succeeds only when no live record
//!   exists for the lock key
//! - **TTL**: automatic expiry guarantees liveness after crashed holders
//! - **Owner-checked release**: a late survivor of a previous run can never
//!   release a successor's lock
//!
//! # How It Works
//!
//! 1. `acquire` writes `{lock_key, owner_id, acquired_at, expires_at}` with
//!    the condition `attribute_not_exists(lock_key) OR expires_at < now`
//! 2. A failed condition means someone else holds a live lock: the caller
//!    gets `false` and reports `skipped_lock`, it is not an error
//! 3. `release` conditionally deletes the record iff `owner_id` matches
//!
//! The table trait maps 1:1 onto a DynamoDB-style conditional-write API; the
//! in-memory implementation exists for tests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default lock TTL in seconds (1 hour).
pub const DEFAULT_LOCK_TTL_SECS: i64 = 3600;

/// A lock record as stored in the key-value table.
///
/// `acquired_at` / `expires_at` are unix epoch seconds, matching the numeric
/// attributes a conditional-expression table compares against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Partition key for the lock.
    pub lock_key: String,
    /// Unique owner of this acquisition (usually the run id).
    pub owner_id: String,
    /// Acquisition time, epoch seconds.
    pub acquired_at: i64,
    /// Expiry time, epoch seconds.
    pub expires_at: i64,
}

impl LockRecord {
    /// Returns whether this record has expired at `now` (epoch seconds).
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

/// Conditional-write key-value table used for locking.
///
/// Implementations must make `put_if_available` atomic with respect to
/// concurrent callers: exactly one of two simultaneous acquisitions for the
/// same key may succeed.
#[async_trait]
pub trait LockTable: Send + Sync + 'static {
    /// Writes `record` iff no record exists for its key or the existing
    /// record expired before `now`.
    ///
    /// Returns `false` on condition failure (live lock held by someone).
    async fn put_if_available(&self, record: LockRecord, now: i64) -> Result<bool>;

    /// Deletes the record for `lock_key` iff its `owner_id` matches.
    ///
    /// Returns `false` when the record is missing or owned by someone else.
    async fn delete_if_owner(&self, lock_key: &str, owner_id: &str) -> Result<bool>;

    /// Reads the record for `lock_key`, if any.
    async fn read(&self, lock_key: &str) -> Result<Option<LockRecord>>;
}

/// In-memory lock table for testing.
#[derive(Debug, Default)]
pub struct MemoryLockTable {
    records: Arc<RwLock<HashMap<String, LockRecord>>>,
}

impl MemoryLockTable {
    /// Creates a new empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockTable for MemoryLockTable {
    async fn put_if_available(&self, record: LockRecord, now: i64) -> Result<bool> {
        let mut records = self.records.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        match records.get(&record.lock_key) {
            Some(existing) if !existing.is_expired_at(now) => Ok(false),
            _ => {
                records.insert(record.lock_key.clone(), record);
                Ok(true)
            }
        }
    }

    async fn delete_if_owner(&self, lock_key: &str, owner_id: &str) -> Result<bool> {
        let mut records = self.records.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        match records.get(lock_key) {
            Some(existing) if existing.owner_id == owner_id => {
                records.remove(lock_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn read(&self, lock_key: &str) -> Result<Option<LockRecord>> {
        let records = self.records.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        Ok(records.get(lock_key).cloned())
    }
}

/// Distributed pipeline lock over a [`LockTable`].
///
/// One instance per process is enough; `lock_key` and `owner_id` are passed
/// per call so a single table guards many datasets.
pub struct PipelineLock<T: LockTable + ?Sized> {
    table: Arc<T>,
    ttl_seconds: i64,
}

impl<T: LockTable + ?Sized> Clone for PipelineLock<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            ttl_seconds: self.ttl_seconds,
        }
    }
}

impl<T: LockTable + ?Sized> PipelineLock<T> {
    /// Creates a lock with the default TTL.
    #[must_use]
    pub fn new(table: Arc<T>) -> Self {
        Self {
            table,
            ttl_seconds: DEFAULT_LOCK_TTL_SECS,
        }
    }

    /// Creates a lock with a custom TTL in seconds.
    #[must_use]
    pub fn with_ttl(table: Arc<T>, ttl_seconds: i64) -> Self {
        Self { table, ttl_seconds }
    }

    /// Attempts to acquire the lock for `lock_key`.
    ///
    /// Returns `true` when acquired, `false` when a live lock is held by
    /// another owner. Never blocks or retries: contention is a scheduling
    /// outcome for the driver to report.
    ///
    /// # Errors
    ///
    /// Returns an error only when the table itself fails.
    pub async fn acquire(&self, lock_key: &str, owner_id: &str) -> Result<bool> {
        let now = Utc::now().timestamp();
        let record = LockRecord {
            lock_key: lock_key.to_string(),
            owner_id: owner_id.to_string(),
            acquired_at: now,
            expires_at: now + self.ttl_seconds,
        };

        let acquired = self.table.put_if_available(record, now).await?;
        if acquired {
            tracing::info!(lock_key, owner_id, "acquired lock");
        } else {
            tracing::warn!(lock_key, "lock already held");
        }
        Ok(acquired)
    }

    /// Releases the lock for `lock_key` iff held by `owner_id`.
    ///
    /// Returns `false` if the lock is missing or was taken over after our
    /// TTL lapsed; in that case the successor's record is left intact.
    ///
    /// # Errors
    ///
    /// Returns an error only when the table itself fails.
    pub async fn release(&self, lock_key: &str, owner_id: &str) -> Result<bool> {
        let released = self.table.delete_if_owner(lock_key, owner_id).await?;
        if released {
            tracing::info!(lock_key, owner_id, "released lock");
        } else {
            tracing::warn!(lock_key, owner_id, "lock not found or owner mismatch");
        }
        Ok(released)
    }

    /// Checks whether a live (unexpired) lock is held for `lock_key`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the table itself fails.
    pub async fn is_locked(&self, lock_key: &str) -> Result<bool> {
        let now = Utc::now().timestamp();
        Ok(self
            .table
            .read(lock_key)
            .await?
            .is_some_and(|record| !record.is_expired_at(now)))
    }
}
