//! Object-store contract for the dataset catalog.
//!
//! The pipeline needs very little from a bucket: whole-object reads and
//! writes, prefix listing, server-side copy for the projection promote,
//! and one sharp tool - a conditional put keyed on the object's ETag.
//! That conditional put is what makes the dataset pointer a CAS cell, and
//! the pointer is the only object the pipeline ever mutates in place.
//!
//! ETags are opaque [`Etag`] tokens. A backend may mint them from an S3
//! `ETag`, a GCS generation number or anything else; callers never inspect
//! one, they only hand it back unchanged on the next conditional put. Two
//! rules every backend must keep:
//!
//! - every successful write to a key invalidates the key's previous token
//! - a token observed before a delete must not validate against an object
//!   created at the same key afterwards
//!
//! The second rule is what lets the publisher treat "my token was accepted"
//! as "nobody else advanced the pointer since I read it".

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{Error, Result};

/// Opaque object version token used for conditional writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Etag(String);

impl Etag {
    /// Wraps a backend-issued token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token, e.g. for an `If-Match` header.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Etag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Condition attached to a put.
#[derive(Debug, Clone)]
pub enum PutCondition {
    /// Overwrite whatever is there.
    Always,
    /// Create only; rejected while any object is live at the key.
    IfAbsent,
    /// Replace only while the live ETag still equals this one.
    IfMatches(Etag),
}

/// What a put did.
///
/// A rejected condition is an outcome, not an error: for the pointer it
/// means another run won the publish, and the caller's job is to stand
/// down, not to retry.
#[derive(Debug, Clone)]
pub enum PutOutcome {
    /// The write landed; this is the key's new ETag.
    Stored(Etag),
    /// The condition did not hold; nothing was written.
    Rejected {
        /// ETag live at rejection time, `None` when the key had no object
        /// (an `IfMatches` put raced a delete, or the token was bogus).
        live_etag: Option<Etag>,
    },
}

impl PutOutcome {
    /// Returns the stored ETag, or `None` when the put was rejected.
    #[must_use]
    pub fn stored_etag(&self) -> Option<&Etag> {
        match self {
            Self::Stored(etag) => Some(etag),
            Self::Rejected { .. } => None,
        }
    }
}

/// The object-store operations the pipeline is built on.
///
/// Implementations adapt a real store (S3, GCS) or fake one for tests.
/// Apart from the conditional put there is no coordination here: event
/// files are write-once by protocol, projections are regenerable, and only
/// the pointer relies on the CAS semantics documented on [`PutCondition`].
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads the full object at `key`, `Error::NotFound` when absent.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Returns the live ETag of `key` without fetching the body, `None`
    /// when absent. This is how the publisher snapshots the pointer state
    /// it will CAS against.
    async fn head(&self, key: &str) -> Result<Option<Etag>>;

    /// Writes `body` at `key` subject to `condition`.
    ///
    /// A failed condition is reported as `PutOutcome::Rejected`, never as
    /// an `Err`; errors are reserved for the store itself misbehaving.
    async fn put(&self, key: &str, body: Bytes, condition: PutCondition) -> Result<PutOutcome>;

    /// Removes `key`. Deleting an absent key is a success, which keeps
    /// event rollback and temp cleanup safe to repeat.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Returns the keys under `prefix` (empty when none). No ordering is
    /// promised; callers that need version order sort the keys, which the
    /// `version_ts` layout makes equivalent to temporal order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Server-side copy of `src` to `dst`, `Error::NotFound` when `src`
    /// is absent. Used by the consolidator's temp-to-final promote.
    async fn copy(&self, src: &str, dst: &str) -> Result<()>;
}

/// In-memory store for tests.
///
/// Tokens come from a single store-wide mint, so a key deleted and
/// recreated never revives an old token - a stale `IfMatches` put stays
/// rejected across the delete, matching the fencing behavior the pointer
/// protocol depends on.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Object>,
    minted: u64,
}

#[derive(Debug)]
struct Object {
    body: Bytes,
    etag: Etag,
}

impl Inner {
    fn mint(&mut self) -> Etag {
        self.minted += 1;
        Etag::new(format!("et-{:06x}", self.minted))
    }
}

impl MemoryBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.state.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let state = self.state.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        state
            .objects
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| Error::not_found(key))
    }

    async fn head(&self, key: &str) -> Result<Option<Etag>> {
        let state = self.state.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        Ok(state.objects.get(key).map(|o| o.etag.clone()))
    }

    async fn put(&self, key: &str, body: Bytes, condition: PutCondition) -> Result<PutOutcome> {
        let mut state = self.locked()?;

        let live = state.objects.get(key).map(|o| o.etag.clone());
        let holds = match &condition {
            PutCondition::Always => true,
            PutCondition::IfAbsent => live.is_none(),
            PutCondition::IfMatches(expected) => live.as_ref() == Some(expected),
        };
        if !holds {
            return Ok(PutOutcome::Rejected { live_etag: live });
        }

        let etag = state.mint();
        state.objects.insert(
            key.to_string(),
            Object {
                body,
                etag: etag.clone(),
            },
        );
        Ok(PutOutcome::Stored(etag))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.locked()?.objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        Ok(state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let mut state = self.locked()?;
        let body = state
            .objects
            .get(src)
            .map(|o| o.body.clone())
            .ok_or_else(|| Error::not_found(src))?;
        let etag = state.mint();
        state.objects.insert(dst.to_string(), Object { body, etag });
        Ok(())
    }
}
