//! Bounded-retry decorator for transient storage failures.
//!
//! Wraps any [`StorageBackend`] and retries operations that fail with a
//! transient error, using exponential backoff with jitter. Precondition
//! failures are never retried: they are returned as normal results and the
//! caller (the publisher) decides what a lost CAS means.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::storage::{Etag, PutCondition, PutOutcome, StorageBackend};

/// Default maximum attempts per operation (initial try + retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Base backoff duration between attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Maximum backoff duration.
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// A storage backend that retries transient failures with backoff.
pub struct RetryingBackend<S: StorageBackend + ?Sized> {
    inner: Arc<S>,
    max_attempts: u32,
}

impl<S: StorageBackend + ?Sized> Clone for RetryingBackend<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            max_attempts: self.max_attempts,
        }
    }
}

impl<S: StorageBackend + ?Sized> RetryingBackend<S> {
    /// Wraps a backend with the default retry policy.
    #[must_use]
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Wraps a backend with a custom attempt limit.
    #[must_use]
    pub fn with_max_attempts(inner: Arc<S>, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
        }
    }

    async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut backoff = BACKOFF_BASE;
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    tracing::warn!(attempt, error = %e, "transient storage error, retrying");
                    let jitter = Duration::from_millis(rand_jitter());
                    tokio::time::sleep(backoff.min(BACKOFF_MAX) + jitter).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: StorageBackend + ?Sized> StorageBackend for RetryingBackend<S> {
    async fn get(&self, key: &str) -> Result<Bytes> {
        self.run(|| self.inner.get(key)).await
    }

    async fn head(&self, key: &str) -> Result<Option<Etag>> {
        self.run(|| self.inner.head(key)).await
    }

    async fn put(&self, key: &str, body: Bytes, condition: PutCondition) -> Result<PutOutcome> {
        // A rejected condition comes back as Ok(..) so it never loops here.
        self.run(|| self.inner.put(key, body.clone(), condition.clone()))
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.run(|| self.inner.delete(key)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.run(|| self.inner.list(prefix)).await
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        self.run(|| self.inner.copy(src, dst)).await
    }
}

/// Generates random jitter for backoff (0-50ms).
fn rand_jitter() -> u64 {
    // Simple time-derived jitter (avoids a rand dependency for this case)
    use std::time::SystemTime;
    let seed = u64::from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    seed % 50
}
