//! Distributed lock over the shared cache.
//!
//! A lock is a cache key written with set-if-absent and a TTL. The value is a
//! per-acquisition owner token, and release deletes the key only while it
//! still holds that token, so a holder whose lock expired can never remove
//! its successor's lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::cache::CacheBackend;

/// Errors that can occur acquiring a lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock '{key}' not acquired after {attempts} attempts")]
    Exhausted { key: String, attempts: u32 },
}

/// Acquires TTL-bounded locks in the shared cache.
#[derive(Clone)]
pub struct LockManager {
    cache: Arc<dyn CacheBackend>,
}

impl LockManager {
    /// Create a lock manager over the given cache.
    pub fn new(cache: Arc<dyn CacheBackend>) -> Self {
        Self { cache }
    }

    /// Acquire `key` for at most `ttl`.
    ///
    /// Makes one attempt plus up to `max_retries` retries, sleeping
    /// `retry_delay` before each retry. Cache errors count as failed attempts.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<LockGuard, LockError> {
        let token = Uuid::new_v4().to_string();
        let attempts = max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(retry_delay).await;
            }

            // Measured before the write so local expiry never trails the cache's.
            let started = Instant::now();
            match self.cache.set_if_absent(key, &token, ttl).await {
                Ok(true) => {
                    trace!(key = %key, attempt = attempt, "Lock acquired");
                    return Ok(LockGuard {
                        cache: self.cache.clone(),
                        key: key.to_string(),
                        token,
                        acquired_at: started,
                        ttl,
                        released: false,
                    });
                }
                Ok(false) => {
                    trace!(key = %key, attempt = attempt, "Lock held by another owner");
                }
                Err(e) => {
                    debug!(key = %key, attempt = attempt, error = %e, "Lock attempt failed");
                }
            }
        }

        Err(LockError::Exhausted {
            key: key.to_string(),
            attempts,
        })
    }
}

/// Ownership of an acquired lock.
///
/// Call [`release`](Self::release) when done. A guard dropped without being
/// released (panic, cancelled future) schedules the release on the current
/// tokio runtime; failing that, the lock expires after its TTL.
pub struct LockGuard {
    cache: Arc<dyn CacheBackend>,
    key: String,
    token: String,
    acquired_at: Instant,
    ttl: Duration,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    /// The locked key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the TTL has run out, after which ownership can no longer be assumed.
    pub fn is_expired(&self) -> bool {
        self.acquired_at.elapsed() >= self.ttl
    }

    /// Release the lock. Never fails; an expired or taken-over lock is left alone.
    pub async fn release(mut self) {
        // Set only after the round trip; if this future is dropped mid-await,
        // `Drop` still schedules the release.
        let result = self.cache.remove_if_equals(&self.key, &self.token).await;
        self.released = true;

        match result {
            Ok(true) => trace!(key = %self.key, "Lock released"),
            Ok(false) => debug!(key = %self.key, "Lock already expired before release"),
            Err(e) => debug!(key = %self.key, error = %e, "Lock release failed, leaving it to expire"),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let cache = self.cache.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = cache.remove_if_equals(&key, &token).await {
                debug!(key = %key, error = %e, "Deferred lock release failed");
            }
        });
    }
}
