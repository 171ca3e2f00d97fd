//! Cache trait for abstracting in-process and shared implementations.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}

/// Trait for key-value caches with per-key expiry.
///
/// This trait abstracts over the in-process `MemoryCache` and the
/// Redis-backed `RedisCache` so the rate limiter works with either.
/// Individual operations are atomic; multi-step sequences are not.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value, or `None` if the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Overwrite a value and restart its expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Delete a key. Deleting a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Store a value only if the key is absent. Returns `true` if stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, CacheError>;

    /// Delete a key only if it currently holds `value`. Returns `true` if deleted.
    async fn remove_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError>;
}
