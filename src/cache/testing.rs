//! Cache doubles shared by unit tests.

use std::time::Duration;

use async_trait::async_trait;

use super::backend::{CacheBackend, CacheError};
use super::memory::MemoryCache;

/// A cache whose every operation fails, as if the server were unreachable.
pub struct FailingCache;

fn unreachable() -> CacheError {
    CacheError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl CacheBackend for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(unreachable())
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(unreachable())
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Err(unreachable())
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<bool, CacheError> {
        Err(unreachable())
    }

    async fn remove_if_equals(&self, _key: &str, _value: &str) -> Result<bool, CacheError> {
        Err(unreachable())
    }
}

/// A cache that grants locks but fails every data read and write.
pub struct BrokenDataCache {
    pub locks: MemoryCache,
}

#[async_trait]
impl CacheBackend for BrokenDataCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(unreachable())
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(unreachable())
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        Err(unreachable())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.locks.set_if_absent(key, value, ttl).await
    }

    async fn remove_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        self.locks.remove_if_equals(key, value).await
    }
}

/// A cache that sleeps before every operation, like a network round trip.
///
/// Forces concurrent tasks to interleave inside critical sections.
pub struct SlowCache {
    pub inner: MemoryCache,
    pub latency: Duration,
}

#[async_trait]
impl CacheBackend for SlowCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        tokio::time::sleep(self.latency).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        tokio::time::sleep(self.latency).await;
        self.inner.set(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        tokio::time::sleep(self.latency).await;
        self.inner.remove(key).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        tokio::time::sleep(self.latency).await;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn remove_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        tokio::time::sleep(self.latency).await;
        self.inner.remove_if_equals(key, value).await
    }
}
