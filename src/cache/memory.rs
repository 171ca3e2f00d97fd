//! In-process cache with per-key expiry.
//!
//! Useful for tests and single-node deployments. It gives the same atomicity
//! as the shared backend within one process, but nothing is shared between
//! processes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::backend::{CacheBackend, CacheError};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    /// Absolute expiry, milliseconds since the Unix epoch
    expires_at_ms: i64,
}

impl CacheEntry {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms
    }
}

/// A `DashMap`-backed cache whose expiry is measured on an injected clock.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    /// Create a cache that expires entries against the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a cache that expires entries against the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    fn entry_for(&self, value: &str, ttl: Duration) -> CacheEntry {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        CacheEntry {
            value: value.to_string(),
            expires_at_ms: self.clock.now_millis().saturating_add(ttl_ms),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now_millis();

        let live = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        if live.is_none() {
            trace!(key = %key, "Evicting expired cache entry");
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }

        Ok(live)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let entry = self.entry_for(value, ttl);
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let now = self.clock.now_millis();
        let fresh = self.entry_for(value, ttl);

        // The entry guard holds the shard lock, so check-and-insert is atomic.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(fresh);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn remove_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        let now = self.clock.now_millis();
        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.is_live(now) && entry.value == value);
        Ok(removed.is_some())
    }
}
