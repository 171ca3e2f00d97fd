//! Sliding-window attempt records and their shared store.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::cache::{CacheBackend, CacheError};

/// Errors reading or writing an attempt record.
#[derive(Debug, Error)]
pub enum WindowError {
    #[error("Cache access failed: {0}")]
    Cache(#[from] CacheError),
    #[error("Corrupted attempt record at '{key}': {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
    #[error("Failed to encode attempt record: {0}")]
    Encode(serde_json::Error),
}

/// Failed-attempt timestamps for one key, oldest first.
///
/// Stored as a JSON array of milliseconds since the Unix epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptRecord {
    timestamps: Vec<i64>,
}

impl AttemptRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record from raw timestamps.
    pub fn from_timestamps(timestamps: Vec<i64>) -> Self {
        Self { timestamps }
    }

    /// The stored timestamps.
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Count attempts newer than `window_start` without touching the record.
    pub fn live_count(&self, window_start: i64) -> usize {
        self.timestamps.iter().filter(|&&ts| ts > window_start).count()
    }

    /// Discard attempts at or before `window_start`.
    pub fn retain_live(&mut self, window_start: i64) {
        self.timestamps.retain(|&ts| ts > window_start);
    }

    /// Record an attempt.
    pub fn push(&mut self, timestamp_ms: i64) {
        self.timestamps.push(timestamp_ms);
    }
}

/// The exclusive lower bound of the window ending at `now_ms`.
pub fn window_start(now_ms: i64, window: Duration) -> i64 {
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(window_ms)
}

/// Reads and writes attempt records in the shared cache.
///
/// Nothing here is atomic across calls; callers hold the key's lock around
/// any read-modify-write sequence.
#[derive(Clone)]
pub struct WindowStore {
    cache: Arc<dyn CacheBackend>,
}

impl WindowStore {
    /// Create a store over the given cache.
    pub fn new(cache: Arc<dyn CacheBackend>) -> Self {
        Self { cache }
    }

    /// Fetch the record for `key`, if any.
    pub async fn get(&self, key: &str) -> Result<Option<AttemptRecord>, WindowError> {
        let Some(raw) = self.cache.get(key).await? else {
            return Ok(None);
        };

        let record = serde_json::from_str(&raw).map_err(|source| WindowError::Decode {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(record))
    }

    /// Overwrite the record for `key` and restart its expiry.
    pub async fn set(
        &self,
        key: &str,
        record: &AttemptRecord,
        ttl: Duration,
    ) -> Result<(), WindowError> {
        let raw = serde_json::to_string(record).map_err(WindowError::Encode)?;
        trace!(key = %key, attempts = record.len(), ttl_secs = ttl.as_secs(), "Writing attempt record");
        self.cache.set(key, &raw, ttl).await?;
        Ok(())
    }

    /// Delete the record for `key`.
    pub async fn remove(&self, key: &str) -> Result<(), WindowError> {
        self.cache.remove(key).await?;
        Ok(())
    }
}
