//! Distributed failed-attempt rate limiter.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::key::RateLimitKey;
use super::lock::{LockGuard, LockManager};
use super::window::{window_start, AttemptRecord, WindowStore};
use crate::cache::CacheBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitSettings;

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttemptOutcome {
    /// Whether the subject had already used up its window before this attempt
    pub rate_limited: bool,
}

impl AttemptOutcome {
    pub const fn allowed() -> Self {
        Self {
            rate_limited: false,
        }
    }

    pub const fn limited() -> Self {
        Self { rate_limited: true }
    }
}

/// Throttles failed authentication attempts per `(world, subject)`.
///
/// All state lives in the shared cache. Updates to a key's attempt window
/// are serialized by a lock in that same cache, so the cap holds across
/// every instance sharing it. Any coordination or storage failure lets the
/// request through rather than blocking it.
pub struct FailedAttemptLimiter {
    windows: WindowStore,
    locks: LockManager,
    clock: Arc<dyn Clock>,
    /// Deployment-wide key prefix
    namespace: Option<String>,
    settings: RwLock<RateLimitSettings>,
}

impl FailedAttemptLimiter {
    /// Create a limiter over the given cache, timed by the system clock.
    pub fn new(cache: Arc<dyn CacheBackend>, settings: RateLimitSettings) -> Self {
        Self::with_clock(cache, settings, Arc::new(SystemClock))
    }

    /// Create a limiter over the given cache with an explicit clock.
    pub fn with_clock(
        cache: Arc<dyn CacheBackend>,
        settings: RateLimitSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            windows: WindowStore::new(cache.clone()),
            locks: LockManager::new(cache),
            clock,
            namespace: None,
            settings: RwLock::new(settings),
        }
    }

    /// Prefix every key with a deployment namespace.
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Replace the settings. Applies to operations started afterwards.
    pub fn set_settings(&self, settings: RateLimitSettings) {
        let mut current = self.settings.write();
        *current = settings;
    }

    /// Get the current settings.
    pub fn settings(&self) -> RateLimitSettings {
        self.settings.read().clone()
    }

    fn key(&self, world: &str, subject: &str) -> RateLimitKey {
        RateLimitKey::new(world, subject).with_namespace(self.namespace.as_deref())
    }

    /// Whether the subject has already used up its window.
    ///
    /// Reads without taking the lock, so a concurrent write may not be
    /// visible yet. Storage errors read as "not limited".
    pub async fn is_rate_limited(&self, world: &str, subject: &str) -> bool {
        let settings = self.settings();
        let live = self.live_attempts_with(world, subject, &settings).await;
        live >= settings.max_attempts_per_window as usize
    }

    /// Number of failed attempts inside the current window.
    ///
    /// Intended for operators; never expose it to the subject being limited.
    pub async fn live_attempts(&self, world: &str, subject: &str) -> usize {
        let settings = self.settings();
        self.live_attempts_with(world, subject, &settings).await
    }

    async fn live_attempts_with(
        &self,
        world: &str,
        subject: &str,
        settings: &RateLimitSettings,
    ) -> usize {
        let key = self.key(world, subject);
        let attempts_key = key.attempts_key();

        let record = match self.windows.get(&attempts_key).await {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => {
                warn!(key = %key, error = %e, "Attempt record unreadable, treating subject as not limited");
                return 0;
            }
        };

        let now = self.clock.now_millis();
        // Counting is enough here; stale entries are dropped on the next write.
        record.live_count(window_start(now, settings.window()))
    }

    /// Record a failed attempt.
    ///
    /// Returns `rate_limited: true` if the subject had already reached the
    /// cap, in which case the attempt is not stored. Fails open when the
    /// lock cannot be acquired or the cache misbehaves.
    pub async fn record_failed_attempt(&self, world: &str, subject: &str) -> AttemptOutcome {
        let settings = self.settings();
        let key = self.key(world, subject);
        let lock_key = key.lock_key();

        let guard = match self
            .locks
            .acquire(
                &lock_key,
                settings.lock_ttl(),
                settings.lock_retries,
                settings.lock_retry_delay(),
            )
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not lock attempt window, failing open");
                return AttemptOutcome::allowed();
            }
        };

        let outcome = self.record_locked(&key, &guard, &settings).await;
        guard.release().await;
        outcome
    }

    /// The read-modify-write section. Must only run while `guard` is held.
    async fn record_locked(
        &self,
        key: &RateLimitKey,
        guard: &LockGuard,
        settings: &RateLimitSettings,
    ) -> AttemptOutcome {
        let attempts_key = key.attempts_key();

        let mut record = match self.windows.get(&attempts_key).await {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => {
                warn!(key = %key, error = %e, "Attempt record unreadable, starting a new window");
                AttemptRecord::new()
            }
        };

        let now = self.clock.now_millis();
        record.retain_live(window_start(now, settings.window()));

        trace!(
            key = %key,
            live_attempts = record.len(),
            limit = settings.max_attempts_per_window,
            "Checking failed attempts"
        );

        if record.len() >= settings.max_attempts_per_window as usize {
            debug!(key = %key, "Failed attempt limit reached");
            return AttemptOutcome::limited();
        }

        if guard.is_expired() {
            warn!(key = %key, "Lock expired before write-back, dropping attempt");
            return AttemptOutcome::allowed();
        }

        record.push(now);
        if let Err(e) = self
            .windows
            .set(&attempts_key, &record, settings.record_ttl())
            .await
        {
            warn!(key = %key, error = %e, "Failed to store attempt record");
        }

        AttemptOutcome::allowed()
    }

    /// Forget every failed attempt for the subject, e.g. after it authenticates.
    ///
    /// Takes no lock; a racing `record_failed_attempt` may re-create the
    /// record with a single attempt.
    pub async fn clear_attempts(&self, world: &str, subject: &str) {
        let key = self.key(world, subject);

        match self.windows.remove(&key.attempts_key()).await {
            Ok(()) => debug!(key = %key, "Cleared failed attempts"),
            Err(e) => warn!(key = %key, error = %e, "Failed to clear attempt record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::{BrokenDataCache, FailingCache, SlowCache};
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use std::time::Duration;

    const START_MS: i64 = 1_700_000_000_000;

    fn limiter_with_clock() -> (FailedAttemptLimiter, Arc<MemoryCache>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START_MS));
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
        let limiter =
            FailedAttemptLimiter::with_clock(cache.clone(), RateLimitSettings::default(), clock.clone());
        (limiter, cache, clock)
    }

    fn fast_lock_settings() -> RateLimitSettings {
        RateLimitSettings {
            lock_retries: 2,
            lock_retry_delay_ms: 1,
            ..RateLimitSettings::default()
        }
    }

    #[tokio::test]
    async fn test_cap_enforcement() {
        let (limiter, _cache, _clock) = limiter_with_clock();

        for _ in 0..3 {
            assert_eq!(
                limiter.record_failed_attempt("world", "subject").await,
                AttemptOutcome::allowed()
            );
        }
        assert_eq!(
            limiter.record_failed_attempt("world", "subject").await,
            AttemptOutcome::limited()
        );
        assert!(limiter.is_rate_limited("world", "subject").await);
    }

    #[tokio::test]
    async fn test_not_limited_below_cap() {
        let (limiter, _cache, _clock) = limiter_with_clock();

        assert!(!limiter.is_rate_limited("world", "subject").await);
        limiter.record_failed_attempt("world", "subject").await;
        limiter.record_failed_attempt("world", "subject").await;
        assert!(!limiter.is_rate_limited("world", "subject").await);
        assert_eq!(limiter.live_attempts("world", "subject").await, 2);
    }

    #[tokio::test]
    async fn test_window_expiry() {
        let (limiter, _cache, clock) = limiter_with_clock();

        for _ in 0..3 {
            limiter.record_failed_attempt("world", "subject").await;
        }
        assert!(limiter.is_rate_limited("world", "subject").await);

        clock.advance(Duration::from_secs(61));
        assert!(!limiter.is_rate_limited("world", "subject").await);
        assert!(!limiter.record_failed_attempt("world", "subject").await.rate_limited);
        assert_eq!(limiter.live_attempts("world", "subject").await, 1);
    }

    #[tokio::test]
    async fn test_window_slides_per_attempt() {
        let (limiter, _cache, clock) = limiter_with_clock();

        // t=0, t=30, t=50
        limiter.record_failed_attempt("world", "subject").await;
        clock.advance(Duration::from_secs(30));
        limiter.record_failed_attempt("world", "subject").await;
        clock.advance(Duration::from_secs(20));
        limiter.record_failed_attempt("world", "subject").await;

        // t=59: all three live
        clock.advance(Duration::from_secs(9));
        assert!(limiter.record_failed_attempt("world", "subject").await.rate_limited);

        // t=61: only the first has aged out
        clock.advance(Duration::from_secs(2));
        assert!(!limiter.record_failed_attempt("world", "subject").await.rate_limited);
        assert!(limiter.record_failed_attempt("world", "subject").await.rate_limited);
    }

    #[tokio::test]
    async fn test_limited_attempts_are_not_recorded() {
        let (limiter, _cache, clock) = limiter_with_clock();

        for _ in 0..3 {
            limiter.record_failed_attempt("world", "subject").await;
        }
        // Repeated failures while blocked must not extend the block
        for _ in 0..5 {
            clock.advance(Duration::from_secs(10));
            assert!(limiter.record_failed_attempt("world", "subject").await.rate_limited);
        }
        assert_eq!(limiter.live_attempts("world", "subject").await, 3);

        clock.advance(Duration::from_secs(11));
        assert!(!limiter.record_failed_attempt("world", "subject").await.rate_limited);
    }

    #[tokio::test]
    async fn test_clear_resets() {
        let (limiter, _cache, _clock) = limiter_with_clock();

        for _ in 0..4 {
            limiter.record_failed_attempt("world", "subject").await;
        }
        assert!(limiter.is_rate_limited("world", "subject").await);

        limiter.clear_attempts("world", "subject").await;
        assert!(!limiter.is_rate_limited("world", "subject").await);
        assert!(!limiter.record_failed_attempt("world", "subject").await.rate_limited);
    }

    #[tokio::test]
    async fn test_concrete_scenario() {
        let (limiter, _cache, clock) = limiter_with_clock();
        let second = Duration::from_secs(1);

        for _ in 0..3 {
            assert!(!limiter.record_failed_attempt("world", "subject").await.rate_limited);
            clock.advance(second);
        }
        // t=3
        assert!(limiter.record_failed_attempt("world", "subject").await.rate_limited);
        clock.advance(second);
        // t=4
        limiter.clear_attempts("world", "subject").await;
        clock.advance(second);
        // t=5
        assert!(!limiter.record_failed_attempt("world", "subject").await.rate_limited);
    }

    #[tokio::test]
    async fn test_key_isolation() {
        let (limiter, _cache, _clock) = limiter_with_clock();

        for _ in 0..3 {
            limiter.record_failed_attempt("world-a", "subject-x").await;
        }
        assert!(limiter.is_rate_limited("world-a", "subject-x").await);
        assert!(!limiter.is_rate_limited("world-b", "subject-x").await);
        assert!(!limiter.is_rate_limited("world-a", "subject-y").await);
        assert!(!limiter.record_failed_attempt("world-b", "subject-x").await.rate_limited);
        assert!(!limiter.record_failed_attempt("world-a", "subject-y").await.rate_limited);
    }

    #[tokio::test]
    async fn test_case_insensitive_subjects() {
        let (limiter, _cache, _clock) = limiter_with_clock();

        limiter.record_failed_attempt("MyWorld.eth", "0xABC").await;
        limiter.record_failed_attempt("myworld.ETH", "0xabc").await;
        limiter.record_failed_attempt("MYWORLD.ETH", "0XABC").await;

        assert!(limiter.is_rate_limited("myworld.eth", "0xabc").await);
    }

    #[tokio::test]
    async fn test_record_persisted_with_ttl() {
        let (limiter, cache, clock) = limiter_with_clock();

        limiter.record_failed_attempt("world", "subject").await;
        let raw = cache.get("auth_attempts:world:subject").await.unwrap();
        assert_eq!(raw, Some(format!("[{}]", START_MS)));

        // The lock is gone once the call returns
        assert!(cache.get("auth_lock:world:subject").await.unwrap().is_none());

        clock.advance(Duration::from_secs(70));
        assert!(cache.get("auth_attempts:world:subject").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespace_scopes_keys() {
        let (limiter, cache, clock) = limiter_with_clock();
        let limiter = limiter.with_namespace(Some("prod".to_string()));

        limiter.record_failed_attempt("world", "subject").await;
        assert!(cache.get("prod:auth_attempts:world:subject").await.unwrap().is_some());

        // Same cache, different namespace, separate counters
        let other = FailedAttemptLimiter::with_clock(cache.clone(), RateLimitSettings::default(), clock)
            .with_namespace(Some("staging".to_string()));
        assert_eq!(other.live_attempts("world", "subject").await, 0);
    }

    #[tokio::test]
    async fn test_settings_override() {
        let (limiter, _cache, _clock) = limiter_with_clock();
        limiter.set_settings(RateLimitSettings {
            max_attempts_per_window: 1,
            ..RateLimitSettings::default()
        });

        assert_eq!(limiter.settings().max_attempts_per_window, 1);
        assert!(!limiter.record_failed_attempt("world", "subject").await.rate_limited);
        assert!(limiter.record_failed_attempt("world", "subject").await.rate_limited);
    }

    #[tokio::test]
    async fn test_fail_open_when_cache_unreachable() {
        let limiter = FailedAttemptLimiter::new(Arc::new(FailingCache), fast_lock_settings());

        for _ in 0..10 {
            let outcome = limiter.record_failed_attempt("world", "subject").await;
            assert_eq!(outcome, AttemptOutcome::allowed());
        }
        assert!(!limiter.is_rate_limited("world", "subject").await);
        limiter.clear_attempts("world", "subject").await;
    }

    #[tokio::test]
    async fn test_fail_open_when_lock_contended() {
        let (limiter, cache, clock) = limiter_with_clock();
        limiter.set_settings(fast_lock_settings());

        // Another instance holds the lock and crashed
        cache
            .set_if_absent("auth_lock:world:subject", "other-owner", Duration::from_secs(5))
            .await
            .unwrap();

        for _ in 0..5 {
            assert!(!limiter.record_failed_attempt("world", "subject").await.rate_limited);
        }
        // Nothing was recorded while the lock was unavailable
        assert_eq!(limiter.live_attempts("world", "subject").await, 0);

        // The crashed holder's lock expires on its own
        clock.advance(Duration::from_secs(5));
        limiter.record_failed_attempt("world", "subject").await;
        assert_eq!(limiter.live_attempts("world", "subject").await, 1);
    }

    #[tokio::test]
    async fn test_fail_open_when_record_store_fails() {
        let cache = Arc::new(BrokenDataCache {
            locks: MemoryCache::new(),
        });
        let limiter = FailedAttemptLimiter::new(cache.clone(), RateLimitSettings::default());

        for _ in 0..5 {
            assert!(!limiter.record_failed_attempt("world", "subject").await.rate_limited);
        }
        // Lock was still released on the failure path
        assert!(cache.locks.is_empty());
    }

    #[tokio::test]
    async fn test_expired_lock_skips_write_back() {
        // Every cache round trip outlasts the lock
        let cache = Arc::new(SlowCache {
            inner: MemoryCache::new(),
            latency: Duration::from_millis(3),
        });
        let settings = RateLimitSettings {
            lock_ttl_ms: 1,
            ..RateLimitSettings::default()
        };
        let limiter = FailedAttemptLimiter::new(cache, settings);

        for _ in 0..5 {
            let outcome = limiter.record_failed_attempt("world", "subject").await;
            assert_eq!(outcome, AttemptOutcome::allowed());
        }
        assert_eq!(limiter.live_attempts("world", "subject").await, 0);
    }

    #[tokio::test]
    async fn test_huge_window_still_blocks() {
        let (limiter, _cache, _clock) = limiter_with_clock();
        limiter.set_settings(RateLimitSettings {
            window_seconds: 10_000_000_000_000_000,
            record_ttl_seconds: 10_000_000_000_000_000,
            ..RateLimitSettings::default()
        });

        for _ in 0..3 {
            assert!(!limiter.record_failed_attempt("world", "subject").await.rate_limited);
        }
        assert!(limiter.record_failed_attempt("world", "subject").await.rate_limited);
    }

    #[tokio::test]
    async fn test_corrupted_record_treated_as_absent() {
        let (limiter, cache, _clock) = limiter_with_clock();
        cache
            .set("auth_attempts:world:subject", "{garbage", Duration::from_secs(70))
            .await
            .unwrap();

        assert!(!limiter.is_rate_limited("world", "subject").await);
        assert!(!limiter.record_failed_attempt("world", "subject").await.rate_limited);
        assert_eq!(limiter.live_attempts("world", "subject").await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_serialization_under_concurrency() {
        let cache = Arc::new(SlowCache {
            inner: MemoryCache::new(),
            latency: Duration::from_millis(2),
        });
        let settings = RateLimitSettings {
            lock_retries: 500,
            lock_retry_delay_ms: 2,
            ..RateLimitSettings::default()
        };
        let limiter = Arc::new(FailedAttemptLimiter::new(cache, settings));

        let calls = (0..12).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.record_failed_attempt("world", "subject").await })
        });
        let outcomes = futures::future::join_all(calls).await;

        let allowed = outcomes
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(|outcome| !outcome.rate_limited)
            .count();
        assert_eq!(allowed, 3);
        assert_eq!(limiter.live_attempts("world", "subject").await, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_separate_instances_share_state() {
        // Two limiters over one cache behave like two service instances
        let cache = Arc::new(SlowCache {
            inner: MemoryCache::new(),
            latency: Duration::from_millis(1),
        });
        let settings = RateLimitSettings {
            lock_retries: 500,
            lock_retry_delay_ms: 2,
            ..RateLimitSettings::default()
        };
        let first = Arc::new(FailedAttemptLimiter::new(cache.clone(), settings.clone()));
        let second = Arc::new(FailedAttemptLimiter::new(cache, settings));

        let calls = (0..10).map(|i| {
            let limiter = if i % 2 == 0 { first.clone() } else { second.clone() };
            tokio::spawn(async move { limiter.record_failed_attempt("World", "Subject").await })
        });
        let allowed = futures::future::join_all(calls)
            .await
            .into_iter()
            .filter(|joined| matches!(joined, Ok(outcome) if !outcome.rate_limited))
            .count();

        assert_eq!(allowed, 3);
        assert!(first.is_rate_limited("world", "subject").await);
        assert!(second.is_rate_limited("world", "subject").await);
    }
}
