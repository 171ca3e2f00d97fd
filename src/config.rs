//! Configuration management for Worldguard.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, WorldguardError};

/// Prefix for environment overrides, e.g. `WORLDGUARD__RATE_LIMIT__MAX_ATTEMPTS_PER_WINDOW`.
pub const ENV_PREFIX: &str = "WORLDGUARD";

/// Longest sliding window accepted, in seconds.
pub const MAX_WINDOW_SECONDS: u64 = 86_400;
/// Longest attempt record expiry accepted, in seconds.
pub const MAX_RECORD_TTL_SECONDS: u64 = 2 * 86_400;
/// Longest lock TTL accepted, in milliseconds.
pub const MAX_LOCK_TTL_MS: u64 = 300_000;
/// Longest wait between lock retries accepted, in milliseconds.
pub const MAX_LOCK_RETRY_DELAY_MS: u64 = 60_000;

/// Main configuration for the Worldguard service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldguardConfig {
    /// Failed-attempt limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Shared cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Shared cache configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL shared by every instance. Without it state is process-local.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix for every key this deployment writes
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Failed-attempt limiting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Failed attempts allowed inside one window
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_window: u32,

    /// Sliding window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Expiry of a stored attempt record; longer than the window
    #[serde(default = "default_record_ttl_seconds")]
    pub record_ttl_seconds: u64,

    /// How long a lock holder owns the lock
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,

    /// Retries after the first failed lock attempt
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,

    /// Wait before each lock retry
    #[serde(default = "default_lock_retry_delay_ms")]
    pub lock_retry_delay_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_attempts_per_window: default_max_attempts(),
            window_seconds: default_window_seconds(),
            record_ttl_seconds: default_record_ttl_seconds(),
            lock_ttl_ms: default_lock_ttl_ms(),
            lock_retries: default_lock_retries(),
            lock_retry_delay_ms: default_lock_retry_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_window_seconds() -> u64 {
    60
}

fn default_record_ttl_seconds() -> u64 {
    70
}

fn default_lock_ttl_ms() -> u64 {
    5000
}

fn default_lock_retries() -> u32 {
    3
}

fn default_lock_retry_delay_ms() -> u64 {
    100
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_seconds)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }

    /// Reject settings the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts_per_window == 0 {
            return Err(WorldguardError::Config(
                "max_attempts_per_window must be at least 1".to_string(),
            ));
        }
        if self.window_seconds == 0 {
            return Err(WorldguardError::Config(
                "window_seconds must be at least 1".to_string(),
            ));
        }
        if self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(WorldguardError::Config(format!(
                "window_seconds ({}) must not exceed {}",
                self.window_seconds, MAX_WINDOW_SECONDS
            )));
        }
        if self.record_ttl_seconds > MAX_RECORD_TTL_SECONDS {
            return Err(WorldguardError::Config(format!(
                "record_ttl_seconds ({}) must not exceed {}",
                self.record_ttl_seconds, MAX_RECORD_TTL_SECONDS
            )));
        }
        if self.record_ttl_seconds < self.window_seconds {
            return Err(WorldguardError::Config(format!(
                "record_ttl_seconds ({}) must not be shorter than window_seconds ({})",
                self.record_ttl_seconds, self.window_seconds
            )));
        }
        if self.lock_ttl_ms == 0 {
            return Err(WorldguardError::Config(
                "lock_ttl_ms must be at least 1".to_string(),
            ));
        }
        if self.lock_ttl_ms > MAX_LOCK_TTL_MS {
            return Err(WorldguardError::Config(format!(
                "lock_ttl_ms ({}) must not exceed {}",
                self.lock_ttl_ms, MAX_LOCK_TTL_MS
            )));
        }
        if self.lock_retry_delay_ms > MAX_LOCK_RETRY_DELAY_MS {
            return Err(WorldguardError::Config(format!(
                "lock_retry_delay_ms ({}) must not exceed {}",
                self.lock_retry_delay_ms, MAX_LOCK_RETRY_DELAY_MS
            )));
        }
        Ok(())
    }
}

impl WorldguardConfig {
    /// Load configuration from an optional YAML file layered under environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(
                config::File::with_name(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: WorldguardConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WorldguardConfig =
            serde_yaml::from_str(yaml).map_err(|e| WorldguardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()
    }
}
