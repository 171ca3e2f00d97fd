//! Error types for the Worldguard service.

use thiserror::Error;

use crate::cache::CacheError;

/// Main error type for Worldguard operations.
#[derive(Error, Debug)]
pub enum WorldguardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for WorldguardError {
    fn from(err: config::ConfigError) -> Self {
        WorldguardError::Config(err.to_string())
    }
}

/// Result type alias for Worldguard operations.
pub type Result<T> = std::result::Result<T, WorldguardError>;
