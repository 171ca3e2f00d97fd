//! Shared-secret authentication guarded by the failed-attempt limiter.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::ratelimit::FailedAttemptLimiter;

/// Access denied because the subject exhausted its failed attempts.
///
/// Carries the world name only; attempt counts and timings stay internal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Too many failed attempts for world '{world_name}', try again later")]
pub struct RateLimitedError {
    pub world_name: String,
}

/// Errors returned to a caller presenting a shared secret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error(transparent)]
    RateLimited(#[from] RateLimitedError),
    #[error("Invalid secret for world '{world_name}'")]
    InvalidSecret { world_name: String },
}

/// Checks shared secrets and feeds the outcome into the limiter.
#[derive(Clone)]
pub struct SecretGate {
    limiter: Arc<FailedAttemptLimiter>,
}

impl SecretGate {
    pub fn new(limiter: Arc<FailedAttemptLimiter>) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &Arc<FailedAttemptLimiter> {
        &self.limiter
    }

    /// Verify `presented` against the world's `expected` secret.
    ///
    /// A subject that is already limited is rejected without the secret being
    /// checked. A wrong secret is recorded as a failure; a correct one clears
    /// the subject's failures.
    pub async fn authenticate(
        &self,
        world: &str,
        subject: &str,
        presented: &str,
        expected: &str,
    ) -> Result<(), AuthError> {
        if self.limiter.is_rate_limited(world, subject).await {
            debug!(world = %world, "Rejecting rate limited subject");
            return Err(rate_limited(world));
        }

        if !secrets_match(presented.as_bytes(), expected.as_bytes()) {
            let outcome = self.limiter.record_failed_attempt(world, subject).await;
            if outcome.rate_limited {
                return Err(rate_limited(world));
            }
            return Err(AuthError::InvalidSecret {
                world_name: world.to_string(),
            });
        }

        self.limiter.clear_attempts(world, subject).await;
        info!(world = %world, "Shared secret accepted");
        Ok(())
    }
}

fn rate_limited(world: &str) -> AuthError {
    AuthError::RateLimited(RateLimitedError {
        world_name: world.to_string(),
    })
}

/// Compares every byte, whatever the position of the first mismatch.
fn secrets_match(presented: &[u8], expected: &[u8]) -> bool {
    let len = presented.len().max(expected.len());
    let mut diff = u8::from(presented.len() != expected.len());
    for i in 0..len {
        let a = presented.get(i).copied().unwrap_or(0);
        let b = expected.get(i).copied().unwrap_or(0);
        diff |= a ^ b;
    }
    diff == 0
}
