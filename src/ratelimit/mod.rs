//! Failed-attempt rate limiting and the coordination it relies on.

mod key;
mod limiter;
mod lock;
mod window;

pub use key::{RateLimitKey, ATTEMPTS_PREFIX, LOCK_PREFIX};
pub use limiter::{AttemptOutcome, FailedAttemptLimiter};
pub use lock::{LockError, LockGuard, LockManager};
pub use window::{window_start, AttemptRecord, WindowError, WindowStore};
