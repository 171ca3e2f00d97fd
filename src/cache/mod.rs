//! Shared cache providers.
//!
//! Every service instance talks to the same cache, which holds both the
//! attempt windows and the locks that serialize updates to them.

mod backend;
mod memory;
mod redis;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{CacheBackend, CacheError};
pub use memory::MemoryCache;
pub use redis::RedisCache;
