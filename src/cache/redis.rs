//! Redis-backed shared cache.
//!
//! All service instances point at the same Redis deployment, which makes it
//! the coordination medium for both attempt windows and locks.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{cmd, AsyncCommands, Script};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use tracing::{debug, info};

use super::backend::{CacheBackend, CacheError};

/// Deletes KEYS[1] only while it still holds ARGV[1].
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A cache backed by a pooled Redis connection.
pub struct RedisCache {
    pool: Pool,
    compare_and_delete: Script,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("pool", &self.pool.status())
            .finish()
    }
}

impl RedisCache {
    /// Build a connection pool for the given Redis URL.
    ///
    /// No connection is opened until the first operation; call [`ping`](Self::ping)
    /// to verify reachability up front.
    pub fn connect(url: &str) -> Result<Self, CacheError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Unavailable(format!("failed to create pool: {}", e)))?;

        info!("Redis connection pool created");

        Ok(Self {
            pool,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
        })
    }

    /// Round-trip a `PING` to confirm the server is reachable.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: String = cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    async fn connection(&self) -> Result<Connection, CacheError> {
        Ok(self.pool.get().await?)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        // Replies "OK" when stored and nil when the key already exists.
        let reply: Option<String> = cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn remove_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(value)
            .invoke_async(&mut *conn)
            .await?;
        debug!(key = %key, deleted = deleted, "Compare-and-delete");
        Ok(deleted > 0)
    }
}
