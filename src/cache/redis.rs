//! Redis-backed cache
//!
//! One `ConnectionManager` is opened at startup and shared by every flush
//! cycle; it reconnects on its own after the server drops the connection.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::CacheStore;
use crate::types::{BgSaveError, Result};

/// Cache client for the Redis instance holding live records
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis and verify the connection with `PING`.
    ///
    /// Accepts either a `redis://` URL or a bare `host:port`.
    pub async fn connect(target: &str) -> Result<Self> {
        let url = redis_url(target);
        info!("Connecting to Redis at {}", url);

        let client = redis::Client::open(url.as_str())
            .map_err(|e| BgSaveError::Config(format!("Invalid Redis target {}: {}", url, e)))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| BgSaveError::Cache(format!("Failed to connect to Redis: {}", e)))?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| BgSaveError::Cache(format!("Redis ping failed: {}", e)))?;
        debug!(reply = %pong, "Redis ping");

        info!("Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }
}

/// Normalize a configured Redis target into a connection URL
pub fn redis_url(target: &str) -> String {
    if target.contains("://") {
        target.to_string()
    } else {
        format!("redis://{}", target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_url_from_host_port() {
        assert_eq!(redis_url("127.0.0.1:6379"), "redis://127.0.0.1:6379");
    }

    #[test]
    fn test_redis_url_passthrough() {
        assert_eq!(redis_url("redis://cache:6380/2"), "redis://cache:6380/2");
        assert_eq!(redis_url("rediss://cache:6380"), "rediss://cache:6380");
    }
}
