//! Redis-backed cache shared by every process of a deployment.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use crate::cache::{CacheStore, check_payload_size};
use crate::error::CacheError;

/// Entries written with `SET key value EX ttl`; expiry is left to Redis.
#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    /// Connect to the Redis server at `url`.
    ///
    /// Fails with [`CacheError::Unavailable`] when the server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::debug!("Connected to Redis cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        let payload: Option<Vec<u8>> = conn.get(key).await?;
        Ok(payload)
    }

    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        check_payload_size(&payload)?;

        // EX 0 is rejected by Redis
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, payload.as_slice(), seconds)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let err = RedisCache::connect("redis://127.0.0.1:1/").await.err();
        assert!(matches!(err, Some(CacheError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_invalid_url_is_unavailable() {
        let err = RedisCache::connect("not a url").await.err();
        assert!(matches!(err, Some(CacheError::Unavailable(_))));
    }
}
