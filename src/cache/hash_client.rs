//! Minimal hash-map client for the remote store.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use tracing::info;

use crate::config::RemoteStoreConfig;
use crate::error::CacheError;

/// The handful of hash commands [`super::RemoteStore`] needs.
///
/// Errors are reported as [`CacheError::TransientStore`]; callers decide how to degrade.
#[async_trait]
pub trait HashClient: Send + Sync {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError>;

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError>;

    /// Delete every key in one atomic step.
    async fn del_keys(&self, keys: &[String]) -> Result<(), CacheError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// [`HashClient`] backed by a pooled Redis connection.
#[derive(Clone)]
pub struct RedisHashClient {
    pool: Pool,
}

impl RedisHashClient {
    /// Build the connection pool.
    ///
    /// Connections are opened lazily, so an unreachable server is not an error here.
    pub fn connect(config: &RemoteStoreConfig) -> Result<Self, CacheError> {
        let url = config.url();
        let timeout = config.timeout();

        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);

        let mut redis_config = Config::from_url(url.clone());
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Configuration(format!("remote store pool: {}", e)))?;

        info!(url = %url, pool_size = config.pool_size, "Remote store pool created");
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::TransientStore(format!("connection: {}", e)))
    }
}

fn transient(op: &str, e: redis::RedisError) -> CacheError {
    CacheError::TransientStore(format!("{}: {}", op, e))
}

#[async_trait]
impl HashClient for RedisHashClient {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        conn.hget::<_, _, Option<String>>(key, field)
            .await
            .map_err(|e| transient("HGET", e))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(|e| transient("HSET", e))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.hdel::<_, _, ()>(key, field)
            .await
            .map_err(|e| transient("HDEL", e))
    }

    async fn del_keys(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            pipe.del(key).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| transient("DEL", e))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let seconds = ttl.as_secs().max(1) as i64;
        conn.expire::<_, ()>(key, seconds)
            .await
            .map_err(|e| transient("EXPIRE", e))
    }
}
