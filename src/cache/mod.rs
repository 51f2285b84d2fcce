//! Redis layer shared between service instances.
//!
//! Only the provider access token lives here. Redis being down never fails a
//! payment: the credential cache falls back to its in-process slot.

pub mod error;
pub mod keys;

use crate::config::CacheConfig;
use crate::payments::token::SharedTokenStore;
use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use error::{CacheError, CacheResult};
use keys::credential::AccessTokenKey;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Redis connection pool type alias
pub type RedisPool = Pool<RedisConnectionManager>;

/// Initialize the Redis pool. A failed initial PING is logged, not fatal.
pub async fn init_cache_pool(redis_url: &str, config: &CacheConfig) -> CacheResult<RedisPool> {
    info!(
        max_connections = config.max_connections,
        "Initializing Redis cache pool"
    );

    let manager = RedisConnectionManager::new(redis_url).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        CacheError::ConnectionError(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .connection_timeout(Duration::from_secs(5))
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            CacheError::ConnectionError(e.to_string())
        })?;

    if let Err(e) = health_check(&pool).await {
        warn!("Initial Redis connection test failed, but continuing: {}", e);
    }

    info!("Redis cache pool initialized successfully");
    Ok(pool)
}

/// PING through the pool.
pub async fn health_check(pool: &RedisPool) -> CacheResult<()> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}

/// Provider access token stored under `v1:credential:access_token:<provider>`
/// with a TTL matching the token's remaining lifetime.
#[derive(Clone)]
pub struct RedisTokenStore {
    pool: RedisPool,
    key: String,
}

impl RedisTokenStore {
    pub fn new(pool: RedisPool, provider: &str) -> Self {
        Self {
            pool,
            key: AccessTokenKey::new(provider).to_string(),
        }
    }

    async fn read(&self) -> CacheResult<Option<(String, Duration)>> {
        let mut conn = self.pool.get().await?;
        let token: Option<String> = redis::cmd("GET")
            .arg(&self.key)
            .query_async(&mut *conn)
            .await?;
        let Some(token) = token else {
            return Ok(None);
        };

        // -1 (no expiry) and -2 (gone) are both treated as unusable.
        let ttl_ms: i64 = redis::cmd("PTTL")
            .arg(&self.key)
            .query_async(&mut *conn)
            .await?;
        if ttl_ms <= 0 {
            return Ok(None);
        }
        Ok(Some((token, Duration::from_millis(ttl_ms as u64))))
    }

    async fn delete(&self) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(&self.key)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn write(&self, token: &str, ttl: Duration) -> CacheResult<()> {
        let ttl_ms = ttl.as_millis() as u64;
        if ttl_ms == 0 {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        let _: () = redis::cmd("SET")
            .arg(&self.key)
            .arg(token)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SharedTokenStore for RedisTokenStore {
    async fn load(&self) -> Option<(String, Duration)> {
        match self.read().await {
            Ok(found) => {
                debug!(key = %self.key, hit = found.is_some(), "shared token lookup");
                found
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "shared token lookup failed");
                None
            }
        }
    }

    async fn store(&self, token: &str, ttl: Duration) {
        if let Err(e) = self.write(token, ttl).await {
            warn!(key = %self.key, error = %e, "failed to share access token");
        }
    }

    async fn clear(&self) {
        if let Err(e) = self.delete().await {
            warn!(key = %self.key, error = %e, "failed to clear shared access token");
        }
    }
}
