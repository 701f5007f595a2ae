//! Redis-backed dedup store.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis_utils::{with_timeout, SharedConnectionManager, DEFAULT_REDIS_TIMEOUT};
use std::time::Duration;
use tracing::warn;

use crate::error::StoreError;
use crate::store::DedupStore;

/// Dedup store over `SET key value EX ttl`, `EXISTS` and `DEL`.
///
/// Every command runs under a deadline; an elapsed deadline surfaces as
/// `StoreError::Timeout` rather than being read as "key absent".
#[derive(Clone)]
pub struct RedisDedupStore {
    redis: SharedConnectionManager,
    timeout: Duration,
}

impl RedisDedupStore {
    pub fn new(redis: SharedConnectionManager) -> Self {
        Self::with_command_timeout(redis, DEFAULT_REDIS_TIMEOUT)
    }

    pub fn with_command_timeout(redis: SharedConnectionManager, timeout: Duration) -> Self {
        Self { redis, timeout }
    }

    async fn connection(&self) -> redis::aio::ConnectionManager {
        self.redis.lock().await.clone()
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await;
        with_timeout(self.timeout, conn.exists(key))
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "Redis EXISTS failed");
                StoreError::from_redis(e, self.timeout)
            })
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        // Redis EX takes whole seconds; never round a short TTL down to "no expiry"
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.connection().await;
        with_timeout(self.timeout, conn.set_ex::<_, _, ()>(key, value, seconds))
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "Redis SET EX failed");
                StoreError::from_redis(e, self.timeout)
            })
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await;
        let removed: i64 = with_timeout(self.timeout, conn.del(key))
            .await
            .map_err(|e| StoreError::from_redis(e, self.timeout))?;
        Ok(removed > 0)
    }
}
