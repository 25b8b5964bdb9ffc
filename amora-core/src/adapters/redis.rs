use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use amora_shared::clients::redis::RedisClient;

use super::memory::{limiter_key, MemoryRateLimiter};
use crate::ports::*;

fn unavailable(e: redis::RedisError) -> PortError {
    if e.is_timeout() {
        PortError::Timeout
    } else {
        PortError::Unavailable(e.to_string())
    }
}

#[derive(Clone)]
pub struct RedisCache {
    redis: RedisClient,
}

impl RedisCache {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, PortError> {
        self.redis.get(key).await.map_err(unavailable)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), PortError> {
        self.redis.set(key, value, ttl_secs.max(1)).await.map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> Result<(), PortError> {
        self.redis.del(key).await.map_err(unavailable)
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, PortError> {
        self.redis.del_prefix(prefix).await.map_err(unavailable)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, PortError> {
        self.redis.set_nx(key, value, ttl_secs.max(1)).await.map_err(unavailable)
    }
}

/// Redis sorted-set sliding window. When Redis is unreachable the decision
/// falls back to a process-local window so budgets still apply per replica.
pub struct RedisRateLimiter {
    redis: RedisClient,
    fallback: MemoryRateLimiter,
    clock: Arc<dyn Clock>,
}

impl RedisRateLimiter {
    pub fn new(redis: RedisClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            redis,
            fallback: MemoryRateLimiter::new(clock.clone()),
            clock,
        }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(
        &self,
        bucket: &str,
        subject: &str,
        budget: u64,
        window: Duration,
    ) -> Result<RateDecision, PortError> {
        let key = limiter_key(bucket, subject, window);
        let now_ms = self.clock.now().timestamp_millis();
        let member = format!("{now_ms}:{}", Uuid::new_v4());

        match self
            .redis
            .sliding_window_hit(&key, now_ms, window.as_millis() as i64, budget, &member)
            .await
        {
            Ok((true, _)) => Ok(RateDecision::Allowed),
            Ok((false, retry_ms)) => Ok(RateDecision::Denied {
                retry_after_secs: ((retry_ms + 999) / 1000).max(1) as u64,
            }),
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "redis rate limiter unavailable; using local window");
                Ok(self.fallback.hit(key, budget, window))
            }
        }
    }
}
