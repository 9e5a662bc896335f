//! Redis-backed atomic counter
//!
//! Floor-clamped decrement and compare-and-max run as Lua scripts so the
//! read-compare-write happens inside Redis, atomic per key even with many
//! gateway instances mutating the same stream.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::{AsyncCommands, Script};

use super::{AtomicCounter, CounterError};
use crate::redis_client::RedisClient;

static DECR_FLOOR: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local v = redis.call('DECR', KEYS[1])
        if v < 0 then
            redis.call('SET', KEYS[1], 0)
            return 0
        end
        return v
        "#,
    )
});

static COMPARE_AND_MAX: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local cur = tonumber(redis.call('GET', KEYS[1]) or '0')
        local cand = tonumber(ARGV[1])
        if cand > cur then
            redis.call('SET', KEYS[1], cand)
            return cand
        end
        return cur
        "#,
    )
});

pub struct RedisCounter {
    client: RedisClient,
}

impl RedisCounter {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AtomicCounter for RedisCounter {
    async fn incr(&self, key: &str) -> Result<i64, CounterError> {
        let mut conn = self.client.connection();
        let count: i64 = conn.incr(key, 1).await?;
        Ok(count)
    }

    async fn decr_floor(&self, key: &str) -> Result<i64, CounterError> {
        let mut conn = self.client.connection();
        let count: i64 = DECR_FLOOR.key(key).invoke_async(&mut conn).await?;
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<i64, CounterError> {
        let mut conn = self.client.connection();
        let count: Option<i64> = conn.get(key).await?;
        Ok(count.unwrap_or(0))
    }

    async fn compare_and_max(&self, key: &str, candidate: i64) -> Result<i64, CounterError> {
        let mut conn = self.client.connection();
        let peak: i64 = COMPARE_AND_MAX
            .key(key)
            .arg(candidate)
            .invoke_async(&mut conn)
            .await?;
        Ok(peak)
    }

    async fn remove(&self, key: &str) -> Result<(), CounterError> {
        let mut conn = self.client.connection();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}
