//! Redis-backed frequency counters shared by every engine node.
//!
//! Compare-and-increment runs as one Lua script, so the check and the
//! increment are atomic on the Redis side. Keys expire when their bucket ends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engage_core::config::RedisConfig;
use engage_core::error::{EngageError, EngageResult};
use engage_core::store::{FrequencyKey, FrequencyStore};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

const RESERVE_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
    return 0
end
redis.call('INCR', KEYS[1])
redis.call('EXPIREAT', KEYS[1], ARGV[2])
return 1
"#;

pub struct RedisFrequencyStore {
    conn: ConnectionManager,
    script: redis::Script,
    key_prefix: String,
}

impl RedisFrequencyStore {
    /// Connect to the first configured Redis URL and verify connectivity.
    pub async fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str())?;
        let conn = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("timed out connecting to {url}"))??;

        let mut ping_conn = conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut ping_conn).await?;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            conn,
            script: redis::Script::new(RESERVE_SCRIPT),
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn store_error(e: redis::RedisError) -> EngageError {
        metrics::counter!("cache.redis.errors").increment(1);
        EngageError::StoreUnavailable(format!("redis: {e}"))
    }
}

#[async_trait]
impl FrequencyStore for RedisFrequencyStore {
    async fn try_increment(
        &self,
        key: &FrequencyKey,
        limit: u32,
        expires_at: DateTime<Utc>,
    ) -> EngageResult<bool> {
        let mut conn = self.conn.clone();
        let reserved: i64 = self
            .script
            .key(key.storage_key(&self.key_prefix))
            .arg(limit)
            .arg(expires_at.timestamp())
            .invoke_async(&mut conn)
            .await
            .map_err(Self::store_error)?;
        Ok(reserved == 1)
    }

    async fn current(&self, key: &FrequencyKey) -> EngageResult<u32> {
        let mut conn = self.conn.clone();
        let count: Option<u32> = conn
            .get(key.storage_key(&self.key_prefix))
            .await
            .map_err(Self::store_error)?;
        Ok(count.unwrap_or(0))
    }
}
