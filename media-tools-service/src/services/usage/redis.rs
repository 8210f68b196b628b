//! Redis-backed usage records: one hash per user at `usage:{user_id}` with
//! `generations` and `last_reset` (epoch milliseconds) fields.

use super::{StoreError, UsageStore};
use crate::models::{ConsumeOutcome, UsageRecord};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use redis::{aio::ConnectionManager, Client, Script};
use std::collections::HashMap;
use std::time::Duration;

const BACKEND: &str = "redis";

static INCREMENT_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local generations = tonumber(redis.call('HGET', key, 'generations'))
local last_reset = tonumber(redis.call('HGET', key, 'last_reset'))

if generations == nil or last_reset == nil or now - last_reset >= window then
    redis.call('HSET', key, 'generations', 1, 'last_reset', now)
    return {1, 1, now}
end

if generations < limit then
    generations = generations + 1
    redis.call('HSET', key, 'generations', generations)
    return {1, generations, last_reset}
end

return {0, generations, last_reset}
"#,
    )
});

fn record_key(user_id: &str) -> String {
    format!("usage:{}", user_id)
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::new(BACKEND, "decode", format!("invalid timestamp {}", ms)))
}

fn parse_record(
    user_id: &str,
    fields: &HashMap<String, String>,
) -> Result<Option<UsageRecord>, StoreError> {
    let (Some(generations), Some(last_reset)) =
        (fields.get("generations"), fields.get("last_reset"))
    else {
        return Ok(None);
    };

    let generations: u32 = generations
        .parse()
        .map_err(|e| StoreError::new(BACKEND, "decode", e))?;
    let last_reset: i64 = last_reset
        .parse()
        .map_err(|e| StoreError::new(BACKEND, "decode", e))?;

    Ok(Some(UsageRecord::new(
        user_id,
        generations,
        millis_to_datetime(last_reset)?,
    )))
}

#[derive(Clone)]
pub struct RedisUsageStore {
    manager: ConnectionManager,
}

impl RedisUsageStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url).map_err(|e| StoreError::new(BACKEND, "open", e))?;

        // ConnectionManager reconnects on its own after transient failures.
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            StoreError::new(BACKEND, "connect", e)
        })?;

        tracing::info!("Successfully connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl UsageStore for RedisUsageStore {
    async fn get(&self, user_id: &str) -> Result<Option<UsageRecord>, StoreError> {
        let mut conn = self.manager.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(record_key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::new(BACKEND, "HGETALL", e))?;

        parse_record(user_id, &fields)
    }

    async fn put(&self, record: &UsageRecord) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("HSET")
            .arg(record_key(&record.user_id))
            .arg("generations")
            .arg(record.generations)
            .arg("last_reset")
            .arg(record.last_reset.timestamp_millis())
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| StoreError::new(BACKEND, "HSET", e))
    }

    async fn atomic_increment(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> Result<ConsumeOutcome, StoreError> {
        let mut conn = self.manager.clone();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);

        let (accepted, generations, last_reset): (i64, i64, i64) = INCREMENT_SCRIPT
            .key(record_key(user_id))
            .arg(now.timestamp_millis())
            .arg(window_ms)
            .arg(limit)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::new(BACKEND, "EVALSHA", e))?;

        Ok(ConsumeOutcome {
            accepted: accepted == 1,
            record: UsageRecord::new(
                user_id,
                generations.clamp(0, i64::from(u32::MAX)) as u32,
                millis_to_datetime(last_reset)?,
            ),
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::new(BACKEND, "PING", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_stored_hash() {
        let record = parse_record(
            "alice",
            &fields(&[("generations", "2"), ("last_reset", "1700000000000")]),
        )
        .unwrap()
        .unwrap();

        assert_eq!(record.generations, 2);
        assert_eq!(record.last_reset.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn empty_hash_is_missing_record() {
        assert!(parse_record("alice", &HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn corrupt_counter_is_a_store_error() {
        let err = parse_record(
            "alice",
            &fields(&[("generations", "lots"), ("last_reset", "0")]),
        )
        .unwrap_err();
        assert_eq!(err.operation, "decode");
    }

    #[tokio::test]
    #[ignore = "Requires Redis at TEST_REDIS_URL (default redis://localhost:6379)"]
    async fn atomic_increment_against_live_redis() {
        let url =
            std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let store = RedisUsageStore::connect(&url).await.unwrap();
        let user = format!("test-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        let now = Utc::now();
        let hour = Duration::from_secs(3600);

        assert!(store.atomic_increment(&user, now, hour, 2).await.unwrap().accepted);
        assert!(store.atomic_increment(&user, now, hour, 2).await.unwrap().accepted);
        let third = store.atomic_increment(&user, now, hour, 2).await.unwrap();
        assert!(!third.accepted);
        assert_eq!(third.record.generations, 2);
    }
}
