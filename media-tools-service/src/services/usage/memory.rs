use super::{StoreError, UsageStore};
use crate::models::{ConsumeOutcome, UsageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;

/// Process-local store. State is lost on restart and not shared between
/// instances; meant for tests and single-node development.
#[derive(Default)]
pub struct InMemoryUsageStore {
    records: DashMap<String, UsageRecord>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn get(&self, user_id: &str) -> Result<Option<UsageRecord>, StoreError> {
        Ok(self.records.get(user_id).map(|r| r.value().clone()))
    }

    async fn put(&self, record: &UsageRecord) -> Result<(), StoreError> {
        self.records
            .entry(record.user_id.clone())
            .and_modify(|existing| {
                existing.generations = record.generations;
                existing.last_reset = record.last_reset;
            })
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn atomic_increment(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> Result<ConsumeOutcome, StoreError> {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self
            .records
            .entry(user_id.to_string())
            .or_insert_with(|| UsageRecord::new(user_id, 0, now));
        let record = entry.value_mut();

        let accepted = if record.window_expired(now, window) {
            record.generations = 1;
            record.last_reset = now;
            true
        } else if record.generations < limit {
            record.generations += 1;
            true
        } else {
            false
        };

        Ok(ConsumeOutcome {
            accepted,
            record: record.clone(),
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryUsageStore::new();
        assert!(store.get("alice").await.unwrap().is_none());

        let record = UsageRecord::new("alice", 1, at(1_000));
        store.put(&record).await.unwrap();

        assert_eq!(store.get("alice").await.unwrap(), Some(record));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn put_overwrites_counter_fields() {
        let store = InMemoryUsageStore::new();
        store.put(&UsageRecord::new("alice", 1, at(0))).await.unwrap();
        store.put(&UsageRecord::new("alice", 2, at(5))).await.unwrap();

        let stored = store.get("alice").await.unwrap().unwrap();
        assert_eq!(stored.generations, 2);
        assert_eq!(stored.last_reset, at(5));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn atomic_increment_creates_missing_record() {
        let store = InMemoryUsageStore::new();

        let outcome = store.atomic_increment("alice", at(0), HOUR, 2).await.unwrap();

        assert!(outcome.accepted);
        assert_eq!(outcome.record, UsageRecord::new("alice", 1, at(0)));
    }

    #[tokio::test]
    async fn atomic_increment_rejects_at_limit_without_mutation() {
        let store = InMemoryUsageStore::new();
        store.put(&UsageRecord::new("alice", 2, at(0))).await.unwrap();

        let outcome = store.atomic_increment("alice", at(10), HOUR, 2).await.unwrap();

        assert!(!outcome.accepted);
        assert_eq!(outcome.record, UsageRecord::new("alice", 2, at(0)));
    }

    #[tokio::test]
    async fn atomic_increment_counts_from_checked_record() {
        let store = InMemoryUsageStore::new();
        // A record created by a check starts at zero inside its window.
        store.put(&UsageRecord::new("alice", 0, at(0))).await.unwrap();

        let outcome = store.atomic_increment("alice", at(10), HOUR, 2).await.unwrap();

        assert!(outcome.accepted);
        assert_eq!(outcome.record, UsageRecord::new("alice", 1, at(0)));
    }

    #[tokio::test]
    async fn atomic_increment_resets_expired_window() {
        let store = InMemoryUsageStore::new();
        store.put(&UsageRecord::new("alice", 2, at(0))).await.unwrap();

        let outcome = store
            .atomic_increment("alice", at(3_600_000), HOUR, 2)
            .await
            .unwrap();

        assert!(outcome.accepted);
        assert_eq!(outcome.record, UsageRecord::new("alice", 1, at(3_600_000)));
    }
}
