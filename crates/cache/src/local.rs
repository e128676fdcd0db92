//! In-process frequency counters backed by DashMap.
//! Suitable for a single engine node; counters do not survive restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use engage_core::error::EngageResult;
use engage_core::store::{FrequencyKey, FrequencyStore};

struct Counter {
    count: u32,
    expires_at: DateTime<Utc>,
}

/// Lock-sharded counter map. Compare-and-increment runs under the shard's
/// write lock held by `entry`, so concurrent reservations cannot overshoot.
pub struct LocalFrequencyStore {
    counters: DashMap<FrequencyKey, Counter>,
}

impl LocalFrequencyStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Remove counters whose bucket has ended. Call periodically.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        // Counted inside `retain`: concurrent inserts make `len` deltas meaningless.
        let mut evicted = 0;
        self.counters.retain(|_, counter| {
            let live = counter.expires_at > now;
            if !live {
                evicted += 1;
            }
            live
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl Default for LocalFrequencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrequencyStore for LocalFrequencyStore {
    async fn try_increment(
        &self,
        key: &FrequencyKey,
        limit: u32,
        expires_at: DateTime<Utc>,
    ) -> EngageResult<bool> {
        let mut counter = self.counters.entry(key.clone()).or_insert(Counter {
            count: 0,
            expires_at,
        });
        if counter.count >= limit {
            return Ok(false);
        }
        counter.count += 1;
        Ok(true)
    }

    async fn current(&self, key: &FrequencyKey) -> EngageResult<u32> {
        Ok(self.counters.get(key).map(|c| c.count).unwrap_or(0))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use engage_core::types::Period;

    fn key(user: &str, start: DateTime<Utc>) -> FrequencyKey {
        FrequencyKey {
            user_id: user.into(),
            rule_id: "r1".into(),
            period: Period::Hour,
            bucket_start: start,
        }
    }

    #[tokio::test]
    async fn test_increment_stops_at_limit() {
        let store = LocalFrequencyStore::new();
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap();
        let k = key("u1", start);
        let end = start + Duration::hours(1);

        assert!(store.try_increment(&k, 2, end).await.unwrap());
        assert!(store.try_increment(&k, 2, end).await.unwrap());
        assert!(!store.try_increment(&k, 2, end).await.unwrap());
        assert_eq!(store.current(&k).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_evict_expired_keeps_live_buckets() {
        let store = LocalFrequencyStore::new();
        let old = Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap();
        let live = old + Duration::hours(1);
        store
            .try_increment(&key("u1", old), 1, old + Duration::hours(1))
            .await
            .unwrap();
        store
            .try_increment(&key("u1", live), 1, live + Duration::hours(1))
            .await
            .unwrap();

        let evicted = store.evict_expired(live + Duration::minutes(5));
        assert_eq!(evicted, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.current(&key("u1", old)).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_evict_during_concurrent_inserts() {
        use std::sync::Arc;

        let store = Arc::new(LocalFrequencyStore::new());
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap();
        let expired_at = start + Duration::hours(1);
        for i in 0..200 {
            store
                .try_increment(&key(&format!("old-{i}"), start), 1, expired_at)
                .await
                .unwrap();
        }

        let live_start = start + Duration::hours(1);
        let mut writers = Vec::new();
        for w in 0..3 {
            let store = store.clone();
            writers.push(tokio::spawn(async move {
                for i in 0..2_000 {
                    let k = key(&format!("live-{w}-{i}"), live_start);
                    store
                        .try_increment(&k, 1, live_start + Duration::hours(1))
                        .await
                        .unwrap();
                }
            }));
        }

        let now = live_start + Duration::minutes(1);
        let mut evicted = 0;
        for _ in 0..50 {
            evicted += store.evict_expired(now);
            tokio::task::yield_now().await;
        }
        for writer in writers {
            writer.await.unwrap();
        }
        evicted += store.evict_expired(now);

        assert_eq!(evicted, 200);
        assert_eq!(store.len(), 3 * 2_000);
    }
}
