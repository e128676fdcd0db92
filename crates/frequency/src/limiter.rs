//! Frequency limiter: enforces `max_frequency` per (user, rule) before a
//! delivery is allowed.

use chrono::{DateTime, Utc};
use engage_core::config::FrequencyConfig;
use engage_core::error::{EngageError, EngageResult};
use engage_core::store::{FrequencyKey, FrequencyStore};
use engage_core::types::MaxFrequency;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::window::PeriodBucket;

#[derive(Debug, Clone, Copy)]
pub struct LimiterSettings {
    pub store_timeout: Duration,
    pub max_retries: u32,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self::from(&FrequencyConfig::default())
    }
}

impl From<&FrequencyConfig> for LimiterSettings {
    fn from(config: &FrequencyConfig) -> Self {
        Self {
            store_timeout: Duration::from_millis(config.store_timeout_ms),
            max_retries: config.max_retries,
        }
    }
}

pub struct FrequencyLimiter {
    store: Arc<dyn FrequencyStore>,
    settings: LimiterSettings,
}

impl FrequencyLimiter {
    pub fn new(store: Arc<dyn FrequencyStore>, settings: LimiterSettings) -> Self {
        Self { store, settings }
    }

    pub fn key(user_id: &str, rule_id: &str, bucket: &PeriodBucket) -> FrequencyKey {
        FrequencyKey {
            user_id: user_id.to_string(),
            rule_id: rule_id.to_string(),
            period: bucket.period,
            bucket_start: bucket.start,
        }
    }

    /// Reserve one delivery slot. `Ok(false)` means the cap is reached and
    /// nothing was counted; `Err(StoreUnavailable)` means the store could not
    /// be reached within the configured timeout and retries.
    pub async fn try_reserve(
        &self,
        user_id: &str,
        rule_id: &str,
        max_frequency: &MaxFrequency,
        now: DateTime<Utc>,
    ) -> EngageResult<bool> {
        if max_frequency.limit == 0 {
            return Ok(false);
        }
        let bucket = PeriodBucket::containing(max_frequency.period, now);
        let key = Self::key(user_id, rule_id, &bucket);

        // A retry after a timed-out increment may over-count, never over-deliver.
        let mut last_error = None;
        for attempt in 0..=self.settings.max_retries {
            let call = self.store.try_increment(&key, max_frequency.limit, bucket.end);
            match tokio::time::timeout(self.settings.store_timeout, call).await {
                Ok(Ok(true)) => {
                    metrics::counter!("frequency.reserved").increment(1);
                    return Ok(true);
                }
                Ok(Ok(false)) => {
                    metrics::counter!("frequency.capped").increment(1);
                    debug!(
                        user_id,
                        rule_id,
                        limit = max_frequency.limit,
                        period = %max_frequency.period,
                        "Frequency cap reached"
                    );
                    return Ok(false);
                }
                Ok(Err(e)) if e.is_store_unavailable() => {
                    warn!(attempt, error = %e, "Frequency store call failed");
                    last_error = Some(e.to_string());
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(
                        attempt,
                        timeout_ms = self.settings.store_timeout.as_millis() as u64,
                        "Frequency store call timed out"
                    );
                    last_error = Some("timed out".to_string());
                }
            }
        }

        metrics::counter!("frequency.store_errors").increment(1);
        Err(EngageError::StoreUnavailable(format!(
            "frequency store: {}",
            last_error.unwrap_or_default()
        )))
    }

    /// Deliveries still allowed for the pair in the bucket containing `now`.
    pub async fn remaining(
        &self,
        user_id: &str,
        rule_id: &str,
        max_frequency: &MaxFrequency,
        now: DateTime<Utc>,
    ) -> EngageResult<u32> {
        let bucket = PeriodBucket::containing(max_frequency.period, now);
        let key = Self::key(user_id, rule_id, &bucket);
        let used = tokio::time::timeout(self.settings.store_timeout, self.store.current(&key))
            .await
            .map_err(|_| EngageError::StoreUnavailable("frequency store: timed out".into()))??;
        Ok(max_frequency.limit.saturating_sub(used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use engage_cache::LocalFrequencyStore;
    use engage_core::types::Period;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn limiter() -> FrequencyLimiter {
        FrequencyLimiter::new(Arc::new(LocalFrequencyStore::new()), LimiterSettings::default())
    }

    fn daily(limit: u32) -> MaxFrequency {
        MaxFrequency {
            limit,
            period: Period::Day,
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
    }

    struct DownStore {
        calls: AtomicU32,
    }

    #[async_trait]
    impl FrequencyStore for DownStore {
        async fn try_increment(
            &self,
            _key: &FrequencyKey,
            _limit: u32,
            _expires_at: DateTime<Utc>,
        ) -> EngageResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngageError::StoreUnavailable("connection refused".into()))
        }

        async fn current(&self, _key: &FrequencyKey) -> EngageResult<u32> {
            Err(EngageError::StoreUnavailable("connection refused".into()))
        }
    }

    struct SlowStore;

    #[async_trait]
    impl FrequencyStore for SlowStore {
        async fn try_increment(
            &self,
            _key: &FrequencyKey,
            _limit: u32,
            _expires_at: DateTime<Utc>,
        ) -> EngageResult<bool> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(true)
        }

        async fn current(&self, _key: &FrequencyKey) -> EngageResult<u32> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_limit_one_per_day() {
        let limiter = limiter();
        let cap = daily(1);
        assert!(limiter.try_reserve("u1", "r1", &cap, noon()).await.unwrap());
        assert!(!limiter
            .try_reserve("u1", "r1", &cap, noon() + ChronoDuration::hours(3))
            .await
            .unwrap());
        // Next calendar day opens a fresh bucket.
        assert!(limiter
            .try_reserve("u1", "r1", &cap, noon() + ChronoDuration::hours(13))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_pairs_are_independent() {
        let limiter = limiter();
        let cap = daily(1);
        assert!(limiter.try_reserve("u1", "r1", &cap, noon()).await.unwrap());
        assert!(limiter.try_reserve("u2", "r1", &cap, noon()).await.unwrap());
        assert!(limiter.try_reserve("u1", "r2", &cap, noon()).await.unwrap());
        assert_eq!(limiter.remaining("u1", "r1", &cap, noon()).await.unwrap(), 0);
        assert_eq!(limiter.remaining("u3", "r1", &cap, noon()).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_stay_bounded() {
        let limiter = Arc::new(limiter());
        let cap = daily(5);
        let mut handles = Vec::new();
        for _ in 0..64 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.try_reserve("u1", "r1", &cap, noon()).await.unwrap()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
    }

    #[tokio::test]
    async fn test_unreachable_store_is_reported_after_retries() {
        let store = Arc::new(DownStore {
            calls: AtomicU32::new(0),
        });
        let limiter = FrequencyLimiter::new(
            store.clone(),
            LimiterSettings {
                store_timeout: Duration::from_millis(50),
                max_retries: 2,
            },
        );
        let err = limiter
            .try_reserve("u1", "r1", &daily(3), noon())
            .await
            .unwrap_err();
        assert!(matches!(err, EngageError::StoreUnavailable(_)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let limiter = FrequencyLimiter::new(
            Arc::new(SlowStore),
            LimiterSettings {
                store_timeout: Duration::from_millis(20),
                max_retries: 0,
            },
        );
        let err = limiter
            .try_reserve("u1", "r1", &daily(3), noon())
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
    }
}
