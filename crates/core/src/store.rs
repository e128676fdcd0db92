//! Backing-store seams for the two pieces of shared mutable state: frequency
//! counters and the delivery log.
//!
//! Implementations report outages as [`EngageError::StoreUnavailable`].
//!
//! [`EngageError::StoreUnavailable`]: crate::error::EngageError::StoreUnavailable

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delivery::{Delivery, DeliveryResponse, ResponseOutcome};
use crate::error::EngageResult;
use crate::types::Period;

/// Identifies one bounded counter: a (user, rule) pair within one period bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrequencyKey {
    pub user_id: String,
    pub rule_id: String,
    pub period: Period,
    pub bucket_start: DateTime<Utc>,
}

impl FrequencyKey {
    pub fn storage_key(&self, prefix: &str) -> String {
        format!(
            "{prefix}:freq:{}:{}:{}:{}",
            self.rule_id,
            self.user_id,
            self.period,
            self.bucket_start.timestamp()
        )
    }
}

#[async_trait]
pub trait FrequencyStore: Send + Sync {
    /// Increment the counter for `key` only if it is currently below `limit`.
    /// Returns whether the increment happened. Must be atomic per key.
    async fn try_increment(
        &self,
        key: &FrequencyKey,
        limit: u32,
        expires_at: DateTime<Utc>,
    ) -> EngageResult<bool>;

    /// Current count for `key`, zero when absent.
    async fn current(&self, key: &FrequencyKey) -> EngageResult<u32>;
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert(&self, delivery: Delivery) -> EngageResult<()>;

    /// Attach `response` unless one is already present. Never overwrites.
    async fn attach_response(
        &self,
        delivery_id: Uuid,
        response: DeliveryResponse,
    ) -> EngageResult<ResponseOutcome>;

    async fn get(&self, delivery_id: Uuid) -> EngageResult<Option<Delivery>>;

    /// Deliveries for an app created at or after `since`.
    async fn list_for_app(
        &self,
        client_app_id: &str,
        since: DateTime<Utc>,
    ) -> EngageResult<Vec<Delivery>>;
}
