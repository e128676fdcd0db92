//! In-memory delivery log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use engage_core::delivery::{Delivery, DeliveryResponse, ResponseOutcome};
use engage_core::error::{EngageError, EngageResult};
use engage_core::store::DeliveryStore;
use uuid::Uuid;

pub struct InMemoryDeliveryStore {
    deliveries: DashMap<Uuid, Delivery>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self {
            deliveries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

impl Default for InMemoryDeliveryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn insert(&self, delivery: Delivery) -> EngageResult<()> {
        self.deliveries.insert(delivery.id, delivery);
        Ok(())
    }

    async fn attach_response(
        &self,
        delivery_id: Uuid,
        response: DeliveryResponse,
    ) -> EngageResult<ResponseOutcome> {
        let mut delivery = self
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| EngageError::NotFound(format!("delivery {delivery_id}")))?;
        if let Some(existing) = &delivery.response {
            return Ok(ResponseOutcome::AlreadyRecorded(existing.clone()));
        }
        delivery.response = Some(response);
        Ok(ResponseOutcome::Recorded)
    }

    async fn get(&self, delivery_id: Uuid) -> EngageResult<Option<Delivery>> {
        Ok(self.deliveries.get(&delivery_id).map(|d| d.clone()))
    }

    async fn list_for_app(
        &self,
        client_app_id: &str,
        since: DateTime<Utc>,
    ) -> EngageResult<Vec<Delivery>> {
        let mut deliveries: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|d| d.client_app_id == client_app_id && d.created_at >= since)
            .map(|d| d.value().clone())
            .collect();
        deliveries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(deliveries)
    }
}
