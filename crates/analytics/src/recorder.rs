//! Turns decisions into delivery records and attaches the first observed
//! response.

use chrono::{DateTime, Utc};
use engage_core::delivery::{
    Delivery, DeliveryDecision, DeliveryResponse, ResponseAction, ResponseOutcome,
};
use engage_core::error::{EngageError, EngageResult};
use engage_core::store::DeliveryStore;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct DeliveryRecorder {
    store: Arc<dyn DeliveryStore>,
}

impl DeliveryRecorder {
    pub fn new(store: Arc<dyn DeliveryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn DeliveryStore> {
        self.store.clone()
    }

    /// Persist a delivery for `decision`, independent of any later response.
    pub async fn record(&self, decision: &DeliveryDecision) -> EngageResult<Uuid> {
        let delivery = Delivery::from_decision(decision);
        let id = delivery.id;
        self.store.insert(delivery).await?;
        metrics::counter!("deliveries.recorded").increment(1);
        debug!(
            delivery_id = %id,
            rule_id = %decision.rule_id,
            user_id = %decision.user_id,
            channel = %decision.channel,
            "Delivery recorded"
        );
        Ok(id)
    }

    /// Attach a response. A second response is a no-op reported as
    /// [`ResponseOutcome::AlreadyRecorded`]; the first one stands. A response
    /// observed before its delivery was created is rejected.
    pub async fn record_response(
        &self,
        delivery_id: Uuid,
        action_taken: ResponseAction,
        observed_at: DateTime<Utc>,
    ) -> EngageResult<ResponseOutcome> {
        let delivery = self
            .store
            .get(delivery_id)
            .await?
            .ok_or_else(|| EngageError::NotFound(format!("delivery {delivery_id}")))?;
        if observed_at < delivery.created_at {
            return Err(EngageError::Validation(format!(
                "response observed at {observed_at} precedes delivery {delivery_id} created at {}",
                delivery.created_at
            )));
        }

        let outcome = self
            .store
            .attach_response(
                delivery_id,
                DeliveryResponse {
                    action_taken,
                    observed_at,
                },
            )
            .await?;
        match &outcome {
            ResponseOutcome::Recorded => {
                metrics::counter!("deliveries.responses", "action" => action_taken.label())
                    .increment(1);
            }
            ResponseOutcome::AlreadyRecorded(existing) => {
                metrics::counter!("deliveries.response_conflicts").increment(1);
                info!(
                    delivery_id = %delivery_id,
                    existing = %existing.action_taken,
                    attempted = %action_taken,
                    "Response already recorded, ignoring"
                );
            }
        }
        Ok(outcome)
    }

    pub async fn get(&self, delivery_id: Uuid) -> EngageResult<Option<Delivery>> {
        self.store.get(delivery_id).await
    }
}
