//! Match-then-record pipeline used by the HTTP surface.

use engage_analytics::DeliveryRecorder;
use engage_core::delivery::DeliveryDecision;
use engage_core::error::EngageResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::matcher::{MatchRequest, RuleMatcher};

/// A fired rule together with the delivery row recorded for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchOutcome {
    pub delivery_id: Uuid,
    #[serde(flatten)]
    pub decision: DeliveryDecision,
}

pub struct EngagementEngine {
    matcher: Arc<RuleMatcher>,
    recorder: Arc<DeliveryRecorder>,
}

impl EngagementEngine {
    pub fn new(matcher: Arc<RuleMatcher>, recorder: Arc<DeliveryRecorder>) -> Self {
        Self { matcher, recorder }
    }

    pub fn matcher(&self) -> &Arc<RuleMatcher> {
        &self.matcher
    }

    pub fn recorder(&self) -> &Arc<DeliveryRecorder> {
        &self.recorder
    }

    /// Match the event and, when a rule fires, persist the delivery before
    /// returning so analytics reads always see it.
    pub async fn process(&self, request: &MatchRequest) -> EngageResult<Option<MatchOutcome>> {
        let start = std::time::Instant::now();
        let matched = self.matcher.match_event(request).await;
        metrics::histogram!("matcher.latency_us").record(start.elapsed().as_micros() as f64);
        let Some(decision) = matched? else {
            return Ok(None);
        };

        let delivery_id = self.recorder.record(&decision).await?;
        info!(
            delivery_id = %delivery_id,
            rule_id = %decision.rule_id,
            user_id = %decision.user_id,
            template_id = %decision.template_id,
            "Engagement delivered"
        );
        Ok(Some(MatchOutcome {
            delivery_id,
            decision,
        }))
    }
}
