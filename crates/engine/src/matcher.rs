//! Rule matcher: orders an app's active rules by priority and fires the first
//! one whose conditions hold and whose frequency cap has room.

use chrono::{DateTime, Utc};
use engage_conditions::{ConditionEvaluator, EvaluationInput};
use engage_core::catalog::RuleCatalog;
use engage_core::delivery::DeliveryDecision;
use engage_core::error::{EngageError, EngageResult};
use engage_core::events::{BehavioralEvent, SessionTelemetry};
use engage_core::profile::UserProfile;
use engage_core::types::EngagementRule;
use engage_experimentation::VariantAllocator;
use engage_frequency::FrequencyLimiter;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// One inbound event together with what is known about the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRequest {
    pub client_app_id: String,
    pub user_id: String,
    #[serde(default)]
    pub profile: UserProfile,
    pub event: BehavioralEvent,
    /// Prior events for the user. The triggering event is appended unless an
    /// event with the same `event_id` is already present.
    #[serde(default)]
    pub recent_events: Vec<BehavioralEvent>,
    #[serde(default)]
    pub telemetry: SessionTelemetry,
}

impl MatchRequest {
    /// Evaluation time is the triggering event's timestamp. It is caller
    /// supplied and picks the frequency bucket; the HTTP boundary rejects
    /// events from before the current hour.
    pub fn now(&self) -> DateTime<Utc> {
        self.event.occurred_at
    }

    /// The user's events, each `event_id` counted once.
    fn event_window(&self) -> Vec<BehavioralEvent> {
        let mut seen = HashSet::new();
        self.recent_events
            .iter()
            .chain(std::iter::once(&self.event))
            .filter(|e| e.user_id == self.user_id)
            .filter(|e| seen.insert(e.event_id.as_str()))
            .cloned()
            .collect()
    }
}

pub struct RuleMatcher {
    catalog: Arc<RuleCatalog>,
    evaluator: ConditionEvaluator,
    allocator: VariantAllocator,
    limiter: Arc<FrequencyLimiter>,
}

impl RuleMatcher {
    pub fn new(catalog: Arc<RuleCatalog>, limiter: Arc<FrequencyLimiter>) -> Self {
        Self {
            catalog,
            evaluator: ConditionEvaluator::new(),
            allocator: VariantAllocator::new(),
            limiter,
        }
    }

    pub fn catalog(&self) -> &Arc<RuleCatalog> {
        &self.catalog
    }

    /// Match against the current catalog snapshot.
    pub async fn match_event(&self, request: &MatchRequest) -> EngageResult<Option<DeliveryDecision>> {
        let rules = self.catalog.snapshot();
        self.match_rules(request, &rules).await
    }

    /// Match `request` against `rules`. At most one rule fires.
    ///
    /// Malformed rules are skipped. A frequency store outage counts as "cap
    /// reached" for that rule; if no later rule fires, the outage is returned
    /// as `StoreUnavailable` so callers can tell it apart from a plain miss.
    pub async fn match_rules(
        &self,
        request: &MatchRequest,
        rules: &[EngagementRule],
    ) -> EngageResult<Option<DeliveryDecision>> {
        let now = request.now();
        let events = request.event_window();
        let input = EvaluationInput {
            profile: &request.profile,
            events: &events,
            telemetry: &request.telemetry,
            now,
        };

        let mut candidates: Vec<&EngagementRule> = rules
            .iter()
            .filter(|r| r.client_app_id == request.client_app_id && r.is_active())
            .collect();
        // Stable: rules equal on both keys keep catalog order.
        candidates.sort_by_key(|r| (Reverse(r.priority()), Reverse(r.updated_at)));

        let mut store_error: Option<EngageError> = None;

        for rule in candidates {
            match self.evaluator.evaluate(&rule.trigger_conditions, &input) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    skip_rule(rule, &e);
                    continue;
                }
            }

            let allocation = match self.allocator.allocate(rule, &request.user_id) {
                Ok(allocation) => allocation,
                Err(e) => {
                    skip_rule(rule, &e);
                    continue;
                }
            };

            let max_frequency = &rule.engagement_action.max_frequency;
            match self
                .limiter
                .try_reserve(&request.user_id, &rule.id, max_frequency, now)
                .await
            {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) if e.is_store_unavailable() => {
                    warn!(rule_id = %rule.id, user_id = %request.user_id, error = %e, "Frequency store unavailable, treating as capped");
                    store_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }

            metrics::counter!("matcher.decisions").increment(1);
            debug!(
                rule_id = %rule.id,
                user_id = %request.user_id,
                variant_id = ?allocation.variant_id,
                "Engagement rule fired"
            );
            return Ok(Some(DeliveryDecision {
                rule_id: rule.id.clone(),
                variant_id: allocation.variant_id,
                template_id: allocation.template_id,
                channel: rule.engagement_action.resolved_channel(),
                priority: rule.priority(),
                action_type: rule.engagement_action.action_type,
                client_app_id: request.client_app_id.clone(),
                user_id: request.user_id.clone(),
                decided_at: now,
            }));
        }

        metrics::counter!("matcher.no_match").increment(1);
        match store_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

fn skip_rule(rule: &EngagementRule, error: &EngageError) {
    metrics::counter!("matcher.rule_skipped").increment(1);
    warn!(rule_id = %rule.id, error = %error, "Skipping misconfigured engagement rule");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use engage_cache::LocalFrequencyStore;
    use engage_core::store::{FrequencyKey, FrequencyStore};
    use engage_core::types::{
        AbTestConfig, ActionType, EngagementAction, MaxFrequency, Period, PsychographicCondition,
        Priority, RuleStatus, TriggerConditions, Variant,
    };
    use engage_frequency::LimiterSettings;
    use serde_json::json;
    use std::collections::HashMap;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn rule(id: &str, priority: Priority, limit: u32) -> EngagementRule {
        EngagementRule {
            id: id.into(),
            client_app_id: "app-1".into(),
            name: id.into(),
            description: String::new(),
            trigger_conditions: TriggerConditions::default(),
            engagement_action: EngagementAction {
                action_type: ActionType::Tooltip,
                template_id: format!("tpl-{id}"),
                priority,
                max_frequency: MaxFrequency {
                    limit,
                    period: Period::Day,
                },
                channel: None,
            },
            ab_test_config: None,
            status: RuleStatus::Active,
            created_at: at() - Duration::days(10),
            updated_at: at() - Duration::days(10),
        }
    }

    fn request(user_id: &str) -> MatchRequest {
        MatchRequest {
            client_app_id: "app-1".into(),
            user_id: user_id.into(),
            profile: UserProfile {
                user_id: user_id.into(),
                ..Default::default()
            },
            event: BehavioralEvent {
                event_id: "e1".into(),
                user_id: user_id.into(),
                event_type: "page_view".into(),
                session_id: None,
                occurred_at: at(),
                properties: HashMap::new(),
            },
            recent_events: Vec::new(),
            telemetry: SessionTelemetry::default(),
        }
    }

    fn matcher_with(store: Arc<dyn FrequencyStore>) -> RuleMatcher {
        let limiter = FrequencyLimiter::new(store, LimiterSettings::default());
        RuleMatcher::new(Arc::new(RuleCatalog::new()), Arc::new(limiter))
    }

    fn matcher() -> RuleMatcher {
        matcher_with(Arc::new(LocalFrequencyStore::new()))
    }

    #[tokio::test]
    async fn test_only_one_rule_fires() {
        let m = matcher();
        let rules = vec![rule("low", Priority::Low, 5), rule("crit", Priority::Critical, 5)];
        let decision = m.match_rules(&request("u1"), &rules).await.unwrap().unwrap();
        assert_eq!(decision.rule_id, "crit");
        assert_eq!(decision.template_id, "tpl-crit");
        assert_eq!(decision.channel, "in_app");
        assert_eq!(decision.decided_at, at());
    }

    #[tokio::test]
    async fn test_priority_tie_prefers_recently_updated() {
        let m = matcher();
        let older = rule("older", Priority::High, 5);
        let mut newer = rule("newer", Priority::High, 5);
        newer.updated_at = at() - Duration::days(1);
        let decision = m
            .match_rules(&request("u1"), &[older, newer])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decision.rule_id, "newer");
    }

    #[tokio::test]
    async fn test_capped_rule_falls_through_to_next() {
        let m = matcher();
        let rules = vec![rule("top", Priority::High, 1), rule("next", Priority::Low, 1)];
        let req = request("u1");

        let first = m.match_rules(&req, &rules).await.unwrap().unwrap();
        assert_eq!(first.rule_id, "top");
        let second = m.match_rules(&req, &rules).await.unwrap().unwrap();
        assert_eq!(second.rule_id, "next");
        assert!(m.match_rules(&req, &rules).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_and_foreign_rules_ignored() {
        let m = matcher();
        let mut paused = rule("paused", Priority::Critical, 5);
        paused.status = RuleStatus::Inactive;
        let mut foreign = rule("foreign", Priority::Critical, 5);
        foreign.client_app_id = "app-2".into();
        let decision = m
            .match_rules(&request("u1"), &[paused, foreign, rule("ok", Priority::Low, 5)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decision.rule_id, "ok");
    }

    #[tokio::test]
    async fn test_misconfigured_rule_is_skipped() {
        let m = matcher();
        let mut broken = rule("broken", Priority::Critical, 5);
        broken.trigger_conditions.psychographic_conditions = vec![PsychographicCondition {
            field: "personality_traits.nonexistent_field".into(),
            operator: "greater_than".into(),
            value: json!(0.1),
        }];
        let decision = m
            .match_rules(&request("u1"), &[broken, rule("fallback", Priority::Low, 5)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decision.rule_id, "fallback");
    }

    #[tokio::test]
    async fn test_unallocatable_rule_is_skipped_without_reserving() {
        let m = matcher();
        let mut broken = rule("broken", Priority::Critical, 1);
        broken.ab_test_config = Some(AbTestConfig {
            enabled: true,
            test_name: "zero".into(),
            variants: vec![
                Variant {
                    id: "a".into(),
                    name: "A".into(),
                    template_id: "tpl-a".into(),
                    traffic_weight: 0.0,
                    is_control: false,
                },
                Variant {
                    id: "b".into(),
                    name: "B".into(),
                    template_id: "tpl-b".into(),
                    traffic_weight: 0.0,
                    is_control: false,
                },
            ],
        });
        let decision = m
            .match_rules(&request("u1"), &[broken.clone(), rule("fallback", Priority::Low, 5)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decision.rule_id, "fallback");
        let remaining = m
            .limiter
            .remaining("u1", "broken", &broken.engagement_action.max_frequency, at())
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_non_matching_conditions_yield_none() {
        let m = matcher();
        let mut r = rule("r1", Priority::High, 5);
        r.trigger_conditions.psychographic_conditions = vec![PsychographicCondition {
            field: "risk_profile".into(),
            operator: "equals".into(),
            value: json!("aggressive"),
        }];
        assert!(m.match_rules(&request("u1"), &[r]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_notification_defaults_to_push_channel() {
        let m = matcher();
        let mut r = rule("r1", Priority::High, 5);
        r.engagement_action.action_type = ActionType::Notification;
        let decision = m.match_rules(&request("u1"), &[r]).await.unwrap().unwrap();
        assert_eq!(decision.channel, "push");
        assert_eq!(decision.action_type, ActionType::Notification);
    }

    struct DownStore;

    #[async_trait]
    impl FrequencyStore for DownStore {
        async fn try_increment(
            &self,
            _key: &FrequencyKey,
            _limit: u32,
            _expires_at: DateTime<Utc>,
        ) -> EngageResult<bool> {
            Err(EngageError::StoreUnavailable("connection refused".into()))
        }

        async fn current(&self, _key: &FrequencyKey) -> EngageResult<u32> {
            Err(EngageError::StoreUnavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let m = matcher_with(Arc::new(DownStore));
        let err = m
            .match_rules(&request("u1"), &[rule("r1", Priority::High, 5)])
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_no_candidates_is_plain_miss_even_with_store_down() {
        let m = matcher_with(Arc::new(DownStore));
        assert!(m.match_rules(&request("u1"), &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_triggering_event_counts_toward_behavioral_conditions() {
        use engage_core::types::{BehavioralCondition, BehavioralFrequency, TimeWindow};
        let m = matcher();
        let mut r = rule("r1", Priority::High, 5);
        r.trigger_conditions.behavioral_conditions = vec![BehavioralCondition {
            event_type: "page_view".into(),
            frequency: BehavioralFrequency::Once,
            time_window: TimeWindow::LastHour,
        }];
        assert!(m.match_rules(&request("u1"), &[r]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_trigger_repeated_in_history_counts_once() {
        use engage_core::types::{BehavioralCondition, BehavioralFrequency, TimeWindow};
        let m = matcher();
        let mut r = rule("r1", Priority::High, 5);
        r.trigger_conditions.behavioral_conditions = vec![BehavioralCondition {
            event_type: "purchase".into(),
            frequency: BehavioralFrequency::Multiple,
            time_window: TimeWindow::LastDay,
        }];
        let mut req = request("u1");
        req.event.event_type = "purchase".into();
        req.recent_events = vec![req.event.clone()];
        assert_eq!(req.event_window().len(), 1);
        assert!(m.match_rules(&req, &[r.clone()]).await.unwrap().is_none());

        // A distinct earlier purchase makes two.
        let mut earlier = req.event.clone();
        earlier.event_id = "e0".into();
        earlier.occurred_at = at() - Duration::hours(2);
        req.recent_events.push(earlier);
        assert!(m.match_rules(&req, &[r]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_match_event_uses_catalog_snapshot() {
        let m = matcher();
        m.catalog().replace(vec![rule("r1", Priority::High, 5)]);
        let decision = m.match_event(&request("u1")).await.unwrap().unwrap();
        assert_eq!(decision.rule_id, "r1");
    }
}
