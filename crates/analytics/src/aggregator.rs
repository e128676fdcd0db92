//! Engagement performance reporting, recomputed from the delivery log.
//!
//! Reports are derived data: the delivery log is the only source of truth and
//! the per-app report cache exists solely to answer scans that time out.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use dashmap::DashMap;
use engage_core::catalog::RuleCatalog;
use engage_core::delivery::Delivery;
use engage_core::error::{EngageError, EngageResult};
use engage_core::store::DeliveryStore;
use engage_core::types::EngagementRule;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_CHANNEL: &str = "in_app";

/// Reporting window: `days` trailing calendar days (UTC) ending on `now`'s day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyticsWindow {
    pub days: u32,
    pub now: DateTime<Utc>,
    /// Unresponded deliveries older than this count as `no_response`.
    pub no_response_cutoff: Duration,
}

impl AnalyticsWindow {
    pub fn trailing_days(days: u32, now: DateTime<Utc>, no_response_cutoff: Duration) -> Self {
        Self {
            days: days.max(1),
            now,
            no_response_cutoff,
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        self.now.date_naive() - Duration::days(i64::from(self.days.max(1)) - 1)
    }

    pub fn start(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.first_day().and_hms_opt(0, 0, 0).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub deliveries: u64,
    pub responses: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RulePerformance {
    pub rule_id: String,
    pub rule_name: Option<String>,
    pub deliveries: u64,
    pub responses: u64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantPerformance {
    pub rule_id: String,
    pub variant_id: String,
    pub is_control: bool,
    pub deliveries: u64,
    pub responses: u64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelBreakdown {
    pub channel: String,
    pub deliveries: u64,
    pub responses: u64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsReport {
    pub client_app_id: String,
    pub generated_at: DateTime<Utc>,
    pub window_days: u32,
    pub total_rules: u64,
    pub active_rules: u64,
    pub total_deliveries: u64,
    pub total_responses: u64,
    pub conversion_rate: f64,
    /// Unresponded deliveries still inside the reporting cutoff.
    pub pending_responses: u64,
    pub time_series: Vec<DailyPoint>,
    pub rule_performance: Vec<RulePerformance>,
    pub variant_performance: Vec<VariantPerformance>,
    pub response_distribution: BTreeMap<String, u64>,
    pub channel_breakdown: Vec<ChannelBreakdown>,
    /// Set when this report was served from cache after a scan timeout.
    pub stale: bool,
}

#[derive(Default)]
struct Tally {
    deliveries: u64,
    responses: u64,
}

impl Tally {
    fn add(&mut self, responded: bool) {
        self.deliveries += 1;
        if responded {
            self.responses += 1;
        }
    }

    fn rate(&self) -> f64 {
        rate(self.responses, self.deliveries)
    }
}

fn rate(responses: u64, deliveries: u64) -> f64 {
    if deliveries > 0 {
        responses as f64 / deliveries as f64
    } else {
        0.0
    }
}

fn past_cutoff(created_at: DateTime<Utc>, window: &AnalyticsWindow) -> bool {
    created_at
        .checked_add_signed(window.no_response_cutoff)
        .map_or(false, |deadline| deadline <= window.now)
}

/// Build a report from a rule set and the app's deliveries. Pure: identical
/// inputs give identical reports.
pub fn build_report(
    client_app_id: &str,
    rules: &[EngagementRule],
    deliveries: &[Delivery],
    window: &AnalyticsWindow,
) -> AnalyticsReport {
    let app_rules: Vec<&EngagementRule> = rules
        .iter()
        .filter(|r| r.client_app_id == client_app_id)
        .collect();
    let rules_by_id: HashMap<&str, &EngagementRule> =
        app_rules.iter().map(|r| (r.id.as_str(), *r)).collect();

    let start = window.start();
    let first_day = window.first_day();
    let mut daily: BTreeMap<NaiveDate, Tally> = (0..i64::from(window.days.max(1)))
        .map(|offset| (first_day + Duration::days(offset), Tally::default()))
        .collect();

    let mut totals = Tally::default();
    let mut pending = 0u64;
    let mut per_rule: BTreeMap<&str, Tally> = BTreeMap::new();
    let mut per_variant: BTreeMap<(&str, &str), Tally> = BTreeMap::new();
    let mut per_channel: BTreeMap<&str, Tally> = BTreeMap::new();
    let mut distribution: BTreeMap<String, u64> = BTreeMap::new();

    let in_window = deliveries.iter().filter(|d| {
        d.client_app_id == client_app_id && d.created_at >= start && d.created_at <= window.now
    });

    for delivery in in_window {
        // Responses observed after `now` are not visible yet.
        let response = delivery
            .response
            .as_ref()
            .filter(|r| r.observed_at <= window.now);
        let responded = response.map_or(false, |r| r.action_taken.is_meaningful());

        totals.add(responded);
        per_rule.entry(delivery.rule_id.as_str()).or_default().add(responded);
        if let Some(variant_id) = &delivery.variant_id {
            per_variant
                .entry((delivery.rule_id.as_str(), variant_id.as_str()))
                .or_default()
                .add(responded);
        }
        let channel = if delivery.delivery_channel.is_empty() {
            DEFAULT_CHANNEL
        } else {
            delivery.delivery_channel.as_str()
        };
        per_channel.entry(channel).or_default().add(responded);

        if let Some(tally) = daily.get_mut(&delivery.created_at.date_naive()) {
            tally.deliveries += 1;
        }

        match response {
            Some(r) => {
                *distribution.entry(r.action_taken.label().to_string()).or_default() += 1;
                if responded {
                    if let Some(tally) = daily.get_mut(&r.observed_at.date_naive()) {
                        tally.responses += 1;
                    }
                }
            }
            None if past_cutoff(delivery.created_at, window) => {
                *distribution.entry("no_response".to_string()).or_default() += 1;
            }
            None => pending += 1,
        }
    }

    let mut rule_performance: Vec<RulePerformance> = per_rule
        .into_iter()
        .map(|(rule_id, tally)| RulePerformance {
            rule_id: rule_id.to_string(),
            rule_name: rules_by_id.get(rule_id).map(|r| r.name.clone()),
            deliveries: tally.deliveries,
            responses: tally.responses,
            conversion_rate: tally.rate(),
        })
        .collect();
    rule_performance.sort_by(|a, b| {
        b.deliveries
            .cmp(&a.deliveries)
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });

    let variant_performance = per_variant
        .into_iter()
        .map(|((rule_id, variant_id), tally)| VariantPerformance {
            rule_id: rule_id.to_string(),
            variant_id: variant_id.to_string(),
            is_control: rules_by_id
                .get(rule_id)
                .and_then(|r| r.ab_test_config.as_ref())
                .and_then(|ab| ab.variants.iter().find(|v| v.id == variant_id))
                .map_or(false, |v| v.is_control),
            deliveries: tally.deliveries,
            responses: tally.responses,
            conversion_rate: tally.rate(),
        })
        .collect();

    let channel_breakdown = per_channel
        .into_iter()
        .map(|(channel, tally)| ChannelBreakdown {
            channel: channel.to_string(),
            deliveries: tally.deliveries,
            responses: tally.responses,
            conversion_rate: tally.rate(),
        })
        .collect();

    let time_series = daily
        .into_iter()
        .map(|(date, tally)| DailyPoint {
            date,
            deliveries: tally.deliveries,
            responses: tally.responses,
        })
        .collect();

    AnalyticsReport {
        client_app_id: client_app_id.to_string(),
        generated_at: window.now,
        window_days: window.days.max(1),
        total_rules: app_rules.len() as u64,
        active_rules: app_rules.iter().filter(|r| r.is_active()).count() as u64,
        total_deliveries: totals.deliveries,
        total_responses: totals.responses,
        conversion_rate: totals.rate(),
        pending_responses: pending,
        time_series,
        rule_performance,
        variant_performance,
        response_distribution: distribution,
        channel_breakdown,
        stale: false,
    }
}

pub struct AnalyticsAggregator {
    store: Arc<dyn DeliveryStore>,
    catalog: Arc<RuleCatalog>,
    last_reports: DashMap<String, AnalyticsReport>,
}

impl AnalyticsAggregator {
    pub fn new(store: Arc<dyn DeliveryStore>, catalog: Arc<RuleCatalog>) -> Self {
        Self {
            store,
            catalog,
            last_reports: DashMap::new(),
        }
    }

    pub async fn aggregate(
        &self,
        client_app_id: &str,
        window: &AnalyticsWindow,
    ) -> EngageResult<AnalyticsReport> {
        let deliveries = self
            .store
            .list_for_app(client_app_id, window.start())
            .await?;
        let rules = self.catalog.snapshot();
        let report = build_report(client_app_id, &rules, &deliveries, window);

        metrics::counter!("analytics.reports").increment(1);
        debug!(
            client_app_id,
            deliveries = report.total_deliveries,
            responses = report.total_responses,
            "Analytics report computed"
        );
        self.last_reports
            .insert(client_app_id.to_string(), report.clone());
        Ok(report)
    }

    /// Like [`aggregate`](Self::aggregate) but bounded by `timeout`. On expiry
    /// the last report computed for the app is returned with `stale = true`.
    pub async fn aggregate_with_timeout(
        &self,
        client_app_id: &str,
        window: &AnalyticsWindow,
        timeout: std::time::Duration,
    ) -> EngageResult<AnalyticsReport> {
        match tokio::time::timeout(timeout, self.aggregate(client_app_id, window)).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!("analytics.timeouts").increment(1);
                warn!(
                    client_app_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Analytics scan timed out"
                );
                self.cached(client_app_id)
                    .map(|mut report| {
                        report.stale = true;
                        report
                    })
                    .ok_or_else(|| {
                        EngageError::Timeout(format!(
                            "analytics scan for '{client_app_id}' exceeded {}ms",
                            timeout.as_millis()
                        ))
                    })
            }
        }
    }

    pub fn cached(&self, client_app_id: &str) -> Option<AnalyticsReport> {
        self.last_reports.get(client_app_id).map(|r| r.clone())
    }
}
