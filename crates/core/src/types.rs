//! Engagement rule configuration model.
//!
//! Rules are authored outside the engine and are read-only here. Enumerations
//! that form the configuration contract (operators, frequencies, time windows,
//! periods) serialize with their snake_case configuration names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{EngageError, EngageResult};
use crate::profile::ProfileField;

/// A named condition-to-action mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngagementRule {
    pub id: String,
    pub client_app_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub trigger_conditions: TriggerConditions,
    pub engagement_action: EngagementAction,
    #[serde(default)]
    pub ab_test_config: Option<AbTestConfig>,
    pub status: RuleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TriggerConditions {
    #[serde(default)]
    pub psychographic_conditions: Vec<PsychographicCondition>,
    #[serde(default)]
    pub behavioral_conditions: Vec<BehavioralCondition>,
    #[serde(default)]
    pub timing_conditions: TimingConditions,
}

/// `{field, operator, value}` as authored. Field and operator stay textual so
/// a single bad condition invalidates only its own rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PsychographicCondition {
    pub field: String,
    pub operator: String,
    pub value: serde_json::Value,
}

impl PsychographicCondition {
    pub fn parsed_field(&self) -> EngageResult<ProfileField> {
        self.field.parse()
    }

    pub fn parsed_operator(&self) -> EngageResult<ConditionOperator> {
        self.operator.parse()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
}

impl FromStr for ConditionOperator {
    type Err = EngageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equals" => Ok(ConditionOperator::Equals),
            "not_equals" => Ok(ConditionOperator::NotEquals),
            "greater_than" => Ok(ConditionOperator::GreaterThan),
            "less_than" => Ok(ConditionOperator::LessThan),
            "contains" => Ok(ConditionOperator::Contains),
            other => Err(EngageError::Configuration(format!(
                "unknown operator '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BehavioralCondition {
    pub event_type: String,
    pub frequency: BehavioralFrequency,
    pub time_window: TimeWindow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BehavioralFrequency {
    Once,
    Multiple,
    Never,
}

impl BehavioralFrequency {
    pub fn is_satisfied_by(&self, count: usize) -> bool {
        match self {
            BehavioralFrequency::Once => count >= 1,
            BehavioralFrequency::Multiple => count >= 2,
            BehavioralFrequency::Never => count == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    Session,
    LastHour,
    LastDay,
    LastWeek,
}

/// Thresholds in seconds; a condition holds when the live value is >= threshold.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimingConditions {
    #[serde(default)]
    pub idle_time_seconds: Option<u64>,
    #[serde(default)]
    pub time_on_page_seconds: Option<u64>,
    #[serde(default)]
    pub session_duration_seconds: Option<u64>,
}

impl TimingConditions {
    pub fn is_empty(&self) -> bool {
        self.idle_time_seconds.is_none()
            && self.time_on_page_seconds.is_none()
            && self.session_duration_seconds.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngagementAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub template_id: String,
    pub priority: Priority,
    pub max_frequency: MaxFrequency,
    /// Delivery channel label. Defaults from the action type when absent.
    #[serde(default)]
    pub channel: Option<String>,
}

impl EngagementAction {
    pub fn resolved_channel(&self) -> String {
        match &self.channel {
            Some(channel) if !channel.is_empty() => channel.clone(),
            _ => self.action_type.default_channel().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Checkin,
    Tooltip,
    Modal,
    Notification,
}

impl ActionType {
    pub fn default_channel(&self) -> &'static str {
        match self {
            ActionType::Notification => "push",
            _ => "in_app",
        }
    }
}

/// Declaration order is significance order: `Critical` sorts highest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaxFrequency {
    pub limit: u32,
    pub period: Period,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Hour,
    Day,
    Week,
    Month,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbTestConfig {
    pub enabled: bool,
    #[serde(default)]
    pub test_name: String,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

impl AbTestConfig {
    pub fn control(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    pub id: String,
    pub name: String,
    pub template_id: String,
    pub traffic_weight: f64,
    #[serde(default)]
    pub is_control: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Active,
    Inactive,
    Testing,
}

impl EngagementRule {
    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    pub fn priority(&self) -> Priority {
        self.engagement_action.priority
    }

    /// Structural checks applied when a rule enters the catalog.
    pub fn validate(&self) -> EngageResult<()> {
        if self.id.is_empty() {
            return Err(EngageError::Configuration("rule id must not be empty".into()));
        }
        if self.engagement_action.max_frequency.limit == 0 {
            return Err(EngageError::Configuration(format!(
                "rule '{}': max_frequency.limit must be at least 1",
                self.id
            )));
        }
        for condition in &self.trigger_conditions.psychographic_conditions {
            condition.parsed_field().map_err(|e| prefix_rule(&self.id, e))?;
            condition.parsed_operator().map_err(|e| prefix_rule(&self.id, e))?;
        }
        if let Some(ab) = self.ab_test_config.as_ref().filter(|ab| ab.enabled) {
            if ab.variants.is_empty() {
                return Err(EngageError::Configuration(format!(
                    "rule '{}': enabled A/B test has no variants",
                    self.id
                )));
            }
            let controls = ab.variants.iter().filter(|v| v.is_control).count();
            if controls != 1 {
                return Err(EngageError::Configuration(format!(
                    "rule '{}': enabled A/B test needs exactly one control variant, found {controls}",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

fn prefix_rule(rule_id: &str, err: EngageError) -> EngageError {
    match err {
        EngageError::Configuration(msg) => {
            EngageError::Configuration(format!("rule '{rule_id}': {msg}"))
        }
        other => other,
    }
}
