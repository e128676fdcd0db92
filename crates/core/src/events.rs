//! Observed behavioral events and live session telemetry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single observed user event (page view, click, idle timeout, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BehavioralEvent {
    pub event_id: String,
    pub user_id: String,
    pub event_type: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

/// Live session measurements supplied by the caller at match time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionTelemetry {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub idle_seconds: u64,
    #[serde(default)]
    pub time_on_page_seconds: u64,
    #[serde(default)]
    pub session_duration_seconds: u64,
}
