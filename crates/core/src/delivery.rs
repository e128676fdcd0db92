//! Delivery decisions and the immutable delivery log records built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::{ActionType, Priority};

/// Outcome of a successful match: what to render, where, for whom.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryDecision {
    pub rule_id: String,
    pub variant_id: Option<String>,
    pub template_id: String,
    pub channel: String,
    pub priority: Priority,
    pub action_type: ActionType,
    pub client_app_id: String,
    pub user_id: String,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    pub id: Uuid,
    pub rule_id: String,
    pub variant_id: Option<String>,
    pub client_app_id: String,
    pub user_id: String,
    pub delivery_channel: String,
    pub created_at: DateTime<Utc>,
    pub response: Option<DeliveryResponse>,
}

impl Delivery {
    pub fn from_decision(decision: &DeliveryDecision) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: decision.rule_id.clone(),
            variant_id: decision.variant_id.clone(),
            client_app_id: decision.client_app_id.clone(),
            user_id: decision.user_id.clone(),
            delivery_channel: decision.channel.clone(),
            created_at: decision.decided_at,
            response: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryResponse {
    pub action_taken: ResponseAction,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    Responded,
    Converted,
    Dismissed,
    Ignored,
    Clicked,
    Replied,
    NoResponse,
}

impl ResponseAction {
    pub const ALL: [ResponseAction; 7] = [
        ResponseAction::Responded,
        ResponseAction::Converted,
        ResponseAction::Dismissed,
        ResponseAction::Ignored,
        ResponseAction::Clicked,
        ResponseAction::Replied,
        ResponseAction::NoResponse,
    ];

    /// Ignored and no-response outcomes do not count as responses.
    pub fn is_meaningful(&self) -> bool {
        !matches!(self, ResponseAction::Ignored | ResponseAction::NoResponse)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ResponseAction::Responded => "responded",
            ResponseAction::Converted => "converted",
            ResponseAction::Dismissed => "dismissed",
            ResponseAction::Ignored => "ignored",
            ResponseAction::Clicked => "clicked",
            ResponseAction::Replied => "replied",
            ResponseAction::NoResponse => "no_response",
        }
    }
}

impl fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of attaching a response. The first response is authoritative.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Recorded,
    AlreadyRecorded(DeliveryResponse),
}
