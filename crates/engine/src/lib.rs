//! Event-driven engagement matching: picks at most one rule per event, then
//! records the resulting delivery.

pub mod engine;
pub mod matcher;

pub use engine::{EngagementEngine, MatchOutcome};
pub use matcher::{MatchRequest, RuleMatcher};
