//! Trigger-condition evaluation for a single rule.

use chrono::{DateTime, Duration, Utc};
use engage_core::error::EngageResult;
use engage_core::events::{BehavioralEvent, SessionTelemetry};
use engage_core::profile::UserProfile;
use engage_core::types::{
    BehavioralCondition, PsychographicCondition, TimeWindow, TimingConditions, TriggerConditions,
};
use tracing::trace;

use crate::predicates::compare_values;

/// Everything a rule's conditions may observe about one user at one moment.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub profile: &'a UserProfile,
    pub events: &'a [BehavioralEvent],
    pub telemetry: &'a SessionTelemetry,
    pub now: DateTime<Utc>,
}

/// Stateless evaluator. Condition groups and the conditions within each group
/// are joined with AND; an empty group matches everyone.
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Returns `Err` only for malformed configuration (unresolvable field path,
    /// unknown operator). Absent profile values evaluate to `false`.
    pub fn evaluate(
        &self,
        conditions: &TriggerConditions,
        input: &EvaluationInput<'_>,
    ) -> EngageResult<bool> {
        let psychographic = self.evaluate_psychographic(&conditions.psychographic_conditions, input)?;
        let matched = psychographic
            && self.evaluate_behavioral(&conditions.behavioral_conditions, input)
            && self.evaluate_timing(&conditions.timing_conditions, input.telemetry);
        Ok(matched)
    }

    fn evaluate_psychographic(
        &self,
        conditions: &[PsychographicCondition],
        input: &EvaluationInput<'_>,
    ) -> EngageResult<bool> {
        // Parse every condition up front so a malformed rule is always reported,
        // not only when earlier conditions happen to pass.
        let parsed = conditions
            .iter()
            .map(|c| -> EngageResult<_> { Ok((c.parsed_field()?, c.parsed_operator()?, &c.value)) })
            .collect::<EngageResult<Vec<_>>>()?;

        Ok(parsed.into_iter().all(|(field, operator, expected)| {
            let matched = field
                .resolve(input.profile)
                .map_or(false, |actual| compare_values(&actual, operator, expected));
            trace!(field = %field, ?operator, matched, "Psychographic condition evaluated");
            matched
        }))
    }

    fn evaluate_behavioral(
        &self,
        conditions: &[BehavioralCondition],
        input: &EvaluationInput<'_>,
    ) -> bool {
        conditions.iter().all(|condition| {
            let count = input
                .events
                .iter()
                .filter(|e| e.event_type == condition.event_type)
                .filter(|e| in_window(e, condition.time_window, input))
                .count();
            condition.frequency.is_satisfied_by(count)
        })
    }

    fn evaluate_timing(&self, timing: &TimingConditions, telemetry: &SessionTelemetry) -> bool {
        let at_least = |threshold: Option<u64>, value: u64| threshold.map_or(true, |t| value >= t);
        at_least(timing.idle_time_seconds, telemetry.idle_seconds)
            && at_least(timing.time_on_page_seconds, telemetry.time_on_page_seconds)
            && at_least(
                timing.session_duration_seconds,
                telemetry.session_duration_seconds,
            )
    }
}

fn in_window(event: &BehavioralEvent, window: TimeWindow, input: &EvaluationInput<'_>) -> bool {
    if event.occurred_at > input.now {
        return false;
    }
    let cutoff = match window {
        TimeWindow::Session => match &input.telemetry.session_id {
            Some(session_id) => return event.session_id.as_deref() == Some(session_id.as_str()),
            None => {
                let duration = i64::try_from(input.telemetry.session_duration_seconds)
                    .unwrap_or(i64::MAX);
                Duration::try_seconds(duration)
                    .and_then(|d| input.now.checked_sub_signed(d))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC)
            }
        },
        TimeWindow::LastHour => input.now - Duration::hours(1),
        TimeWindow::LastDay => input.now - Duration::days(1),
        TimeWindow::LastWeek => input.now - Duration::weeks(1),
    };
    event.occurred_at >= cutoff
}
