//! Condition evaluation: pure predicate logic over a profile snapshot, the
//! recent event window, and live session telemetry.

pub mod evaluator;
pub mod predicates;

pub use evaluator::{ConditionEvaluator, EvaluationInput};
