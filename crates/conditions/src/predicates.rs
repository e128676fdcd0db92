//! Operator semantics for psychographic conditions.
//!
//! Every comparison fails closed: operands that cannot be coerced make the
//! condition false rather than raising an error.

use engage_core::profile::ProfileValue;
use engage_core::types::ConditionOperator;
use std::cmp::Ordering;

pub fn compare_values(
    actual: &ProfileValue<'_>,
    operator: ConditionOperator,
    expected: &serde_json::Value,
) -> bool {
    match operator {
        ConditionOperator::Equals => scalar_eq(actual, expected).unwrap_or(false),
        ConditionOperator::NotEquals => scalar_eq(actual, expected).map_or(false, |eq| !eq),
        ConditionOperator::GreaterThan => {
            numeric_cmp(actual, expected).map_or(false, |o| o == Ordering::Greater)
        }
        ConditionOperator::LessThan => {
            numeric_cmp(actual, expected).map_or(false, |o| o == Ordering::Less)
        }
        ConditionOperator::Contains => contains(actual, expected),
    }
}

/// Exact comparison after coercing `actual` to the type of `expected`.
/// `None` when the pair is not comparable at all.
fn scalar_eq(actual: &ProfileValue<'_>, expected: &serde_json::Value) -> Option<bool> {
    match expected {
        serde_json::Value::Number(n) => {
            let expected = n.as_f64()?;
            let actual = match actual {
                ProfileValue::Number(a) => *a,
                ProfileValue::Text(t) => match t.trim().parse::<f64>() {
                    Ok(parsed) => parsed,
                    Err(_) => return Some(false),
                },
                ProfileValue::List(_) => return None,
            };
            Some(actual == expected)
        }
        serde_json::Value::String(s) => match actual {
            ProfileValue::Text(t) => Some(*t == s.as_str()),
            ProfileValue::Number(a) => Some(a.to_string() == *s),
            ProfileValue::List(_) => None,
        },
        serde_json::Value::Bool(b) => match actual {
            ProfileValue::Text(t) => Some(t.parse::<bool>().map_or(false, |parsed| parsed == *b)),
            _ => None,
        },
        _ => None,
    }
}

fn numeric_cmp(actual: &ProfileValue<'_>, expected: &serde_json::Value) -> Option<Ordering> {
    let a = match actual {
        ProfileValue::Number(n) => *n,
        ProfileValue::Text(t) => t.trim().parse::<f64>().ok()?,
        ProfileValue::List(_) => return None,
    };
    let b = match expected {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    a.partial_cmp(&b)
}

fn contains(actual: &ProfileValue<'_>, expected: &serde_json::Value) -> bool {
    let needle = match expected {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => return false,
    };
    match actual {
        ProfileValue::List(items) => items.iter().any(|item| *item == needle),
        ProfileValue::Text(t) => t.contains(needle.as_str()),
        ProfileValue::Number(_) => false,
    }
}
