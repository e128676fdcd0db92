//! Sticky weighted variant allocation.
//!
//! A user's position in `[0, 1)` is derived from a SHA-256 digest of the
//! (rule, user) pair, so assignment is stable across calls, nodes and
//! restarts. Weights are normalized by their sum before partitioning.

use engage_core::error::{EngageError, EngageResult};
use engage_core::types::{EngagementRule, Variant};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Template chosen for a user. `variant_id` is `None` when the rule runs
/// without an enabled A/B test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub variant_id: Option<String>,
    pub template_id: String,
    pub is_control: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VariantAllocator;

impl VariantAllocator {
    pub fn new() -> Self {
        Self
    }

    pub fn allocate(&self, rule: &EngagementRule, user_id: &str) -> EngageResult<Allocation> {
        let ab = match rule.ab_test_config.as_ref().filter(|ab| ab.enabled) {
            Some(ab) => ab,
            None => {
                return Ok(Allocation {
                    variant_id: None,
                    template_id: rule.engagement_action.template_id.clone(),
                    is_control: false,
                })
            }
        };

        let variant = match ab.variants.as_slice() {
            [] => {
                return Err(EngageError::Configuration(format!(
                    "rule '{}': enabled A/B test has no variants",
                    rule.id
                )))
            }
            [only] => only,
            variants => {
                let point = bucket(&rule.id, user_id);
                match pick_weighted(variants, point) {
                    Some(v) => v,
                    None => ab.control().ok_or_else(|| {
                        EngageError::Configuration(format!(
                            "rule '{}': variant weights sum to zero and no control variant is set",
                            rule.id
                        ))
                    })?,
                }
            }
        };

        debug!(rule_id = %rule.id, user_id = user_id, variant_id = %variant.id, "Variant allocated");
        Ok(Allocation {
            variant_id: Some(variant.id.clone()),
            template_id: variant.template_id.clone(),
            is_control: variant.is_control,
        })
    }
}

/// Stable position of `(rule_id, user_id)` in `[0, 1)`.
pub fn bucket(rule_id: &str, user_id: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(rule_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    // Keep 53 bits so the quotient is exact in an f64 and strictly below 1.
    (u64::from_be_bytes(prefix) >> 11) as f64 / (1u64 << 53) as f64
}

/// Map `point` into the cumulative partition of normalized weights. `None`
/// when no variant carries positive weight.
fn pick_weighted(variants: &[Variant], point: f64) -> Option<&Variant> {
    let weight = |v: &Variant| {
        if v.traffic_weight.is_finite() && v.traffic_weight > 0.0 {
            v.traffic_weight
        } else {
            0.0
        }
    };
    let total: f64 = variants.iter().map(weight).sum();
    if total <= 0.0 {
        warn!("All variant weights are zero, falling back to control");
        return None;
    }

    let mut cumulative = 0.0;
    let mut last_weighted = None;
    for variant in variants {
        let share = weight(variant) / total;
        if share == 0.0 {
            continue;
        }
        cumulative += share;
        last_weighted = Some(variant);
        if point < cumulative {
            return Some(variant);
        }
    }
    // Rounding can leave the final cumulative a hair under 1.0.
    last_weighted
}
