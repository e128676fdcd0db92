//! In-memory snapshot of engagement rule configuration.
//!
//! Readers take a cheap `Arc` clone of the current rule set; writers swap the
//! whole set. A rule edited while a match is in flight becomes visible to the
//! next snapshot, not the current one.

use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::EngageResult;
use crate::types::EngagementRule;

/// Summary of a catalog load or replace.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LoadReport {
    pub loaded: usize,
    pub rejected: Vec<String>,
}

pub struct RuleCatalog {
    rules: RwLock<Arc<Vec<EngagementRule>>>,
}

impl RuleCatalog {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Current rule set.
    pub fn snapshot(&self) -> Arc<Vec<EngagementRule>> {
        self.rules.read().clone()
    }

    /// Replace the rule set. Rules failing validation are dropped and reported.
    pub fn replace(&self, rules: Vec<EngagementRule>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut accepted = Vec::with_capacity(rules.len());
        for rule in rules {
            match rule.validate() {
                Ok(()) => accepted.push(rule),
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "Rejecting invalid engagement rule");
                    metrics::counter!("catalog.rules_rejected").increment(1);
                    report.rejected.push(e.to_string());
                }
            }
        }
        report.loaded = accepted.len();
        *self.rules.write() = Arc::new(accepted);
        debug!(loaded = report.loaded, rejected = report.rejected.len(), "Rule catalog replaced");
        report
    }

    /// Rules owned by `client_app_id`, in catalog order.
    pub fn for_app(&self, client_app_id: &str) -> Vec<EngagementRule> {
        self.snapshot()
            .iter()
            .filter(|r| r.client_app_id == client_app_id)
            .cloned()
            .collect()
    }

    /// Active rules owned by `client_app_id`, in catalog order.
    pub fn active_for_app(&self, client_app_id: &str) -> Vec<EngagementRule> {
        self.snapshot()
            .iter()
            .filter(|r| r.client_app_id == client_app_id && r.is_active())
            .cloned()
            .collect()
    }

    /// Parse a JSON array of rules. Entries that fail to deserialize are
    /// skipped and reported rather than failing the whole document.
    pub fn parse_rules(json: &str) -> EngageResult<(Vec<EngagementRule>, Vec<String>)> {
        let raw: Vec<serde_json::Value> = serde_json::from_str(json)?;
        let mut rules = Vec::with_capacity(raw.len());
        let mut rejected = Vec::new();
        for (index, value) in raw.into_iter().enumerate() {
            match serde_json::from_value::<EngagementRule>(value) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    warn!(index = index, error = %e, "Skipping malformed engagement rule");
                    rejected.push(format!("rule #{index}: {e}"));
                }
            }
        }
        Ok((rules, rejected))
    }

    /// Load rules from a JSON file and replace the snapshot.
    pub async fn load_from_path(&self, path: &std::path::Path) -> EngageResult<LoadReport> {
        let json = tokio::fs::read_to_string(path).await?;
        let (rules, mut rejected) = Self::parse_rules(&json)?;
        let mut report = self.replace(rules);
        rejected.append(&mut report.rejected);
        report.rejected = rejected;
        Ok(report)
    }

    /// Periodically reload the snapshot from `path`. A failed reload keeps the
    /// previous snapshot.
    pub fn spawn_refresh(
        self: Arc<Self>,
        path: PathBuf,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; the initial load happens at startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.load_from_path(&path).await {
                    Ok(report) => {
                        info!(
                            loaded = report.loaded,
                            rejected = report.rejected.len(),
                            "Rule catalog refreshed"
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, path = %path.display(), "Rule refresh failed, keeping previous snapshot");
                    }
                }
            }
        })
    }
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::rule;
    use crate::types::Priority;

    #[test]
    fn test_replace_drops_invalid_rules() {
        let catalog = RuleCatalog::new();
        let good = rule("r1", Priority::High);
        let mut bad = rule("r2", Priority::Low);
        bad.engagement_action.max_frequency.limit = 0;

        let report = catalog.replace(vec![good, bad]);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(catalog.snapshot().len(), 1);
        assert_eq!(catalog.snapshot()[0].id, "r1");
    }

    #[test]
    fn test_snapshot_is_stable_across_replace() {
        let catalog = RuleCatalog::new();
        catalog.replace(vec![rule("r1", Priority::High)]);
        let before = catalog.snapshot();
        catalog.replace(vec![rule("r2", Priority::High), rule("r3", Priority::Low)]);
        assert_eq!(before.len(), 1);
        assert_eq!(catalog.snapshot().len(), 2);
    }

    #[test]
    fn test_for_app_filters_by_owner() {
        let catalog = RuleCatalog::new();
        let mut other = rule("r2", Priority::High);
        other.client_app_id = "app-2".into();
        catalog.replace(vec![rule("r1", Priority::High), other]);
        let rules = catalog.for_app("app-2");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "r2");
    }

    #[test]
    fn test_active_for_app_skips_inactive_and_testing() {
        use crate::types::RuleStatus;
        let catalog = RuleCatalog::new();
        let mut paused = rule("r2", Priority::High);
        paused.status = RuleStatus::Inactive;
        let mut trial = rule("r3", Priority::High);
        trial.status = RuleStatus::Testing;
        catalog.replace(vec![rule("r1", Priority::Low), paused, trial]);
        let ids: Vec<String> = catalog.active_for_app("app-1").into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["r1".to_string()]);
    }

    #[test]
    fn test_parse_rules_tolerates_bad_entries() {
        let good = serde_json::to_value(rule("r1", Priority::Medium)).unwrap();
        let mut bad = good.clone();
        bad["engagement_action"]["priority"] = serde_json::json!("urgent");
        let doc = serde_json::to_string(&vec![good, bad]).unwrap();

        let (rules, rejected) = RuleCatalog::parse_rules(&doc).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].starts_with("rule #1"));
    }

    #[test]
    fn test_parse_rules_rejects_non_array() {
        assert!(RuleCatalog::parse_rules("{\"id\": 1}").is_err());
    }

    #[tokio::test]
    async fn test_load_from_path() {
        let path = std::env::temp_dir().join(format!("engage-rules-{}.json", uuid::Uuid::new_v4()));
        let doc = serde_json::to_string(&vec![rule("r1", Priority::High)]).unwrap();
        tokio::fs::write(&path, doc).await.unwrap();

        let catalog = RuleCatalog::new();
        let report = catalog.load_from_path(&path).await.unwrap();
        assert_eq!(report.loaded, 1);
        assert!(report.rejected.is_empty());

        tokio::fs::remove_file(&path).await.unwrap();
        assert!(catalog.load_from_path(&path).await.is_err());
        // A failed load leaves the snapshot untouched.
        assert_eq!(catalog.snapshot().len(), 1);
    }
}
