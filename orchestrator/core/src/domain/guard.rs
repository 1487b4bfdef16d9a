// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Guard
//!
//! Pure decision logic for pre-action checks against the policy store.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Aggregates matched rules into a block / warn outcome

use crate::domain::policy::{PolicyRule, RuleAction, RuleId, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Caller context for a guard check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardContext {
    pub domain: String,
    pub agent_id: String,
    /// Evidence satisfying `require` rules, e.g. `backup_taken: true`
    #[serde(default)]
    pub evidence: BTreeMap<String, serde_json::Value>,
}

impl GuardContext {
    pub fn new(domain: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            agent_id: agent_id.into(),
            evidence: BTreeMap::new(),
        }
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.evidence.insert(key.into(), value);
        self
    }

    /// Evidence counts when present and not `false`, `null`, `0` or empty
    pub fn has_evidence(&self, key: &str) -> bool {
        match self.evidence.get(key) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => {
                let s = s.trim();
                !s.is_empty() && !s.eq_ignore_ascii_case("false")
            }
            Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(serde_json::Value::Array(a)) => !a.is_empty(),
            Some(serde_json::Value::Object(o)) => !o.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardResult {
    pub blocked: bool,
    pub warnings: Vec<String>,
    pub alternatives: Vec<String>,
    pub matched_rules: Vec<PolicyRule>,
    /// Human-readable reasons for a block
    #[serde(default)]
    pub block_reasons: Vec<String>,
    /// The policy store could not be consulted; the check failed open
    #[serde(default)]
    pub degraded: bool,
}

impl GuardResult {
    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            warnings: vec![message.into()],
            degraded: true,
            ..Default::default()
        }
    }

    pub fn has_critical_match(&self) -> bool {
        self.matched_rules.iter().any(|r| r.severity == Severity::Critical)
    }

    pub fn reason(&self) -> String {
        if self.block_reasons.is_empty() {
            "blocked by policy".to_string()
        } else {
            self.block_reasons.join("; ")
        }
    }

    /// Compact record kept on a step result
    pub fn decision(&self) -> GuardDecision {
        GuardDecision {
            blocked: self.blocked,
            warnings: self.warnings.clone(),
            alternatives: self.alternatives.clone(),
            matched_rule_ids: self.matched_rules.iter().map(|r| r.id).collect(),
            degraded: self.degraded,
        }
    }
}

/// Guard outcome stored alongside a sensitive step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardDecision {
    pub blocked: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub matched_rule_ids: Vec<RuleId>,
    #[serde(default)]
    pub degraded: bool,
}

/// Aggregate matched rules into a guard result.
///
/// Blocked iff a matched enforced rule is `block`, or a `require` rule's
/// evidence key is not satisfied by the context. Alternatives keep first-seen
/// order without duplicates.
pub fn decide(matched: Vec<PolicyRule>, context: &GuardContext) -> GuardResult {
    let mut result = GuardResult::default();

    for rule in &matched {
        let label = rule.message.clone().unwrap_or_else(|| rule.name.clone());
        match rule.action {
            RuleAction::Block if rule.enforced => {
                result.blocked = true;
                result
                    .block_reasons
                    .push(format!("rule '{}' blocks this action: {}", rule.name, label));
            }
            RuleAction::Require if rule.enforced => {
                let key = rule.required_action.as_deref().unwrap_or_default();
                if key.is_empty() || !context.has_evidence(key) {
                    result.blocked = true;
                    result.block_reasons.push(format!(
                        "rule '{}' requires evidence '{}' before this action",
                        rule.name, key
                    ));
                } else {
                    result
                        .warnings
                        .push(format!("[{}] {} (evidence '{}' present)", rule.severity, label, key));
                }
            }
            RuleAction::Suggest => {
                result.warnings.push(format!("[suggestion] {}", label));
            }
            _ => {
                result.warnings.push(format!("[{}] {}", rule.severity, label));
            }
        }

        for alternative in &rule.alternatives {
            if !result.alternatives.contains(alternative) {
                result.alternatives.push(alternative.clone());
            }
        }
    }

    result.matched_rules = matched;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block_rule() -> PolicyRule {
        PolicyRule::new("prod-direct", "*", RuleAction::Block, Severity::Critical)
            .with_keywords(["prod supabase"])
            .with_alternatives(["use the promotion gate", "open a migration PR"])
    }

    #[test]
    fn test_block_rule_blocks() {
        let result = decide(vec![block_rule()], &GuardContext::new("infra", "atlas"));
        assert!(result.blocked);
        assert_eq!(result.alternatives.len(), 2);
        assert!(result.reason().contains("prod-direct"));
    }

    #[test]
    fn test_non_enforced_block_only_warns() {
        let mut rule = block_rule();
        rule.enforced = false;
        let result = decide(vec![rule], &GuardContext::new("infra", "atlas"));
        assert!(!result.blocked);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_require_rule_checks_evidence() {
        let rule = PolicyRule::new("backup-first", "db", RuleAction::Require, Severity::High)
            .with_keywords(["migrate"])
            .requiring("backup_taken");

        let without = decide(vec![rule.clone()], &GuardContext::new("db", "atlas"));
        assert!(without.blocked);

        let with = decide(
            vec![rule.clone()],
            &GuardContext::new("db", "atlas").with_evidence("backup_taken", json!(true)),
        );
        assert!(!with.blocked);
        assert_eq!(with.warnings.len(), 1);

        let falsy = decide(
            vec![rule],
            &GuardContext::new("db", "atlas").with_evidence("backup_taken", json!("false")),
        );
        assert!(falsy.blocked);
    }

    #[test]
    fn test_alternatives_are_deduplicated_in_order() {
        let a = PolicyRule::new("a", "x", RuleAction::Warn, Severity::Low)
            .with_keywords(["x"])
            .with_alternatives(["one", "two"]);
        let b = PolicyRule::new("b", "x", RuleAction::Suggest, Severity::Low)
            .with_keywords(["x"])
            .with_alternatives(["two", "three"]);
        let result = decide(vec![a, b], &GuardContext::default());
        assert!(!result.blocked);
        assert_eq!(result.alternatives, vec!["one", "two", "three"]);
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_decision_carries_rule_ids() {
        let rule = block_rule();
        let id = rule.id;
        let decision = decide(vec![rule], &GuardContext::default()).decision();
        assert!(decision.blocked);
        assert_eq!(decision.matched_rule_ids, vec![id]);
    }
}
