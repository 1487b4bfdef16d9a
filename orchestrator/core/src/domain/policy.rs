// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Policy Rules (anti-patterns)
//!
//! A [`PolicyRule`] describes an action the fleet has learned to avoid (or to
//! gate on evidence): what triggers it, where it applies, and what to do
//! instead. Matching is expressed as a [`MatchPredicate`] tree evaluated by a
//! single interpreter, so rule matching stays testable without any storage.
//!
//! ## Matching
//!
//! A rule matches a proposed action when
//! 1. one of its trigger keywords is a case-insensitive substring of the
//!    action text, or its trigger pattern matches the text as a regex;
//! 2. it has not expired;
//! 3. `applies_to_domains` is empty or contains the domain (or `*`);
//! 4. `applies_to_agents` is empty or contains the agent (or `*`).

use crate::domain::lesson::LessonId;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const WILDCARD: &str = "*";

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Rule must have trigger keywords or a trigger pattern")]
    NoTrigger,

    #[error("Invalid rule: {0}")]
    InvalidRule(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub Uuid);

impl RuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Block,
    Warn,
    Require,
    Suggest,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Warn => "warn",
            Self::Require => "require",
            Self::Suggest => "suggest",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "block" => Some(Self::Block),
            "warn" => Some(Self::Warn),
            "require" => Some(Self::Require),
            "suggest" => Some(Self::Suggest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Match predicates
// ============================================================================

/// Compiled regular expression that serializes as its source text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TriggerPattern(Regex);

impl TriggerPattern {
    pub fn new(pattern: &str) -> Result<Self, PolicyError> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| PolicyError::InvalidPattern(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for TriggerPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl TryFrom<String> for TriggerPattern {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TriggerPattern> for String {
    fn from(value: TriggerPattern) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchPredicate {
    /// Any keyword is a case-insensitive substring of the text
    Keywords(Vec<String>),
    /// The text matches the regex
    Pattern(TriggerPattern),
    AnyOf(Vec<MatchPredicate>),
    AllOf(Vec<MatchPredicate>),
}

impl MatchPredicate {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Keywords(keywords) => {
                let haystack = text.to_lowercase();
                keywords
                    .iter()
                    .filter(|k| !k.trim().is_empty())
                    .any(|k| haystack.contains(&k.to_lowercase()))
            }
            Self::Pattern(pattern) => pattern.is_match(text),
            Self::AnyOf(predicates) => predicates.iter().any(|p| p.matches(text)),
            Self::AllOf(predicates) => {
                !predicates.is_empty() && predicates.iter().all(|p| p.matches(text))
            }
        }
    }
}

// ============================================================================
// Aggregate: PolicyRule
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_pattern: Option<TriggerPattern>,
    /// Category label of the rule itself
    pub domain: String,
    #[serde(default)]
    pub applies_to_domains: Vec<String>,
    #[serde(default)]
    pub applies_to_agents: Vec<String>,
    pub action: RuleAction,
    /// Ordered substitute actions
    #[serde(default)]
    pub alternatives: Vec<String>,
    pub severity: Severity,
    /// Non-enforced rules never block; they only warn
    pub enforced: bool,
    /// Evidence key a `require` rule needs in the guard context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_lesson_id: Option<LessonId>,
    pub created_at: DateTime<Utc>,
}

impl PolicyRule {
    pub fn new(
        name: impl Into<String>,
        domain: impl Into<String>,
        action: RuleAction,
        severity: Severity,
    ) -> Self {
        Self {
            id: RuleId::new(),
            name: name.into(),
            trigger_keywords: Vec::new(),
            trigger_pattern: None,
            domain: domain.into(),
            applies_to_domains: Vec::new(),
            applies_to_agents: Vec::new(),
            action,
            alternatives: Vec::new(),
            severity,
            enforced: true,
            required_action: None,
            message: None,
            expires_at: None,
            source_lesson_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trigger_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, PolicyError> {
        self.trigger_pattern = Some(TriggerPattern::new(pattern)?);
        Ok(self)
    }

    pub fn with_alternatives<I, S>(mut self, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternatives = alternatives.into_iter().map(Into::into).collect();
        self
    }

    pub fn for_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applies_to_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn for_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applies_to_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    pub fn requiring(mut self, evidence_key: impl Into<String>) -> Self {
        self.required_action = Some(evidence_key.into());
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.name.trim().is_empty() {
            return Err(PolicyError::InvalidRule("name cannot be empty".to_string()));
        }
        let has_keyword = self.trigger_keywords.iter().any(|k| !k.trim().is_empty());
        if !has_keyword && self.trigger_pattern.is_none() {
            return Err(PolicyError::NoTrigger);
        }
        if self.action == RuleAction::Require && self.required_action.is_none() {
            return Err(PolicyError::InvalidRule(
                "require rules need a required_action".to_string(),
            ));
        }
        Ok(())
    }

    pub fn predicate(&self) -> MatchPredicate {
        let mut any = vec![MatchPredicate::Keywords(self.trigger_keywords.clone())];
        if let Some(pattern) = &self.trigger_pattern {
            any.push(MatchPredicate::Pattern(pattern.clone()));
        }
        MatchPredicate::AnyOf(any)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn applies_to(&self, domain: &str, agent_id: &str) -> bool {
        scope_allows(&self.applies_to_domains, domain) && scope_allows(&self.applies_to_agents, agent_id)
    }

    pub fn matches(&self, action_text: &str, domain: &str, agent_id: &str, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && self.applies_to(domain, agent_id) && self.predicate().matches(action_text)
    }
}

fn scope_allows(scope: &[String], value: &str) -> bool {
    scope.is_empty() || scope.iter().any(|s| s == WILDCARD || s == value)
}

/// Filter a rule set down to the rules matching a proposed action
pub fn matching_rules<'a>(
    rules: impl IntoIterator<Item = &'a PolicyRule>,
    action_text: &str,
    domain: &str,
    agent_id: &str,
    now: DateTime<Utc>,
) -> Vec<PolicyRule> {
    rules
        .into_iter()
        .filter(|r| r.matches(action_text, domain, agent_id, now))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_keyword_match_is_case_insensitive_substring() {
        let predicate = MatchPredicate::Keywords(vec!["Prod Supabase".to_string()]);
        assert!(predicate.matches("modify prod supabase directly"));
        assert!(!predicate.matches("modify dev supabase"));
    }

    #[test]
    fn test_blank_keywords_never_match() {
        let predicate = MatchPredicate::Keywords(vec!["  ".to_string(), String::new()]);
        assert!(!predicate.matches("anything"));
    }

    #[test]
    fn test_composite_predicates() {
        let drop = MatchPredicate::Pattern(TriggerPattern::new(r"(?i)drop\s+table").unwrap());
        let prod = MatchPredicate::Keywords(vec!["prod".to_string()]);
        let both = MatchPredicate::AllOf(vec![drop.clone(), prod.clone()]);
        assert!(both.matches("DROP TABLE users on prod"));
        assert!(!both.matches("drop table users on dev"));
        assert!(MatchPredicate::AnyOf(vec![drop, prod]).matches("drop table x"));
        assert!(!MatchPredicate::AllOf(vec![]).matches("x"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(matches!(TriggerPattern::new("(unclosed"), Err(PolicyError::InvalidPattern(_))));
        let json = serde_json::json!("(unclosed");
        assert!(serde_json::from_value::<TriggerPattern>(json).is_err());
    }

    #[test]
    fn test_expired_rule_never_matches() {
        let now = Utc::now();
        let rule = PolicyRule::new("no-force-push", "git", RuleAction::Block, Severity::High)
            .with_keywords(["force push"])
            .expiring_at(now - Duration::minutes(1));
        assert!(!rule.matches("force push to main", "git", "coder", now));
    }

    #[test]
    fn test_domain_and_agent_scoping() {
        let now = Utc::now();
        let rule = PolicyRule::new("prod", "infra", RuleAction::Warn, Severity::Medium)
            .with_keywords(["deploy"])
            .for_domains(["infra"])
            .for_agents(["atlas"]);
        assert!(rule.matches("deploy now", "infra", "atlas", now));
        assert!(!rule.matches("deploy now", "content", "atlas", now));
        assert!(!rule.matches("deploy now", "infra", "scout", now));

        let wildcard = rule.clone().for_domains(["*"]).for_agents(["*"]);
        assert!(wildcard.matches("deploy now", "content", "scout", now));
    }

    #[test]
    fn test_rule_serializes_pattern_as_text() {
        let rule = PolicyRule::new("drop", "db", RuleAction::Block, Severity::Critical)
            .with_pattern(r"drop\s+table")
            .unwrap();
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["trigger_pattern"], r"drop\s+table");
        let back: PolicyRule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_validate_requires_trigger() {
        let rule = PolicyRule::new("empty", "x", RuleAction::Warn, Severity::Low);
        assert!(matches!(rule.validate(), Err(PolicyError::NoTrigger)));

        let rule = rule.with_keywords(["x"]);
        assert!(rule.validate().is_ok());

        let require = PolicyRule::new("backup", "db", RuleAction::Require, Severity::High).with_keywords(["migrate"]);
        assert!(require.validate().is_err());
        assert!(require.requiring("backup_taken").validate().is_ok());
    }
}
