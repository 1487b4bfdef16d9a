// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lessons recorded from outcomes across the fleet.
//!
//! Lessons with identical `(title, domain, type)` while `active` are a single
//! row whose `occurrence_count` grows with every report.

use crate::domain::policy::{PolicyRule, RuleAction, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LessonId(pub Uuid);

impl LessonId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LessonId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LessonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonType {
    Success,
    Failure,
    Workaround,
    Discovery,
    AntiPattern,
}

impl LessonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Workaround => "workaround",
            Self::Discovery => "discovery",
            Self::AntiPattern => "anti_pattern",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "workaround" => Some(Self::Workaround),
            "discovery" => Some(Self::Discovery),
            "anti_pattern" => Some(Self::AntiPattern),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    #[default]
    Active,
    Archived,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LessonError {
    #[error("Lesson title cannot be empty")]
    EmptyTitle,

    #[error("Lesson domain cannot be empty")]
    EmptyDomain,

    #[error("Confidence must be within 0..=1, got {0}")]
    InvalidConfidence(f64),
}

fn default_confidence() -> f64 {
    0.5
}

/// Incoming lesson report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonReport {
    #[serde(rename = "type", alias = "lesson_type")]
    pub lesson_type: LessonType,
    pub domain: String,
    pub title: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source: String,
    /// Only used by `anti_pattern` lessons to derive a policy rule
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

impl LessonReport {
    pub fn new(
        lesson_type: LessonType,
        domain: impl Into<String>,
        title: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            lesson_type,
            domain: domain.into(),
            title: title.into(),
            context: String::new(),
            outcome: String::new(),
            solution: None,
            severity: Severity::Medium,
            confidence: default_confidence(),
            source: source.into(),
            trigger_keywords: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = outcome.into();
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trigger_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn alternatives(mut self, alternatives: Vec<String>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn validate(&self) -> Result<(), LessonError> {
        if self.title.trim().is_empty() {
            return Err(LessonError::EmptyTitle);
        }
        if self.domain.trim().is_empty() {
            return Err(LessonError::EmptyDomain);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(LessonError::InvalidConfidence(self.confidence));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    #[serde(rename = "type")]
    pub lesson_type: LessonType,
    pub domain: String,
    pub title: String,
    pub context: String,
    pub outcome: String,
    pub solution: Option<String>,
    pub severity: Severity,
    pub confidence: f64,
    pub occurrence_count: u32,
    pub source: String,
    pub status: LessonStatus,
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    #[serde(default)]
    pub alternatives: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_occurred: DateTime<Utc>,
}

impl Lesson {
    pub fn from_report(report: LessonReport) -> Self {
        let now = Utc::now();
        Self {
            id: LessonId::new(),
            lesson_type: report.lesson_type,
            domain: report.domain,
            title: report.title,
            context: report.context,
            outcome: report.outcome,
            solution: report.solution,
            severity: report.severity,
            confidence: report.confidence,
            occurrence_count: 1,
            source: report.source,
            status: LessonStatus::Active,
            trigger_keywords: report.trigger_keywords,
            alternatives: report.alternatives,
            created_at: now,
            last_occurred: now,
        }
    }

    /// Active lesson with the dedupe identity `(title, domain, type)`
    pub fn same_identity(&self, title: &str, domain: &str, lesson_type: LessonType) -> bool {
        self.status == LessonStatus::Active
            && self.lesson_type == lesson_type
            && self.title == title
            && self.domain == domain
    }

    pub fn record_occurrence(&mut self, at: DateTime<Utc>) {
        self.occurrence_count += 1;
        self.last_occurred = at;
    }

    /// Enforced rule derived from an anti-pattern lesson with trigger keywords.
    /// Critical lessons block, everything else warns.
    pub fn derive_rule(&self) -> Option<PolicyRule> {
        if self.lesson_type != LessonType::AntiPattern {
            return None;
        }
        let keywords: Vec<String> = self
            .trigger_keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return None;
        }

        let action = if self.severity == Severity::Critical {
            RuleAction::Block
        } else {
            RuleAction::Warn
        };
        let mut rule = PolicyRule::new(self.title.clone(), self.domain.clone(), action, self.severity)
            .with_keywords(keywords)
            .with_alternatives(self.alternatives.clone());
        rule.message = self.solution.clone().or_else(|| Some(self.title.clone()));
        rule.source_lesson_id = Some(self.id);
        Some(rule)
    }
}

/// Outcome of recording a lesson
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub id: LessonId,
    pub deduped_existing: bool,
    pub occurrence_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_validation() {
        let report = LessonReport::new(LessonType::Failure, "infra", "  ", "atlas");
        assert!(matches!(report.validate(), Err(LessonError::EmptyTitle)));

        let mut report = LessonReport::new(LessonType::Failure, "infra", "deploy failed", "atlas");
        report.confidence = 1.5;
        assert!(matches!(report.validate(), Err(LessonError::InvalidConfidence(_))));
    }

    #[test]
    fn test_report_accepts_type_field() {
        let report: LessonReport = serde_json::from_value(serde_json::json!({
            "type": "anti_pattern",
            "domain": "infra",
            "title": "direct prod edits"
        }))
        .unwrap();
        assert_eq!(report.lesson_type, LessonType::AntiPattern);
        assert_eq!(report.confidence, 0.5);
    }

    #[test]
    fn test_derive_rule_from_anti_pattern() {
        let lesson = Lesson::from_report(
            LessonReport::new(LessonType::AntiPattern, "infra", "prod edits", "varys")
                .keywords(["prod supabase", " "])
                .severity(Severity::Critical)
                .alternatives(vec!["use promotion".to_string()]),
        );
        let rule = lesson.derive_rule().unwrap();
        assert_eq!(rule.action, RuleAction::Block);
        assert_eq!(rule.trigger_keywords, vec!["prod supabase"]);
        assert_eq!(rule.source_lesson_id, Some(lesson.id));
        assert!(rule.enforced);

        let warn = Lesson::from_report(
            LessonReport::new(LessonType::AntiPattern, "infra", "slow", "varys").keywords(["sleep"]),
        );
        assert_eq!(warn.derive_rule().unwrap().action, RuleAction::Warn);
    }

    #[test]
    fn test_no_rule_without_keywords_or_for_other_types() {
        let lesson = Lesson::from_report(LessonReport::new(LessonType::AntiPattern, "x", "y", "z"));
        assert!(lesson.derive_rule().is_none());

        let lesson = Lesson::from_report(
            LessonReport::new(LessonType::Failure, "x", "y", "z").keywords(["k"]),
        );
        assert!(lesson.derive_rule().is_none());
    }

    #[test]
    fn test_identity_ignores_archived() {
        let mut lesson = Lesson::from_report(LessonReport::new(LessonType::Failure, "d", "t", "s"));
        assert!(lesson.same_identity("t", "d", LessonType::Failure));
        assert!(!lesson.same_identity("t", "d", LessonType::Success));
        lesson.status = LessonStatus::Archived;
        assert!(!lesson.same_identity("t", "d", LessonType::Failure));
    }
}
