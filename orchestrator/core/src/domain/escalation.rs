// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Escalation
//!
//! Typed predicate table mapping lesson attributes to notification targets,
//! and the escalation records produced when predicates fire.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Decide who hears about a lesson; delivery is behind [`Notifier`]

use crate::domain::lesson::{Lesson, LessonId};
use crate::domain::policy::Severity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const SUPERVISOR_TARGET: &str = "supervisor";
pub const PROJECT_OWNER_TARGET: &str = "project-owner";
pub const DASHBOARD_TARGET: &str = "dashboard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscalationId(pub Uuid);

impl EscalationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EscalationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EscalationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl EscalationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for EscalationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Predicate table
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonField {
    Severity,
    OccurrenceCount,
    Domain,
    LessonType,
    Confidence,
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparator {
    fn test(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Eq => ordering == Equal,
            Self::Ne => ordering != Equal,
            Self::Gt => ordering == Greater,
            Self::Gte => ordering != Less,
            Self::Lt => ordering == Less,
            Self::Lte => ordering != Greater,
        }
    }
}

/// Literal on the right-hand side of a predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredicateValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPredicate {
    pub field: LessonField,
    pub comparator: Comparator,
    pub value: PredicateValue,
}

impl EscalationPredicate {
    pub fn new(field: LessonField, comparator: Comparator, value: PredicateValue) -> Self {
        Self {
            field,
            comparator,
            value,
        }
    }

    pub fn evaluate(&self, lesson: &Lesson) -> bool {
        let ordering = match (self.field, &self.value) {
            (LessonField::Severity, PredicateValue::Text(text)) => match Severity::parse(text) {
                Some(expected) => lesson.severity.cmp(&expected),
                None => return false,
            },
            (LessonField::OccurrenceCount, PredicateValue::Number(n)) => {
                match f64::from(lesson.occurrence_count).partial_cmp(n) {
                    Some(o) => o,
                    None => return false,
                }
            }
            (LessonField::Confidence, PredicateValue::Number(n)) => match lesson.confidence.partial_cmp(n) {
                Some(o) => o,
                None => return false,
            },
            (LessonField::Domain, PredicateValue::Text(text)) => return self.text_test(&lesson.domain, text),
            (LessonField::LessonType, PredicateValue::Text(text)) => {
                return self.text_test(lesson.lesson_type.as_str(), text)
            }
            (LessonField::Source, PredicateValue::Text(text)) => return self.text_test(&lesson.source, text),
            _ => return false,
        };
        self.comparator.test(ordering)
    }

    fn text_test(&self, actual: &str, expected: &str) -> bool {
        match self.comparator {
            Comparator::Eq => actual.eq_ignore_ascii_case(expected),
            Comparator::Ne => !actual.eq_ignore_ascii_case(expected),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRule {
    pub name: String,
    #[serde(flatten)]
    pub predicate: EscalationPredicate,
    pub target: String,
    #[serde(default)]
    pub priority: EscalationPriority,
}

impl EscalationRule {
    pub fn new(
        name: impl Into<String>,
        predicate: EscalationPredicate,
        target: impl Into<String>,
        priority: EscalationPriority,
    ) -> Self {
        Self {
            name: name.into(),
            predicate,
            target: target.into(),
            priority,
        }
    }

    /// Ordered default table
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "critical-severity",
                EscalationPredicate::new(
                    LessonField::Severity,
                    Comparator::Eq,
                    PredicateValue::Text("critical".to_string()),
                ),
                SUPERVISOR_TARGET,
                EscalationPriority::Critical,
            ),
            Self::new(
                "recurring",
                EscalationPredicate::new(LessonField::OccurrenceCount, Comparator::Gt, PredicateValue::Number(3.0)),
                SUPERVISOR_TARGET,
                EscalationPriority::High,
            ),
            Self::new(
                "project-domain",
                EscalationPredicate::new(
                    LessonField::Domain,
                    Comparator::Eq,
                    PredicateValue::Text("project".to_string()),
                ),
                PROJECT_OWNER_TARGET,
                EscalationPriority::Normal,
            ),
        ]
    }

    pub fn reason_for(&self, lesson: &Lesson) -> String {
        format!(
            "{}: {} ({} in {}, seen {}x)",
            self.name,
            lesson.title,
            lesson.lesson_type.as_str(),
            lesson.domain,
            lesson.occurrence_count
        )
    }
}

/// All rules whose predicate holds, in table order
pub fn matching_escalation_rules<'a>(rules: &'a [EscalationRule], lesson: &Lesson) -> Vec<&'a EscalationRule> {
    rules.iter().filter(|r| r.predicate.evaluate(lesson)).collect()
}

// ============================================================================
// Escalation records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Delivered,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: EscalationId,
    pub lesson_id: Option<LessonId>,
    pub rule_name: String,
    pub target: String,
    pub reason: String,
    pub priority: EscalationPriority,
    pub status: EscalationStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Escalation {
    pub fn new(
        lesson_id: Option<LessonId>,
        rule_name: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
        priority: EscalationPriority,
    ) -> Self {
        Self {
            id: EscalationId::new(),
            lesson_id,
            rule_name: rule_name.into(),
            target: target.into(),
            reason: reason.into(),
            priority,
            status: EscalationStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            delivered_at: None,
        }
    }

    pub fn from_rule(rule: &EscalationRule, lesson: &Lesson) -> Self {
        Self::new(
            Some(lesson.id),
            rule.name.clone(),
            rule.target.clone(),
            rule.reason_for(lesson),
            rule.priority,
        )
    }

    pub fn message(&self) -> String {
        format!("[{}] {}", self.priority, self.reason)
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
    }

    pub fn mark_delivered(&mut self) {
        self.attempts += 1;
        self.status = EscalationStatus::Delivered;
        self.last_error = None;
        self.delivered_at = Some(Utc::now());
    }

    pub fn is_pending(&self) -> bool {
        self.status == EscalationStatus::Pending
    }
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("No channel configured for target '{0}'")]
    UnknownTarget(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Delivery timed out")]
    Timeout,
}

/// Outbound notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, target: &str, message: &str, priority: EscalationPriority) -> Result<(), NotifierError>;
}
