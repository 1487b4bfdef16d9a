// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Policy Store
//!
//! Read-mostly store of policy rules plus the lesson table. Matching runs the
//! domain predicate interpreter over the unexpired rules the repository hands
//! back, so every backend matches identically.

use crate::domain::lesson::{Lesson, LessonId, RecordOutcome};
use crate::domain::policy::{matching_rules, PolicyRule, RuleId};
use crate::domain::repository::{LessonRepository, PolicyRuleRepository, RepositoryError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Every rule matching the proposed action, not only the first
    async fn find_matching_rules(
        &self,
        action_text: &str,
        domain: &str,
        agent_id: &str,
    ) -> Result<Vec<PolicyRule>, RepositoryError>;

    /// Insert or dedupe on `(title, domain, type)` among active lessons
    async fn record_lesson(&self, lesson: &Lesson) -> Result<RecordOutcome, RepositoryError>;

    async fn find_lesson(&self, id: LessonId) -> Result<Option<Lesson>, RepositoryError>;

    async fn list_lessons(&self, limit: usize) -> Result<Vec<Lesson>, RepositoryError>;

    async fn save_rule(&self, rule: &PolicyRule) -> Result<(), RepositoryError>;

    async fn find_rule(&self, id: RuleId) -> Result<Option<PolicyRule>, RepositoryError>;

    async fn rule_for_lesson(&self, lesson_id: LessonId) -> Result<Option<PolicyRule>, RepositoryError>;

    async fn list_rules(&self) -> Result<Vec<PolicyRule>, RepositoryError>;
}

pub struct StandardPolicyStore {
    rules: Arc<dyn PolicyRuleRepository>,
    lessons: Arc<dyn LessonRepository>,
}

impl StandardPolicyStore {
    pub fn new(rules: Arc<dyn PolicyRuleRepository>, lessons: Arc<dyn LessonRepository>) -> Self {
        Self { rules, lessons }
    }
}

#[async_trait]
impl PolicyStore for StandardPolicyStore {
    async fn find_matching_rules(
        &self,
        action_text: &str,
        domain: &str,
        agent_id: &str,
    ) -> Result<Vec<PolicyRule>, RepositoryError> {
        let now = Utc::now();
        let candidates = self.rules.find_unexpired(now).await?;
        Ok(matching_rules(&candidates, action_text, domain, agent_id, now))
    }

    async fn record_lesson(&self, lesson: &Lesson) -> Result<RecordOutcome, RepositoryError> {
        self.lessons.record(lesson).await
    }

    async fn find_lesson(&self, id: LessonId) -> Result<Option<Lesson>, RepositoryError> {
        self.lessons.find_by_id(id).await
    }

    async fn list_lessons(&self, limit: usize) -> Result<Vec<Lesson>, RepositoryError> {
        self.lessons.list_recent(limit).await
    }

    async fn save_rule(&self, rule: &PolicyRule) -> Result<(), RepositoryError> {
        self.rules.save(rule).await
    }

    async fn find_rule(&self, id: RuleId) -> Result<Option<PolicyRule>, RepositoryError> {
        self.rules.find_by_id(id).await
    }

    async fn rule_for_lesson(&self, lesson_id: LessonId) -> Result<Option<PolicyRule>, RepositoryError> {
        self.rules.find_by_source_lesson(lesson_id).await
    }

    async fn list_rules(&self) -> Result<Vec<PolicyRule>, RepositoryError> {
        self.rules.list_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lesson::{LessonReport, LessonType};
    use crate::domain::policy::{RuleAction, Severity};
    use crate::infrastructure::repositories::{InMemoryLessonRepository, InMemoryPolicyRuleRepository};
    use chrono::Duration;

    fn store() -> StandardPolicyStore {
        StandardPolicyStore::new(
            Arc::new(InMemoryPolicyRuleRepository::new()),
            Arc::new(InMemoryLessonRepository::new()),
        )
    }

    #[tokio::test]
    async fn test_returns_all_matching_rules() {
        let store = store();
        let a = PolicyRule::new("a", "infra", RuleAction::Warn, Severity::Low).with_keywords(["deploy"]);
        let b = PolicyRule::new("b", "infra", RuleAction::Block, Severity::High)
            .with_pattern(r"(?i)deploy\s+to\s+prod")
            .unwrap();
        let c = PolicyRule::new("c", "infra", RuleAction::Block, Severity::High).with_keywords(["rm -rf"]);
        let expired = PolicyRule::new("old", "infra", RuleAction::Block, Severity::High)
            .with_keywords(["deploy"])
            .expiring_at(Utc::now() - Duration::hours(1));
        for rule in [&a, &b, &c, &expired] {
            store.save_rule(rule).await.unwrap();
        }

        let matched = store.find_matching_rules("Deploy to prod now", "infra", "atlas").await.unwrap();
        let mut names: Vec<_> = matched.iter().map(|r| r.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_record_lesson_dedupes() {
        let store = store();
        let report = LessonReport::new(LessonType::Failure, "infra", "deploy failed", "atlas");
        let first = store.record_lesson(&Lesson::from_report(report.clone())).await.unwrap();
        let second = store.record_lesson(&Lesson::from_report(report)).await.unwrap();
        assert!(!first.deduped_existing);
        assert!(second.deduped_existing);
        assert_eq!(first.id, second.id);
        assert_eq!(second.occurrence_count, 2);
        assert_eq!(store.list_lessons(10).await.unwrap().len(), 1);
    }
}
