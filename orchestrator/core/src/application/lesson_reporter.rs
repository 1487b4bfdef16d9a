// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lesson Reporter
//!
//! Records lessons through the policy store, derives rules from new
//! anti-patterns and hands the stored lesson to the escalation router.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Collaborators:** `PolicyStore`, `EscalationRouter`, `EventBus`

use crate::application::error::AtlasError;
use crate::application::escalation_router::EscalationRouter;
use crate::application::policy_store::PolicyStore;
use crate::domain::escalation::Escalation;
use crate::domain::events::LessonEvent;
use crate::domain::lesson::{Lesson, LessonReport, RecordOutcome};
use crate::domain::policy::RuleId;
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct LessonRecorded {
    #[serde(flatten)]
    pub outcome: RecordOutcome,
    pub derived_rule_id: Option<RuleId>,
    pub escalations: Vec<Escalation>,
}

#[async_trait]
pub trait LessonReporter: Send + Sync {
    async fn report(&self, report: LessonReport) -> Result<LessonRecorded, AtlasError>;
}

pub struct StandardLessonReporter {
    policy_store: Arc<dyn PolicyStore>,
    router: Option<Arc<dyn EscalationRouter>>,
    event_bus: Arc<EventBus>,
}

impl StandardLessonReporter {
    pub fn new(
        policy_store: Arc<dyn PolicyStore>,
        router: Option<Arc<dyn EscalationRouter>>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            policy_store,
            router,
            event_bus,
        }
    }

    async fn derive_rule(&self, lesson: &Lesson) -> Result<Option<RuleId>, AtlasError> {
        let Some(rule) = lesson.derive_rule() else {
            return Ok(None);
        };
        if let Some(existing) = self.policy_store.rule_for_lesson(lesson.id).await? {
            return Ok(Some(existing.id));
        }
        self.policy_store.save_rule(&rule).await?;
        info!(
            lesson_id = %lesson.id,
            rule_id = %rule.id,
            action = rule.action.as_str(),
            "Derived policy rule from anti-pattern lesson"
        );
        self.event_bus.publish_lesson_event(LessonEvent::RuleDerived {
            lesson_id: lesson.id,
            rule_id: rule.id,
            derived_at: Utc::now(),
        });
        Ok(Some(rule.id))
    }
}

#[async_trait]
impl LessonReporter for StandardLessonReporter {
    async fn report(&self, report: LessonReport) -> Result<LessonRecorded, AtlasError> {
        report.validate()?;
        let candidate = Lesson::from_report(report);
        let outcome = self.policy_store.record_lesson(&candidate).await?;

        // Escalation rules look at the stored row (occurrence_count included)
        let lesson = match self.policy_store.find_lesson(outcome.id).await? {
            Some(lesson) => lesson,
            None => {
                let mut lesson = candidate;
                lesson.id = outcome.id;
                lesson.occurrence_count = outcome.occurrence_count;
                lesson
            }
        };

        if outcome.deduped_existing {
            debug!(lesson_id = %outcome.id, occurrences = outcome.occurrence_count, "Lesson recurred");
            self.event_bus.publish_lesson_event(LessonEvent::LessonRecurred {
                lesson_id: outcome.id,
                occurrence_count: outcome.occurrence_count,
                recurred_at: Utc::now(),
            });
        } else {
            info!(
                lesson_id = %outcome.id,
                lesson_type = lesson.lesson_type.as_str(),
                domain = %lesson.domain,
                "Lesson recorded"
            );
            self.event_bus.publish_lesson_event(LessonEvent::LessonRecorded {
                lesson_id: outcome.id,
                lesson_type: lesson.lesson_type,
                title: lesson.title.clone(),
                domain: lesson.domain.clone(),
                recorded_at: Utc::now(),
            });
        }

        let derived_rule_id = self.derive_rule(&lesson).await?;

        let escalations = match &self.router {
            Some(router) => match router.evaluate(&lesson).await {
                Ok(escalations) => escalations,
                Err(e) => {
                    warn!(lesson_id = %lesson.id, error = %e, "Failed to evaluate escalations");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(LessonRecorded {
            outcome,
            derived_rule_id,
            escalations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::policy_store::StandardPolicyStore;
    use crate::domain::lesson::LessonType;
    use crate::domain::policy::{RuleAction, Severity};
    use crate::infrastructure::repositories::{InMemoryLessonRepository, InMemoryPolicyRuleRepository};

    fn reporter() -> (StandardLessonReporter, Arc<StandardPolicyStore>) {
        let store = Arc::new(StandardPolicyStore::new(
            Arc::new(InMemoryPolicyRuleRepository::new()),
            Arc::new(InMemoryLessonRepository::new()),
        ));
        (
            StandardLessonReporter::new(store.clone(), None, Arc::new(EventBus::new(16))),
            store,
        )
    }

    #[tokio::test]
    async fn test_anti_pattern_derives_one_rule() {
        let (reporter, store) = reporter();
        let report = LessonReport::new(LessonType::AntiPattern, "infra", "editing prod directly", "varys")
            .keywords(["prod supabase"])
            .severity(Severity::Critical)
            .alternatives(vec!["use the promotion gate".to_string()]);

        let first = reporter.report(report.clone()).await.unwrap();
        let second = reporter.report(report).await.unwrap();

        assert!(first.derived_rule_id.is_some());
        assert_eq!(first.derived_rule_id, second.derived_rule_id);
        assert!(second.outcome.deduped_existing);

        let rules = store.list_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].action, RuleAction::Block);
        assert_eq!(rules[0].source_lesson_id, Some(first.outcome.id));

        let matched = store
            .find_matching_rules("modify PROD SUPABASE", "infra", "atlas")
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_report_rejected() {
        let (reporter, _) = reporter();
        let err = reporter
            .report(LessonReport::new(LessonType::Success, "", "t", "s"))
            .await
            .unwrap_err();
        assert!(matches!(err, AtlasError::InvalidRequest(_)));
    }
}
