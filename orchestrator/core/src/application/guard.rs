// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Guard Service
//!
//! Checks a proposed action against the policy store before it runs.
//!
//! The decision itself is [`crate::domain::guard::decide`]. This service adds
//! the I/O around it:
//! - a short timeout on the policy store; on error or timeout the check fails
//!   open with a warning, logs `degraded = true`, publishes
//!   `GuardEvent::DegradedMode` and raises a dashboard escalation;
//! - every blocked check, or check matching a critical rule, is recorded as an
//!   `anti_pattern` lesson.

use crate::application::error::AtlasError;
use crate::application::escalation_router::EscalationRouter;
use crate::application::lesson_reporter::LessonReporter;
use crate::application::policy_store::PolicyStore;
use crate::domain::events::GuardEvent;
use crate::domain::guard::{decide, GuardContext, GuardResult};
use crate::domain::lesson::{LessonReport, LessonType};
use crate::domain::policy::Severity;
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const GUARD_SOURCE: &str = "guard";

#[async_trait]
pub trait GuardService: Send + Sync {
    /// Never fails: an unreachable policy store yields a degraded result
    async fn check(&self, action: &str, context: &GuardContext) -> GuardResult;

    /// Like `check`, but a block is returned as [`AtlasError::Blocked`]
    async fn enforce(&self, action: &str, context: &GuardContext) -> Result<GuardResult, AtlasError> {
        let result = self.check(action, context).await;
        if result.blocked {
            return Err(AtlasError::Blocked {
                message: result.reason(),
                details: serde_json::json!({
                    "matched_rules": result.matched_rules.iter().map(|r| r.id).collect::<Vec<_>>(),
                    "alternatives": result.alternatives,
                    "warnings": result.warnings,
                }),
            });
        }
        Ok(result)
    }
}

pub struct StandardGuardService {
    policy_store: Arc<dyn PolicyStore>,
    lesson_reporter: Option<Arc<dyn LessonReporter>>,
    escalation_router: Option<Arc<dyn EscalationRouter>>,
    event_bus: Arc<EventBus>,
    policy_timeout: Duration,
}

impl StandardGuardService {
    pub fn new(
        policy_store: Arc<dyn PolicyStore>,
        lesson_reporter: Option<Arc<dyn LessonReporter>>,
        escalation_router: Option<Arc<dyn EscalationRouter>>,
        event_bus: Arc<EventBus>,
        policy_timeout: Duration,
    ) -> Self {
        Self {
            policy_store,
            lesson_reporter,
            escalation_router,
            event_bus,
            policy_timeout,
        }
    }

    async fn degraded(&self, action: &str, error: String) -> GuardResult {
        warn!(degraded = true, action, error = %error, "Policy store unavailable, guard failing open");
        metrics::counter!("atlas_guard_checks_total", "outcome" => "degraded").increment(1);
        self.event_bus.publish_guard_event(GuardEvent::DegradedMode {
            action: action.to_string(),
            error: error.clone(),
            occurred_at: Utc::now(),
        });
        if let Some(router) = &self.escalation_router {
            if let Err(e) = router.escalate_degraded(action, &error).await {
                warn!(error = %e, "Failed to record degraded-mode escalation");
            }
        }
        GuardResult::degraded(format!("policy store unavailable ({}); action allowed without policy check", error))
    }

    async fn record_anti_pattern(&self, action: &str, context: &GuardContext, result: &GuardResult) {
        let Some(reporter) = &self.lesson_reporter else {
            return;
        };
        let severity = result
            .matched_rules
            .iter()
            .map(|r| r.severity)
            .max()
            .unwrap_or(Severity::Medium);
        let title = if result.blocked {
            format!("guard blocked: {}", action)
        } else {
            format!("critical rule matched: {}", action)
        };
        let rule_names: Vec<_> = result.matched_rules.iter().map(|r| r.name.as_str()).collect();

        let mut report = LessonReport::new(LessonType::AntiPattern, context.domain.clone(), title, GUARD_SOURCE)
            .context(format!("agent '{}' proposed '{}'", context.agent_id, action))
            .outcome(format!("matched rules: {}", rule_names.join(", ")))
            .severity(severity)
            .alternatives(result.alternatives.clone());
        report.confidence = 1.0;

        if let Err(e) = reporter.report(report).await {
            warn!(action, error = %e, "Failed to record guard lesson");
        }
    }
}

#[async_trait]
impl GuardService for StandardGuardService {
    async fn check(&self, action: &str, context: &GuardContext) -> GuardResult {
        let lookup = self
            .policy_store
            .find_matching_rules(action, &context.domain, &context.agent_id);

        let rules = match tokio::time::timeout(self.policy_timeout, lookup).await {
            Ok(Ok(rules)) => rules,
            Ok(Err(e)) => return self.degraded(action, e.to_string()).await,
            Err(_) => {
                return self
                    .degraded(action, format!("lookup timed out after {:?}", self.policy_timeout))
                    .await
            }
        };

        let result = decide(rules, context);

        if result.blocked {
            warn!(
                action,
                domain = %context.domain,
                agent_id = %context.agent_id,
                reason = %result.reason(),
                "Guard blocked action"
            );
            metrics::counter!("atlas_guard_checks_total", "outcome" => "blocked").increment(1);
            self.event_bus.publish_guard_event(GuardEvent::ActionBlocked {
                action: action.to_string(),
                domain: context.domain.clone(),
                agent_id: context.agent_id.clone(),
                rule_ids: result.matched_rules.iter().map(|r| r.id).collect(),
                blocked_at: Utc::now(),
            });
        } else if !result.matched_rules.is_empty() {
            debug!(action, warnings = result.warnings.len(), "Guard warned");
            metrics::counter!("atlas_guard_checks_total", "outcome" => "warned").increment(1);
            self.event_bus.publish_guard_event(GuardEvent::ActionWarned {
                action: action.to_string(),
                domain: context.domain.clone(),
                warning_count: result.warnings.len(),
                warned_at: Utc::now(),
            });
        } else {
            metrics::counter!("atlas_guard_checks_total", "outcome" => "allowed").increment(1);
        }

        if result.blocked || result.has_critical_match() {
            self.record_anti_pattern(action, context, &result).await;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::lesson_reporter::StandardLessonReporter;
    use crate::application::policy_store::StandardPolicyStore;
    use crate::domain::lesson::{Lesson, LessonId, RecordOutcome};
    use crate::domain::policy::{PolicyRule, RuleAction, RuleId};
    use crate::domain::repository::RepositoryError;
    use crate::infrastructure::repositories::{InMemoryLessonRepository, InMemoryPolicyRuleRepository};

    struct DownPolicyStore {
        delay: Option<Duration>,
    }

    #[async_trait]
    impl PolicyStore for DownPolicyStore {
        async fn find_matching_rules(&self, _: &str, _: &str, _: &str) -> Result<Vec<PolicyRule>, RepositoryError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
                return Ok(Vec::new());
            }
            Err(RepositoryError::Database("connection refused".to_string()))
        }
        async fn record_lesson(&self, _: &Lesson) -> Result<RecordOutcome, RepositoryError> {
            Err(RepositoryError::Database("connection refused".to_string()))
        }
        async fn find_lesson(&self, _: LessonId) -> Result<Option<Lesson>, RepositoryError> {
            Ok(None)
        }
        async fn list_lessons(&self, _: usize) -> Result<Vec<Lesson>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn save_rule(&self, _: &PolicyRule) -> Result<(), RepositoryError> {
            Ok(())
        }
        async fn find_rule(&self, _: RuleId) -> Result<Option<PolicyRule>, RepositoryError> {
            Ok(None)
        }
        async fn rule_for_lesson(&self, _: LessonId) -> Result<Option<PolicyRule>, RepositoryError> {
            Ok(None)
        }
        async fn list_rules(&self) -> Result<Vec<PolicyRule>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    fn guard_with_store(store: Arc<StandardPolicyStore>) -> StandardGuardService {
        let bus = Arc::new(EventBus::new(32));
        let reporter = Arc::new(StandardLessonReporter::new(store.clone(), None, bus.clone()));
        StandardGuardService::new(store, Some(reporter), None, bus, Duration::from_secs(1))
    }

    fn store() -> Arc<StandardPolicyStore> {
        Arc::new(StandardPolicyStore::new(
            Arc::new(InMemoryPolicyRuleRepository::new()),
            Arc::new(InMemoryLessonRepository::new()),
        ))
    }

    #[tokio::test]
    async fn test_prod_supabase_is_blocked_with_alternatives() {
        let store = store();
        store
            .save_rule(
                &PolicyRule::new("no-direct-prod", "*", RuleAction::Block, Severity::High)
                    .with_keywords(["prod supabase"])
                    .with_alternatives(["run the promotion gate from dev"]),
            )
            .await
            .unwrap();
        let guard = guard_with_store(store.clone());

        let result = guard
            .check("modify prod supabase directly", &GuardContext::new("infra", "atlas"))
            .await;
        assert!(result.blocked);
        assert!(!result.alternatives.is_empty());

        let lessons = store.list_lessons(10).await.unwrap();
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].lesson_type, LessonType::AntiPattern);
        assert!(lessons[0].title.contains("modify prod supabase directly"));
    }

    #[tokio::test]
    async fn test_check_is_deterministic_for_fixed_rules() {
        let store = store();
        store
            .save_rule(
                &PolicyRule::new("warn-deploy", "infra", RuleAction::Warn, Severity::Low).with_keywords(["deploy"]),
            )
            .await
            .unwrap();
        let guard = guard_with_store(store);
        let ctx = GuardContext::new("infra", "atlas");

        let first = guard.check("deploy service", &ctx).await;
        let second = guard.check("deploy service", &ctx).await;
        assert_eq!(first.blocked, second.blocked);
        assert_eq!(first.matched_rules, second.matched_rules);
        assert!(!first.blocked);
        assert_eq!(first.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_store_error_fails_open() {
        let bus = Arc::new(EventBus::new(8));
        let mut events = bus.subscribe();
        let guard = StandardGuardService::new(
            Arc::new(DownPolicyStore { delay: None }),
            None,
            None,
            bus,
            Duration::from_secs(1),
        );
        let result = guard.check("anything", &GuardContext::new("infra", "atlas")).await;
        assert!(!result.blocked);
        assert!(result.degraded);
        assert_eq!(result.warnings.len(), 1);
        assert!(matches!(
            events.recv().await.unwrap(),
            crate::infrastructure::event_bus::DomainEvent::Guard(GuardEvent::DegradedMode { .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_store_times_out_open() {
        let guard = StandardGuardService::new(
            Arc::new(DownPolicyStore {
                delay: Some(Duration::from_secs(5)),
            }),
            None,
            None,
            Arc::new(EventBus::new(8)),
            Duration::from_millis(20),
        );
        let result = guard.check("anything", &GuardContext::default()).await;
        assert!(result.degraded);
        assert!(!result.blocked);
    }

    #[tokio::test]
    async fn test_enforce_surfaces_block() {
        let store = store();
        store
            .save_rule(&PolicyRule::new("no-rm", "*", RuleAction::Block, Severity::High).with_keywords(["rm -rf"]))
            .await
            .unwrap();
        let guard = guard_with_store(store);
        let err = guard.enforce("rm -rf /", &GuardContext::default()).await.unwrap_err();
        assert!(matches!(err, AtlasError::Blocked { .. }));
    }
}
