// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Escalation Router
//!
//! Evaluates lessons against the escalation rule table and delivers each
//! firing through the [`Notifier`]. Delivery retries a bounded number of
//! times; an escalation that still fails stays `pending` for the retry sweep.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Collaborators:** `EscalationRepository`, `Notifier`, `EventBus`

use crate::domain::escalation::{
    matching_escalation_rules, Escalation, EscalationPriority, EscalationRule, Notifier, DASHBOARD_TARGET,
};
use crate::domain::events::EscalationEvent;
use crate::domain::lesson::Lesson;
use crate::domain::repository::{EscalationRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySummary {
    pub attempted: usize,
    pub delivered: usize,
    pub still_pending: usize,
}

#[async_trait]
pub trait EscalationRouter: Send + Sync {
    /// Fire every matching rule for the lesson; returns the escalations raised
    async fn evaluate(&self, lesson: &Lesson) -> Result<Vec<Escalation>, RepositoryError>;

    /// Dashboard escalation for a policy store outage
    async fn escalate_degraded(&self, action: &str, error: &str) -> Result<Escalation, RepositoryError>;

    /// Re-attempt delivery of pending escalations
    async fn retry_pending(&self) -> Result<RetrySummary, RepositoryError>;

    async fn list_recent(&self, limit: usize) -> Result<Vec<Escalation>, RepositoryError>;
}

pub struct StandardEscalationRouter {
    rules: Vec<EscalationRule>,
    repository: Arc<dyn EscalationRepository>,
    notifier: Arc<dyn Notifier>,
    policy: DeliveryPolicy,
    event_bus: Arc<EventBus>,
}

impl StandardEscalationRouter {
    pub fn new(
        rules: Vec<EscalationRule>,
        repository: Arc<dyn EscalationRepository>,
        notifier: Arc<dyn Notifier>,
        policy: DeliveryPolicy,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            rules,
            repository,
            notifier,
            policy,
            event_bus,
        }
    }

    async fn raise(&self, mut escalation: Escalation) -> Result<Escalation, RepositoryError> {
        // Persist before delivery so nothing is lost if delivery hangs
        self.repository.save(&escalation).await?;
        self.event_bus.publish_escalation_event(EscalationEvent::EscalationRaised {
            escalation_id: escalation.id,
            target: escalation.target.clone(),
            priority: escalation.priority,
            raised_at: Utc::now(),
        });
        self.deliver(&mut escalation).await;
        self.repository.save(&escalation).await?;
        Ok(escalation)
    }

    async fn deliver(&self, escalation: &mut Escalation) {
        let message = escalation.message();
        for attempt in 1..=self.policy.max_attempts {
            match self
                .notifier
                .send(&escalation.target, &message, escalation.priority)
                .await
            {
                Ok(()) => {
                    escalation.mark_delivered();
                    info!(
                        escalation_id = %escalation.id,
                        target = %escalation.target,
                        attempts = escalation.attempts,
                        "Escalation delivered"
                    );
                    metrics::counter!("atlas_escalations_total", "status" => "delivered").increment(1);
                    self.event_bus.publish_escalation_event(EscalationEvent::EscalationDelivered {
                        escalation_id: escalation.id,
                        attempts: escalation.attempts,
                        delivered_at: Utc::now(),
                    });
                    return;
                }
                Err(e) => {
                    escalation.record_failure(e.to_string());
                    warn!(
                        escalation_id = %escalation.id,
                        target = %escalation.target,
                        attempt,
                        error = %e,
                        "Escalation delivery failed"
                    );
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        metrics::counter!("atlas_escalations_total", "status" => "pending").increment(1);
        self.event_bus.publish_escalation_event(EscalationEvent::EscalationPending {
            escalation_id: escalation.id,
            attempts: escalation.attempts,
            last_error: escalation.last_error.clone().unwrap_or_default(),
            occurred_at: Utc::now(),
        });
    }
}

#[async_trait]
impl EscalationRouter for StandardEscalationRouter {
    async fn evaluate(&self, lesson: &Lesson) -> Result<Vec<Escalation>, RepositoryError> {
        let mut raised = Vec::new();
        for rule in matching_escalation_rules(&self.rules, lesson) {
            info!(
                lesson_id = %lesson.id,
                rule = %rule.name,
                target = %rule.target,
                "Escalation rule fired"
            );
            raised.push(self.raise(Escalation::from_rule(rule, lesson)).await?);
        }
        Ok(raised)
    }

    async fn escalate_degraded(&self, action: &str, error: &str) -> Result<Escalation, RepositoryError> {
        let escalation = Escalation::new(
            None,
            "policy-store-degraded",
            DASHBOARD_TARGET,
            format!("policy store unavailable, guard failed open for '{}': {}", action, error),
            EscalationPriority::High,
        );
        self.raise(escalation).await
    }

    async fn retry_pending(&self) -> Result<RetrySummary, RepositoryError> {
        let pending = self.repository.find_pending().await?;
        let mut summary = RetrySummary {
            attempted: pending.len(),
            ..Default::default()
        };
        for mut escalation in pending {
            self.deliver(&mut escalation).await;
            self.repository.save(&escalation).await?;
            if escalation.is_pending() {
                summary.still_pending += 1;
            } else {
                summary.delivered += 1;
            }
        }
        Ok(summary)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Escalation>, RepositoryError> {
        self.repository.list_recent(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::escalation::{EscalationStatus, NotifierError};
    use crate::domain::lesson::{LessonReport, LessonType};
    use crate::domain::policy::Severity;
    use crate::infrastructure::repositories::InMemoryEscalationRepository;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` sends, then succeeds
    struct FlakyNotifier {
        failures: AtomicU32,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl FlakyNotifier {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn send(&self, target: &str, message: &str, _priority: EscalationPriority) -> Result<(), NotifierError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(NotifierError::Delivery("connection refused".to_string()));
            }
            self.sent.lock().push((target.to_string(), message.to_string()));
            Ok(())
        }
    }

    fn router(notifier: Arc<FlakyNotifier>, repo: Arc<InMemoryEscalationRepository>) -> StandardEscalationRouter {
        StandardEscalationRouter::new(
            EscalationRule::defaults(),
            repo,
            notifier,
            DeliveryPolicy {
                max_attempts: 3,
                retry_delay: Duration::from_millis(1),
            },
            Arc::new(EventBus::new(16)),
        )
    }

    fn critical_project_lesson() -> Lesson {
        let mut lesson = Lesson::from_report(
            LessonReport::new(LessonType::AntiPattern, "project", "prod edit", "varys").severity(Severity::Critical),
        );
        lesson.occurrence_count = 4;
        lesson
    }

    #[tokio::test]
    async fn test_all_matching_rules_deliver() {
        let notifier = Arc::new(FlakyNotifier::new(0));
        let repo = Arc::new(InMemoryEscalationRepository::new());
        let router = router(notifier.clone(), repo.clone());

        let raised = router.evaluate(&critical_project_lesson()).await.unwrap();
        assert_eq!(raised.len(), 3);
        assert!(raised.iter().all(|e| e.status == EscalationStatus::Delivered));
        let targets: Vec<_> = notifier.sent.lock().iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(targets, vec!["supervisor", "supervisor", "project-owner"]);
    }

    #[tokio::test]
    async fn test_retries_then_delivers() {
        let notifier = Arc::new(FlakyNotifier::new(2));
        let repo = Arc::new(InMemoryEscalationRepository::new());
        let router = router(notifier, repo);

        let mut lesson = critical_project_lesson();
        lesson.domain = "infra".to_string();
        lesson.occurrence_count = 1;
        let raised = router.evaluate(&lesson).await.unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].status, EscalationStatus::Delivered);
        assert_eq!(raised[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_leave_pending_then_sweep_delivers() {
        let notifier = Arc::new(FlakyNotifier::new(3));
        let repo = Arc::new(InMemoryEscalationRepository::new());
        let router = router(notifier, repo.clone());

        let mut lesson = critical_project_lesson();
        lesson.domain = "infra".to_string();
        lesson.occurrence_count = 1;
        let raised = router.evaluate(&lesson).await.unwrap();
        assert_eq!(raised[0].status, EscalationStatus::Pending);
        assert_eq!(raised[0].attempts, 3);
        assert!(raised[0].last_error.is_some());
        assert_eq!(repo.find_pending().await.unwrap().len(), 1);

        let summary = router.retry_pending().await.unwrap();
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.delivered, 1);
        assert!(repo.find_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_degraded_escalation_targets_dashboard() {
        let notifier = Arc::new(FlakyNotifier::new(0));
        let repo = Arc::new(InMemoryEscalationRepository::new());
        let router = router(notifier, repo);
        let escalation = router.escalate_degraded("deploy", "timeout").await.unwrap();
        assert_eq!(escalation.target, DASHBOARD_TARGET);
        assert!(escalation.lesson_id.is_none());
    }
}
