// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the supervision loop
//!
//! 1. Anti-pattern lessons derive enforced policy rules
//! 2. The guard blocks sensitive chain steps matching those rules
//! 3. Repeated lessons collapse onto one record
//! 4. Escalations survive delivery failures and are retried

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atlas_core::application::escalation_router::{DeliveryPolicy, EscalationRouter, StandardEscalationRouter};
use atlas_core::application::executor::{ChainExecutor, ExecutorSettings, StandardChainExecutor};
use atlas_core::application::guard::StandardGuardService;
use atlas_core::application::lesson_reporter::{LessonReporter, StandardLessonReporter};
use atlas_core::application::policy_store::{PolicyStore, StandardPolicyStore};
use atlas_core::domain::chain::{Chain, StepDefinition};
use atlas_core::domain::escalation::{EscalationPriority, EscalationRule, EscalationStatus, Notifier, NotifierError};
use atlas_core::domain::execution::{ExecutionStatus, StepStatus, TokenCounts};
use atlas_core::domain::lesson::{LessonReport, LessonType};
use atlas_core::domain::policy::{RuleAction, Severity};
use atlas_core::domain::repository::ChainRepository;
use atlas_core::domain::runtime::{AgentInvoker, InvocationOutput, InvocationRequest, InvokerError};
use atlas_core::infrastructure::event_bus::EventBus;
use atlas_core::infrastructure::repositories::{
    InMemoryChainExecutionRepository, InMemoryChainRepository, InMemoryEscalationRepository, InMemoryLessonRepository,
    InMemoryPolicyRuleRepository,
};

/// Records which agents were called
#[derive(Default)]
struct RecordingInvoker {
    calls: parking_lot::Mutex<Vec<String>>,
}

#[async_trait]
impl AgentInvoker for RecordingInvoker {
    async fn invoke(&self, request: InvocationRequest, _timeout: Duration) -> Result<InvocationOutput, InvokerError> {
        self.calls.lock().push(request.agent_ref.clone());
        Ok(InvocationOutput {
            output: json!({ "agent": request.agent_ref }),
            cost: 0.25,
            duration_ms: 5,
            tokens: TokenCounts { input: 3, output: 2 },
        })
    }
}

/// Fails until `healthy` is set
#[derive(Default)]
struct FlakyNotifier {
    healthy: AtomicBool,
    attempts: AtomicUsize,
    delivered: parking_lot::Mutex<Vec<(String, EscalationPriority)>>,
}

#[async_trait]
impl Notifier for FlakyNotifier {
    async fn send(&self, target: &str, _message: &str, priority: EscalationPriority) -> Result<(), NotifierError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(NotifierError::Delivery("HTTP 503".to_string()));
        }
        self.delivered.lock().push((target.to_string(), priority));
        Ok(())
    }
}

struct Fleet {
    chains: Arc<InMemoryChainRepository>,
    executor: StandardChainExecutor,
    reporter: Arc<StandardLessonReporter>,
    policy_store: Arc<StandardPolicyStore>,
    router: Arc<StandardEscalationRouter>,
    invoker: Arc<RecordingInvoker>,
    notifier: Arc<FlakyNotifier>,
}

fn fleet() -> Fleet {
    let bus = Arc::new(EventBus::with_default_capacity());
    let chains = Arc::new(InMemoryChainRepository::new());
    let policy_store = Arc::new(StandardPolicyStore::new(
        Arc::new(InMemoryPolicyRuleRepository::new()),
        Arc::new(InMemoryLessonRepository::new()),
    ));
    let notifier = Arc::new(FlakyNotifier::default());
    let router = Arc::new(StandardEscalationRouter::new(
        EscalationRule::defaults(),
        Arc::new(InMemoryEscalationRepository::new()),
        notifier.clone(),
        DeliveryPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
        },
        bus.clone(),
    ));
    let reporter = Arc::new(StandardLessonReporter::new(
        policy_store.clone(),
        Some(router.clone()),
        bus.clone(),
    ));
    let guard = Arc::new(StandardGuardService::new(
        policy_store.clone(),
        Some(reporter.clone()),
        Some(router.clone()),
        bus.clone(),
        Duration::from_secs(1),
    ));
    let invoker = Arc::new(RecordingInvoker::default());
    let executor = StandardChainExecutor::new(
        chains.clone(),
        Arc::new(InMemoryChainExecutionRepository::new()),
        guard,
        invoker.clone(),
        Some(reporter.clone()),
        bus,
        ExecutorSettings::default(),
    );
    Fleet {
        chains,
        executor,
        reporter,
        policy_store,
        router,
        invoker,
        notifier,
    }
}

fn migration_chain() -> Chain {
    Chain::new(
        "nightly-migration",
        "1.0.0",
        Some("Plan and run the nightly schema migration".to_string()),
        vec![
            StepDefinition::new("plan", "planner"),
            StepDefinition::new("migrate", "dba")
                .action("drop table customers in prod")
                .domain("infra")
                .sensitive(true),
            StepDefinition::new("notify", "herald"),
        ],
    )
    .unwrap()
}

fn anti_pattern() -> LessonReport {
    LessonReport::new(LessonType::AntiPattern, "infra", "never drop prod tables", "postmortem")
        .context("customers table dropped during a migration")
        .outcome("four hours of downtime")
        .severity(Severity::Critical)
        .keywords(["drop table"])
        .alternatives(vec!["rename the table and drop it after a week".to_string()])
}

#[tokio::test]
async fn test_anti_pattern_lesson_blocks_sensitive_step() {
    let fleet = fleet();
    fleet.chains.save(&migration_chain()).await.unwrap();

    let recorded = fleet.reporter.report(anti_pattern()).await.unwrap();
    let rule_id = recorded.derived_rule_id.expect("critical anti-pattern derives a rule");
    let rule = fleet.policy_store.find_rule(rule_id).await.unwrap().unwrap();
    assert_eq!(rule.action, RuleAction::Block);
    assert!(rule.enforced);

    let execution = fleet
        .executor
        .start_chain("nightly-migration", json!({}), "scheduler")
        .await
        .unwrap();
    let execution = fleet.executor.run_to_completion(execution.id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.current_step_index, 1);
    let results = execution.step_results();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, StepStatus::Completed);
    assert_eq!(results[1].status, StepStatus::Blocked);
    assert!(execution
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("blocked by guard"));

    // Only the planner ran; the blocked step and everything after it never dispatched
    assert_eq!(*fleet.invoker.calls.lock(), vec!["planner".to_string()]);
}

#[tokio::test]
async fn test_warn_rule_lets_step_run_with_warning() {
    let fleet = fleet();
    fleet.chains.save(&migration_chain()).await.unwrap();

    let mut report = anti_pattern();
    report.severity = Severity::High;
    let recorded = fleet.reporter.report(report).await.unwrap();
    let rule = fleet
        .policy_store
        .find_rule(recorded.derived_rule_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rule.action, RuleAction::Warn);

    let execution = fleet
        .executor
        .start_chain("nightly-migration", json!({}), "scheduler")
        .await
        .unwrap();
    let execution = fleet.executor.run_to_completion(execution.id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(!execution.step_results()[1].warnings.is_empty());
    assert_eq!(fleet.invoker.calls.lock().len(), 3);
}

#[tokio::test]
async fn test_repeated_lessons_collapse_and_escalate_when_recurring() {
    let fleet = fleet();
    fleet.notifier.healthy.store(true, Ordering::SeqCst);

    let report = LessonReport::new(LessonType::Failure, "billing", "invoice export timed out", "herald")
        .severity(Severity::Medium);

    let mut ids = Vec::new();
    for _ in 0..4 {
        let recorded = fleet.reporter.report(report.clone()).await.unwrap();
        ids.push(recorded.outcome.id);
    }
    assert!(ids.iter().all(|id| *id == ids[0]));

    let lessons = fleet.policy_store.list_lessons(10).await.unwrap();
    assert_eq!(lessons.len(), 1);
    assert_eq!(lessons[0].occurrence_count, 4);

    // The fourth occurrence crosses the "recurring" threshold
    let delivered = fleet.notifier.delivered.lock().clone();
    assert_eq!(delivered, vec![("supervisor".to_string(), EscalationPriority::High)]);
}

#[tokio::test]
async fn test_escalation_stays_pending_until_retry_succeeds() {
    let fleet = fleet();

    let mut report = LessonReport::new(LessonType::Failure, "infra", "backup volume full", "ops")
        .severity(Severity::Critical);
    report.confidence = 0.9;
    let recorded = fleet.reporter.report(report).await.unwrap();

    assert_eq!(recorded.escalations.len(), 1);
    let escalation = &recorded.escalations[0];
    assert_eq!(escalation.status, EscalationStatus::Pending);
    assert_eq!(escalation.attempts, 3);
    assert!(escalation.last_error.is_some());
    assert_eq!(fleet.notifier.attempts.load(Ordering::SeqCst), 3);

    let listed = fleet.router.list_recent(10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_pending());

    fleet.notifier.healthy.store(true, Ordering::SeqCst);
    let summary = fleet.router.retry_pending().await.unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.still_pending, 0);

    let listed = fleet.router.list_recent(10).await.unwrap();
    assert_eq!(listed[0].status, EscalationStatus::Delivered);
}

#[tokio::test]
async fn test_approval_gate_pauses_chain_until_approved() {
    let fleet = fleet();
    let chain = Chain::new(
        "release",
        "2.1.0",
        None,
        vec![
            StepDefinition::new("build", "builder"),
            StepDefinition::new("ship", "shipper").requires_approval(true),
        ],
    )
    .unwrap();
    fleet.chains.save(&chain).await.unwrap();

    let id = fleet
        .executor
        .start_chain("release", json!({ "tag": "v2.1.0" }), "ci")
        .await
        .unwrap()
        .id;
    let paused = fleet.executor.run_to_completion(id).await.unwrap();
    assert_eq!(paused.status, ExecutionStatus::Paused);
    assert_eq!(paused.current_step_index, 1);

    let err = fleet.executor.advance_step(id, Some(1)).await.unwrap_err();
    assert_eq!(err.kind().as_str(), "invalid_transition");

    fleet.executor.approve_step(id, "release-manager").await.unwrap();
    let done = fleet.executor.run_to_completion(id).await.unwrap();
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(
        *fleet.invoker.calls.lock(),
        vec!["builder".to_string(), "shipper".to_string()]
    );

    let by_chain = fleet.executor.list_executions(Some("release"), 10).await.unwrap();
    assert_eq!(by_chain.len(), 1);
}
