// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL
//!
//! Aggregates are stored as a JSONB document next to the columns used for
//! lookups and ordering:
//! - **PostgresChainRepository**, **PostgresChainExecutionRepository**
//! - **PostgresPolicyRuleRepository**, **PostgresLessonRepository**
//! - **PostgresEscalationRepository**, **PostgresPromotionRepository**
//! - **PostgresEnvironmentLockStore** - single-row compare-and-swap
//!
//! ## In-Memory
//!
//! HashMap-backed implementations for tests and development. State is lost
//! when the process exits.
//!
//! ## File
//!
//! - **FileEnvironmentLockStore** - JSON file, so the lock survives daemon
//!   restarts without a database

pub mod file_lock_store;
pub mod postgres_chain;
pub mod postgres_execution;
pub mod postgres_lesson;
pub mod postgres_lock;
pub mod postgres_policy;
pub mod postgres_promotion;

pub use file_lock_store::FileEnvironmentLockStore;
pub use postgres_chain::PostgresChainRepository;
pub use postgres_execution::PostgresChainExecutionRepository;
pub use postgres_lesson::PostgresLessonRepository;
pub use postgres_lock::PostgresEnvironmentLockStore;
pub use postgres_policy::{PostgresEscalationRepository, PostgresPolicyRuleRepository};
pub use postgres_promotion::PostgresPromotionRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::chain::Chain;
use crate::domain::environment_lock::EnvironmentLock;
use crate::domain::escalation::{Escalation, EscalationId};
use crate::domain::execution::{ChainExecution, ExecutionId};
use crate::domain::lesson::{Lesson, LessonId, RecordOutcome};
use crate::domain::policy::{PolicyRule, RuleId};
use crate::domain::promotion::{PromotionId, PromotionRun};
use crate::domain::repository::{
    ChainExecutionRepository, ChainRepository, EnvironmentLockStore, EscalationRepository,
    LessonRepository, PolicyRuleRepository, PromotionRepository, RepositoryError,
};

/// Deserialize the `document` JSONB column of a row
pub(crate) fn decode_document<T: serde::de::DeserializeOwned>(
    row: &sqlx::postgres::PgRow,
) -> Result<T, RepositoryError> {
    use sqlx::Row;
    let document: serde_json::Value = row.try_get("document")?;
    Ok(serde_json::from_value(document)?)
}

#[derive(Clone, Default)]
pub struct InMemoryChainRepository {
    chains: Arc<RwLock<HashMap<String, Chain>>>,
}

impl InMemoryChainRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChainRepository for InMemoryChainRepository {
    async fn save(&self, chain: &Chain) -> Result<(), RepositoryError> {
        self.chains.write().insert(chain.name.clone(), chain.clone());
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Chain>, RepositoryError> {
        Ok(self.chains.read().get(name).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Chain>, RepositoryError> {
        let mut chains: Vec<Chain> = self.chains.read().values().cloned().collect();
        chains.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(chains)
    }

    async fn delete(&self, name: &str) -> Result<(), RepositoryError> {
        self.chains.write().remove(name);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryChainExecutionRepository {
    executions: Arc<RwLock<HashMap<ExecutionId, ChainExecution>>>,
}

impl InMemoryChainExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChainExecutionRepository for InMemoryChainExecutionRepository {
    async fn save(&self, execution: &ChainExecution) -> Result<(), RepositoryError> {
        self.executions.write().insert(execution.id, execution.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<ChainExecution>, RepositoryError> {
        Ok(self.executions.read().get(&id).cloned())
    }

    async fn find_by_chain(&self, chain_name: &str) -> Result<Vec<ChainExecution>, RepositoryError> {
        let mut executions: Vec<ChainExecution> = self
            .executions
            .read()
            .values()
            .filter(|e| e.chain_name == chain_name)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(executions)
    }

    async fn find_recent(&self, limit: usize) -> Result<Vec<ChainExecution>, RepositoryError> {
        let mut executions: Vec<ChainExecution> = self.executions.read().values().cloned().collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        executions.truncate(limit);
        Ok(executions)
    }

    async fn mark_cancel_requested(&self, id: ExecutionId) -> Result<Option<ChainExecution>, RepositoryError> {
        let mut executions = self.executions.write();
        let Some(execution) = executions.get_mut(&id) else {
            return Ok(None);
        };
        if !execution.is_terminal() {
            execution.request_cancel();
        }
        Ok(Some(execution.clone()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPolicyRuleRepository {
    rules: Arc<RwLock<HashMap<RuleId, PolicyRule>>>,
}

impl InMemoryPolicyRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyRuleRepository for InMemoryPolicyRuleRepository {
    async fn save(&self, rule: &PolicyRule) -> Result<(), RepositoryError> {
        self.rules.write().insert(rule.id, rule.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: RuleId) -> Result<Option<PolicyRule>, RepositoryError> {
        Ok(self.rules.read().get(&id).cloned())
    }

    async fn find_unexpired(&self, now: DateTime<Utc>) -> Result<Vec<PolicyRule>, RepositoryError> {
        let mut rules: Vec<PolicyRule> = self
            .rules
            .read()
            .values()
            .filter(|r| !r.is_expired(now))
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rules)
    }

    async fn find_by_source_lesson(&self, lesson_id: LessonId) -> Result<Option<PolicyRule>, RepositoryError> {
        Ok(self
            .rules
            .read()
            .values()
            .find(|r| r.source_lesson_id == Some(lesson_id))
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<PolicyRule>, RepositoryError> {
        let mut rules: Vec<PolicyRule> = self.rules.read().values().cloned().collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rules)
    }

    async fn delete(&self, id: RuleId) -> Result<(), RepositoryError> {
        self.rules.write().remove(&id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryLessonRepository {
    lessons: Arc<RwLock<HashMap<LessonId, Lesson>>>,
}

impl InMemoryLessonRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LessonRepository for InMemoryLessonRepository {
    async fn record(&self, lesson: &Lesson) -> Result<RecordOutcome, RepositoryError> {
        // Lookup and insert under one write guard
        let mut lessons = self.lessons.write();
        if let Some(existing) = lessons
            .values_mut()
            .find(|l| l.same_identity(&lesson.title, &lesson.domain, lesson.lesson_type))
        {
            existing.record_occurrence(lesson.last_occurred);
            return Ok(RecordOutcome {
                id: existing.id,
                deduped_existing: true,
                occurrence_count: existing.occurrence_count,
            });
        }

        lessons.insert(lesson.id, lesson.clone());
        Ok(RecordOutcome {
            id: lesson.id,
            deduped_existing: false,
            occurrence_count: lesson.occurrence_count,
        })
    }

    async fn find_by_id(&self, id: LessonId) -> Result<Option<Lesson>, RepositoryError> {
        Ok(self.lessons.read().get(&id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Lesson>, RepositoryError> {
        let mut lessons: Vec<Lesson> = self.lessons.read().values().cloned().collect();
        lessons.sort_by(|a, b| b.last_occurred.cmp(&a.last_occurred));
        lessons.truncate(limit);
        Ok(lessons)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryEscalationRepository {
    escalations: Arc<RwLock<HashMap<EscalationId, Escalation>>>,
}

impl InMemoryEscalationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EscalationRepository for InMemoryEscalationRepository {
    async fn save(&self, escalation: &Escalation) -> Result<(), RepositoryError> {
        self.escalations.write().insert(escalation.id, escalation.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: EscalationId) -> Result<Option<Escalation>, RepositoryError> {
        Ok(self.escalations.read().get(&id).cloned())
    }

    async fn find_pending(&self) -> Result<Vec<Escalation>, RepositoryError> {
        let mut pending: Vec<Escalation> = self
            .escalations
            .read()
            .values()
            .filter(|e| e.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Escalation>, RepositoryError> {
        let mut escalations: Vec<Escalation> = self.escalations.read().values().cloned().collect();
        escalations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        escalations.truncate(limit);
        Ok(escalations)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPromotionRepository {
    runs: Arc<RwLock<HashMap<PromotionId, PromotionRun>>>,
}

impl InMemoryPromotionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PromotionRepository for InMemoryPromotionRepository {
    async fn save(&self, run: &PromotionRun) -> Result<(), RepositoryError> {
        self.runs.write().insert(run.id, run.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: PromotionId) -> Result<Option<PromotionRun>, RepositoryError> {
        Ok(self.runs.read().get(&id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<PromotionRun>, RepositoryError> {
        let mut runs: Vec<PromotionRun> = self.runs.read().values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryEnvironmentLockStore {
    state: Arc<Mutex<EnvironmentLock>>,
}

impl InMemoryEnvironmentLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(lock: EnvironmentLock) -> Self {
        Self {
            state: Arc::new(Mutex::new(lock)),
        }
    }
}

#[async_trait]
impl EnvironmentLockStore for InMemoryEnvironmentLockStore {
    async fn load(&self) -> Result<EnvironmentLock, RepositoryError> {
        Ok(self.state.lock().clone())
    }

    async fn compare_and_swap(
        &self,
        expected: &EnvironmentLock,
        new: &EnvironmentLock,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock();
        if *state != *expected {
            return Ok(false);
        }
        *state = new.clone();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lesson::{LessonReport, LessonType};

    fn lesson(title: &str) -> Lesson {
        Lesson::from_report(LessonReport::new(LessonType::Failure, "deploy", title, "test"))
    }

    #[tokio::test]
    async fn test_record_dedupes_on_identity() {
        let repo = InMemoryLessonRepository::new();
        let first = repo.record(&lesson("db timeout")).await.unwrap();
        let second = repo.record(&lesson("db timeout")).await.unwrap();
        let other = repo.record(&lesson("disk full")).await.unwrap();

        assert!(!first.deduped_existing);
        assert!(second.deduped_existing);
        assert_eq!(second.id, first.id);
        assert_eq!(second.occurrence_count, 2);
        assert_ne!(other.id, first.id);
        assert_eq!(repo.list_recent(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_records_produce_one_lesson() {
        let repo = InMemoryLessonRepository::new();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move { repo.record(&lesson("flaky upstream")).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let lessons = repo.list_recent(10).await.unwrap();
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].occurrence_count, 20);
    }

    #[tokio::test]
    async fn test_lock_store_compare_and_swap() {
        let store = InMemoryEnvironmentLockStore::new();
        let engaged = store.load().await.unwrap();
        assert!(engaged.locked);

        let mut unlocked = engaged.clone();
        unlocked.locked = false;
        assert!(store.compare_and_swap(&engaged, &unlocked).await.unwrap());
        // Stale expectation is rejected
        assert!(!store.compare_and_swap(&engaged, &engaged).await.unwrap());
        assert!(!store.load().await.unwrap().locked);
    }

    #[tokio::test]
    async fn test_mark_cancel_requested_skips_terminal_executions() {
        use crate::domain::chain::StepDefinition;
        let repo = InMemoryChainExecutionRepository::new();
        let chain = Chain::new("report", "1", None, vec![StepDefinition::new("fetch", "scout")]).unwrap();
        let mut running = ChainExecution::new(chain.clone(), serde_json::json!({}), "test");
        running.start().unwrap();
        let mut cancelled = ChainExecution::new(chain, serde_json::json!({}), "test");
        cancelled.cancel().unwrap();
        repo.save(&running).await.unwrap();
        repo.save(&cancelled).await.unwrap();

        let flagged = repo.mark_cancel_requested(running.id).await.unwrap().unwrap();
        assert!(flagged.cancel_requested);
        assert!(repo.find_by_id(running.id).await.unwrap().unwrap().cancel_requested);

        let untouched = repo.mark_cancel_requested(cancelled.id).await.unwrap().unwrap();
        assert!(!untouched.cancel_requested);
        assert!(repo.mark_cancel_requested(ExecutionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_escalations_oldest_first() {
        use crate::domain::escalation::EscalationPriority;
        let repo = InMemoryEscalationRepository::new();
        let mut older = Escalation::new(None, "a", "supervisor", "first", EscalationPriority::High);
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = Escalation::new(None, "b", "supervisor", "second", EscalationPriority::High);
        let mut delivered = Escalation::new(None, "c", "supervisor", "third", EscalationPriority::Low);
        delivered.mark_delivered();

        for e in [&newer, &older, &delivered] {
            repo.save(e).await.unwrap();
        }
        let pending = repo.find_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].reason, "first");
    }
}
