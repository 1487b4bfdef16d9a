// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root: one repository per
//! aggregate, interface defined in the domain layer, implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ChainRepository` | `Chain` | in-memory, Postgres |
//! | `ChainExecutionRepository` | `ChainExecution` | in-memory, Postgres |
//! | `PolicyRuleRepository` | `PolicyRule` | in-memory, Postgres |
//! | `LessonRepository` | `Lesson` | in-memory, Postgres |
//! | `EscalationRepository` | `Escalation` | in-memory, Postgres |
//! | `PromotionRepository` | `PromotionRun` | in-memory, Postgres |
//! | `EnvironmentLockStore` | `EnvironmentLock` | in-memory, JSON file, Postgres |
//!
//! ## Storage Backend Abstraction
//!
//! Concrete implementations are selected at startup from `atlas-config.yaml`.
//! In-memory implementations serve development and tests; PostgreSQL serves
//! production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::domain::chain::Chain;
use crate::domain::escalation::{Escalation, EscalationId};
use crate::domain::environment_lock::EnvironmentLock;
use crate::domain::execution::{ChainExecution, ExecutionId};
use crate::domain::lesson::{Lesson, LessonId, RecordOutcome};
use crate::domain::policy::{PolicyRule, RuleId};
use crate::domain::promotion::{PromotionId, PromotionRun};

#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

#[async_trait]
pub trait ChainRepository: Send + Sync {
    async fn save(&self, chain: &Chain) -> Result<(), RepositoryError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Chain>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Chain>, RepositoryError>;

    async fn delete(&self, name: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ChainExecutionRepository: Send + Sync {
    async fn save(&self, execution: &ChainExecution) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<ChainExecution>, RepositoryError>;

    async fn find_by_chain(&self, chain_name: &str) -> Result<Vec<ChainExecution>, RepositoryError>;

    /// Most recently created first
    async fn find_recent(&self, limit: usize) -> Result<Vec<ChainExecution>, RepositoryError>;

    /// Atomically set `cancel_requested` on a non-terminal execution without
    /// touching the rest of the stored document. Returns the stored execution,
    /// unchanged when it is already terminal.
    async fn mark_cancel_requested(&self, id: ExecutionId) -> Result<Option<ChainExecution>, RepositoryError>;
}

#[async_trait]
pub trait PolicyRuleRepository: Send + Sync {
    async fn save(&self, rule: &PolicyRule) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: RuleId) -> Result<Option<PolicyRule>, RepositoryError>;

    /// Rules not expired at `now`; predicate matching happens in the caller
    async fn find_unexpired(&self, now: DateTime<Utc>) -> Result<Vec<PolicyRule>, RepositoryError>;

    async fn find_by_source_lesson(&self, lesson_id: LessonId) -> Result<Option<PolicyRule>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<PolicyRule>, RepositoryError>;

    async fn delete(&self, id: RuleId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait LessonRepository: Send + Sync {
    /// Insert, or atomically bump `occurrence_count` and `last_occurred` of
    /// the active lesson sharing `(title, domain, type)`.
    async fn record(&self, lesson: &Lesson) -> Result<RecordOutcome, RepositoryError>;

    async fn find_by_id(&self, id: LessonId) -> Result<Option<Lesson>, RepositoryError>;

    /// Most recently occurred first
    async fn list_recent(&self, limit: usize) -> Result<Vec<Lesson>, RepositoryError>;
}

#[async_trait]
pub trait EscalationRepository: Send + Sync {
    async fn save(&self, escalation: &Escalation) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: EscalationId) -> Result<Option<Escalation>, RepositoryError>;

    /// Oldest first
    async fn find_pending(&self) -> Result<Vec<Escalation>, RepositoryError>;

    async fn list_recent(&self, limit: usize) -> Result<Vec<Escalation>, RepositoryError>;
}

#[async_trait]
pub trait PromotionRepository: Send + Sync {
    async fn save(&self, run: &PromotionRun) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: PromotionId) -> Result<Option<PromotionRun>, RepositoryError>;

    async fn list_recent(&self, limit: usize) -> Result<Vec<PromotionRun>, RepositoryError>;
}

/// Durable single-value store for the environment lock.
///
/// Writers go through `compare_and_swap` so a decision made on a read can
/// never be applied over a state that changed in between.
#[async_trait]
pub trait EnvironmentLockStore: Send + Sync {
    /// Current persisted state; locked when nothing was ever stored
    async fn load(&self) -> Result<EnvironmentLock, RepositoryError>;

    /// Replace `expected` with `new`. Returns `false` when the stored state
    /// no longer equals `expected`.
    async fn compare_and_swap(
        &self,
        expected: &EnvironmentLock,
        new: &EnvironmentLock,
    ) -> Result<bool, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Database(err.to_string())
    }
}
