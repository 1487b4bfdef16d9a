// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on the configured
//! storage backend. The domain layer only sees the traits.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select in-memory, file or PostgreSQL implementations at startup

use std::path::Path;
use std::sync::Arc;

use sqlx::PgPool;

use crate::domain::repository::{
    ChainExecutionRepository, ChainRepository, EnvironmentLockStore, EscalationRepository, LessonRepository,
    PolicyRuleRepository, PromotionRepository, RepositoryError, StorageBackend,
};
use crate::infrastructure::repositories::{
    FileEnvironmentLockStore, InMemoryChainExecutionRepository, InMemoryChainRepository,
    InMemoryEscalationRepository, InMemoryLessonRepository, InMemoryPolicyRuleRepository,
    InMemoryPromotionRepository, PostgresChainExecutionRepository, PostgresChainRepository,
    PostgresEnvironmentLockStore, PostgresEscalationRepository, PostgresLessonRepository,
    PostgresPolicyRuleRepository, PostgresPromotionRepository,
};

fn require_pool(pool: Option<&PgPool>) -> Result<PgPool, RepositoryError> {
    pool.cloned()
        .ok_or_else(|| RepositoryError::Database("postgres backend configured without a connection pool".to_string()))
}

/// Creates a ChainRepository implementation based on the configured backend
pub fn create_chain_repository(
    backend: &StorageBackend,
    pool: Option<&PgPool>,
) -> Result<Arc<dyn ChainRepository>, RepositoryError> {
    Ok(match backend {
        StorageBackend::InMemory => Arc::new(InMemoryChainRepository::new()),
        StorageBackend::PostgreSQL(_) => Arc::new(PostgresChainRepository::new(require_pool(pool)?)),
    })
}

/// Creates a ChainExecutionRepository implementation based on the configured backend
pub fn create_execution_repository(
    backend: &StorageBackend,
    pool: Option<&PgPool>,
) -> Result<Arc<dyn ChainExecutionRepository>, RepositoryError> {
    Ok(match backend {
        StorageBackend::InMemory => Arc::new(InMemoryChainExecutionRepository::new()),
        StorageBackend::PostgreSQL(_) => Arc::new(PostgresChainExecutionRepository::new(require_pool(pool)?)),
    })
}

pub fn create_policy_rule_repository(
    backend: &StorageBackend,
    pool: Option<&PgPool>,
) -> Result<Arc<dyn PolicyRuleRepository>, RepositoryError> {
    Ok(match backend {
        StorageBackend::InMemory => Arc::new(InMemoryPolicyRuleRepository::new()),
        StorageBackend::PostgreSQL(_) => Arc::new(PostgresPolicyRuleRepository::new(require_pool(pool)?)),
    })
}

pub fn create_lesson_repository(
    backend: &StorageBackend,
    pool: Option<&PgPool>,
) -> Result<Arc<dyn LessonRepository>, RepositoryError> {
    Ok(match backend {
        StorageBackend::InMemory => Arc::new(InMemoryLessonRepository::new()),
        StorageBackend::PostgreSQL(_) => Arc::new(PostgresLessonRepository::new(require_pool(pool)?)),
    })
}

pub fn create_escalation_repository(
    backend: &StorageBackend,
    pool: Option<&PgPool>,
) -> Result<Arc<dyn EscalationRepository>, RepositoryError> {
    Ok(match backend {
        StorageBackend::InMemory => Arc::new(InMemoryEscalationRepository::new()),
        StorageBackend::PostgreSQL(_) => Arc::new(PostgresEscalationRepository::new(require_pool(pool)?)),
    })
}

pub fn create_promotion_repository(
    backend: &StorageBackend,
    pool: Option<&PgPool>,
) -> Result<Arc<dyn PromotionRepository>, RepositoryError> {
    Ok(match backend {
        StorageBackend::InMemory => Arc::new(InMemoryPromotionRepository::new()),
        StorageBackend::PostgreSQL(_) => Arc::new(PostgresPromotionRepository::new(require_pool(pool)?)),
    })
}

/// The lock must survive restarts, so without a database it lives in a JSON
/// file rather than in memory.
pub fn create_environment_lock_store(
    backend: &StorageBackend,
    pool: Option<&PgPool>,
    state_file: &Path,
) -> Result<Arc<dyn EnvironmentLockStore>, RepositoryError> {
    Ok(match backend {
        StorageBackend::InMemory => Arc::new(FileEnvironmentLockStore::new(state_file)),
        StorageBackend::PostgreSQL(_) => Arc::new(PostgresEnvironmentLockStore::new(require_pool(pool)?)),
    })
}

/// Every repository a node needs, built against one backend
#[derive(Clone)]
pub struct Repositories {
    pub chains: Arc<dyn ChainRepository>,
    pub executions: Arc<dyn ChainExecutionRepository>,
    pub rules: Arc<dyn PolicyRuleRepository>,
    pub lessons: Arc<dyn LessonRepository>,
    pub escalations: Arc<dyn EscalationRepository>,
    pub promotions: Arc<dyn PromotionRepository>,
    pub environment_lock: Arc<dyn EnvironmentLockStore>,
}

impl Repositories {
    pub fn create(
        backend: &StorageBackend,
        pool: Option<&PgPool>,
        lock_state_file: &Path,
    ) -> Result<Self, RepositoryError> {
        Ok(Self {
            chains: create_chain_repository(backend, pool)?,
            executions: create_execution_repository(backend, pool)?,
            rules: create_policy_rule_repository(backend, pool)?,
            lessons: create_lesson_repository(backend, pool)?,
            escalations: create_escalation_repository(backend, pool)?,
            promotions: create_promotion_repository(backend, pool)?,
            environment_lock: create_environment_lock_store(backend, pool, lock_state_file)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::PostgresConfig;

    #[tokio::test]
    async fn test_in_memory_backend_uses_file_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock.json");
        let repos = Repositories::create(&StorageBackend::InMemory, None, &path).unwrap();

        let lock = repos.environment_lock.load().await.unwrap();
        assert!(lock.locked);
        assert!(repos.chains.list_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_postgres_backend_requires_pool() {
        let backend = StorageBackend::PostgreSQL(PostgresConfig {
            connection_string: "postgres://localhost/atlas".to_string(),
        });
        assert!(matches!(
            create_chain_repository(&backend, None),
            Err(RepositoryError::Database(_))
        ));
    }
}
