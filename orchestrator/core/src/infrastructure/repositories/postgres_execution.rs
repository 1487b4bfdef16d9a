// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use super::decode_document;
use crate::domain::execution::{ChainExecution, ExecutionId};
use crate::domain::repository::{ChainExecutionRepository, RepositoryError};

pub struct PostgresChainExecutionRepository {
    pool: PgPool,
}

impl PostgresChainExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChainExecutionRepository for PostgresChainExecutionRepository {
    async fn save(&self, execution: &ChainExecution) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(execution)?;

        sqlx::query(
            r#"
            INSERT INTO chain_executions (id, chain_name, status, current_step, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                current_step = EXCLUDED.current_step,
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(execution.id.0)
        .bind(&execution.chain_name)
        .bind(execution.status.as_str())
        .bind(execution.current_step_index as i32)
        .bind(&document)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save execution {}: {}", execution.id, e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<ChainExecution>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM chain_executions WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_document).transpose()
    }

    async fn find_by_chain(&self, chain_name: &str) -> Result<Vec<ChainExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT document FROM chain_executions WHERE chain_name = $1 ORDER BY created_at DESC",
        )
        .bind(chain_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_document).collect()
    }

    async fn find_recent(&self, limit: usize) -> Result<Vec<ChainExecution>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM chain_executions ORDER BY created_at DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_document).collect()
    }

    async fn mark_cancel_requested(&self, id: ExecutionId) -> Result<Option<ChainExecution>, RepositoryError> {
        let row = sqlx::query(
            r#"
            UPDATE chain_executions
            SET document = jsonb_set(document, '{cancel_requested}', 'true'::jsonb),
                updated_at = now()
            WHERE id = $1 AND status IN ('pending', 'running', 'paused')
            RETURNING document
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to flag cancellation of {}: {}", id, e)))?;

        match row {
            Some(row) => decode_document(&row).map(Some),
            // Terminal or missing
            None => self.find_by_id(id).await,
        }
    }
}
