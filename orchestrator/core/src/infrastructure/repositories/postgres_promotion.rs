// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use super::decode_document;
use crate::domain::promotion::{PromotionId, PromotionRun};
use crate::domain::repository::{PromotionRepository, RepositoryError};

pub struct PostgresPromotionRepository {
    pool: PgPool,
}

impl PostgresPromotionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PromotionRepository for PostgresPromotionRepository {
    async fn save(&self, run: &PromotionRun) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(run)?;

        sqlx::query(
            r#"
            INSERT INTO promotion_runs (id, target, source_env, dest_env, status, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                document = EXCLUDED.document,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(run.id.0)
        .bind(run.target.as_str())
        .bind(&run.source_env)
        .bind(&run.dest_env)
        .bind(run.status.as_str())
        .bind(&document)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save promotion {}: {}", run.id, e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: PromotionId) -> Result<Option<PromotionRun>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM promotion_runs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_document).transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<PromotionRun>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM promotion_runs ORDER BY created_at DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_document).collect()
    }
}
