// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use super::decode_document;
use crate::domain::chain::Chain;
use crate::domain::repository::{ChainRepository, RepositoryError};

pub struct PostgresChainRepository {
    pool: PgPool,
}

impl PostgresChainRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChainRepository for PostgresChainRepository {
    async fn save(&self, chain: &Chain) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(chain)?;

        sqlx::query(
            r#"
            INSERT INTO chains (name, version, document, registered_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (name) DO UPDATE SET
                version = EXCLUDED.version,
                document = EXCLUDED.document,
                updated_at = NOW()
            "#,
        )
        .bind(&chain.name)
        .bind(&chain.version)
        .bind(&document)
        .bind(chain.registered_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save chain: {}", e)))?;

        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Chain>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM chains WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_document).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Chain>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM chains ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_document).collect()
    }

    async fn delete(&self, name: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM chains WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
