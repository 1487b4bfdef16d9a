// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use super::decode_document;
use crate::domain::environment_lock::EnvironmentLock;
use crate::domain::repository::{EnvironmentLockStore, RepositoryError};

/// Environment lock kept in the single row `environment_lock (id = 1)`
pub struct PostgresEnvironmentLockStore {
    pool: PgPool,
}

impl PostgresEnvironmentLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnvironmentLockStore for PostgresEnvironmentLockStore {
    async fn load(&self) -> Result<EnvironmentLock, RepositoryError> {
        let row = sqlx::query("SELECT document FROM environment_lock WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => decode_document(&row),
            None => Ok(EnvironmentLock::engaged()),
        }
    }

    async fn compare_and_swap(
        &self,
        expected: &EnvironmentLock,
        new: &EnvironmentLock,
    ) -> Result<bool, RepositoryError> {
        let expected_doc = serde_json::to_value(expected)?;
        let new_doc = serde_json::to_value(new)?;

        let updated = sqlx::query(
            "UPDATE environment_lock SET document = $2, updated_at = NOW() WHERE id = 1 AND document = $1",
        )
        .bind(&expected_doc)
        .bind(&new_doc)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(true);
        }
        if *expected != EnvironmentLock::engaged() {
            return Ok(false);
        }

        // Never stored yet: the implicit state is engaged
        let inserted = sqlx::query(
            "INSERT INTO environment_lock (id, document, updated_at) VALUES (1, $1, NOW()) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&new_doc)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }
}
