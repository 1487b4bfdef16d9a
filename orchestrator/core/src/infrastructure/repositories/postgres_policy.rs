// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;

use super::decode_document;
use crate::domain::escalation::{Escalation, EscalationId};
use crate::domain::lesson::LessonId;
use crate::domain::policy::{PolicyRule, RuleId};
use crate::domain::repository::{EscalationRepository, PolicyRuleRepository, RepositoryError};

pub struct PostgresPolicyRuleRepository {
    pool: PgPool,
}

impl PostgresPolicyRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyRuleRepository for PostgresPolicyRuleRepository {
    async fn save(&self, rule: &PolicyRule) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(rule)?;

        sqlx::query(
            r#"
            INSERT INTO policy_rules (id, name, source_lesson_id, expires_at, document, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                expires_at = EXCLUDED.expires_at,
                document = EXCLUDED.document
            "#,
        )
        .bind(rule.id.0)
        .bind(&rule.name)
        .bind(rule.source_lesson_id.map(|id| id.0))
        .bind(rule.expires_at)
        .bind(&document)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save policy rule: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: RuleId) -> Result<Option<PolicyRule>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM policy_rules WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_document).transpose()
    }

    async fn find_unexpired(&self, now: DateTime<Utc>) -> Result<Vec<PolicyRule>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT document FROM policy_rules WHERE expires_at IS NULL OR expires_at > $1 ORDER BY created_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_document).collect()
    }

    async fn find_by_source_lesson(&self, lesson_id: LessonId) -> Result<Option<PolicyRule>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM policy_rules WHERE source_lesson_id = $1 LIMIT 1")
            .bind(lesson_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_document).transpose()
    }

    async fn list_all(&self) -> Result<Vec<PolicyRule>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM policy_rules ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_document).collect()
    }

    async fn delete(&self, id: RuleId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM policy_rules WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PostgresEscalationRepository {
    pool: PgPool,
}

impl PostgresEscalationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EscalationRepository for PostgresEscalationRepository {
    async fn save(&self, escalation: &Escalation) -> Result<(), RepositoryError> {
        let document = serde_json::to_value(escalation)?;

        sqlx::query(
            r#"
            INSERT INTO escalations (id, target, status, document, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                document = EXCLUDED.document
            "#,
        )
        .bind(escalation.id.0)
        .bind(&escalation.target)
        .bind(escalation.status.as_str())
        .bind(&document)
        .bind(escalation.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save escalation: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: EscalationId) -> Result<Option<Escalation>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM escalations WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_document).transpose()
    }

    async fn find_pending(&self) -> Result<Vec<Escalation>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM escalations WHERE status = 'pending' ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_document).collect()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Escalation>, RepositoryError> {
        let rows = sqlx::query("SELECT document FROM escalations ORDER BY created_at DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_document).collect()
    }
}
