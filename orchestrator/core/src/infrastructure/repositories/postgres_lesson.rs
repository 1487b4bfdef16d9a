// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Lesson persistence.
//!
//! Dedupe is enforced by the partial unique index
//! `lessons_active_identity (title, domain, lesson_type) WHERE status = 'active'`,
//! so concurrent reports of the same lesson collapse into one row through
//! `INSERT .. ON CONFLICT .. DO UPDATE`. The `occurrence_count` and
//! `last_occurred` columns are authoritative over the stored document.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::decode_document;
use crate::domain::lesson::{Lesson, LessonId, RecordOutcome};
use crate::domain::repository::{LessonRepository, RepositoryError};

pub struct PostgresLessonRepository {
    pool: PgPool,
}

impl PostgresLessonRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn lesson_from_row(row: &PgRow) -> Result<Lesson, RepositoryError> {
        let mut lesson: Lesson = decode_document(row)?;
        let count: i32 = row.try_get("occurrence_count")?;
        lesson.occurrence_count = count.max(0) as u32;
        lesson.last_occurred = row.try_get::<DateTime<Utc>, _>("last_occurred")?;
        Ok(lesson)
    }
}

#[async_trait]
impl LessonRepository for PostgresLessonRepository {
    async fn record(&self, lesson: &Lesson) -> Result<RecordOutcome, RepositoryError> {
        let document = serde_json::to_value(lesson)?;

        // xmax is zero only for rows created by this statement
        let row = sqlx::query(
            r#"
            INSERT INTO lessons (id, title, domain, lesson_type, status, occurrence_count, document, created_at, last_occurred)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (title, domain, lesson_type) WHERE status = 'active' DO UPDATE SET
                occurrence_count = lessons.occurrence_count + 1,
                last_occurred = EXCLUDED.last_occurred
            RETURNING id, occurrence_count, (xmax = 0) AS inserted
            "#,
        )
        .bind(lesson.id.0)
        .bind(&lesson.title)
        .bind(&lesson.domain)
        .bind(lesson.lesson_type.as_str())
        .bind(lesson.status.as_str())
        .bind(lesson.occurrence_count as i32)
        .bind(&document)
        .bind(lesson.created_at)
        .bind(lesson.last_occurred)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to record lesson: {}", e)))?;

        let id: Uuid = row.try_get("id")?;
        let count: i32 = row.try_get("occurrence_count")?;
        let inserted: bool = row.try_get("inserted")?;

        Ok(RecordOutcome {
            id: LessonId(id),
            deduped_existing: !inserted,
            occurrence_count: count.max(0) as u32,
        })
    }

    async fn find_by_id(&self, id: LessonId) -> Result<Option<Lesson>, RepositoryError> {
        let row = sqlx::query("SELECT document, occurrence_count, last_occurred FROM lessons WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::lesson_from_row).transpose()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Lesson>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT document, occurrence_count, last_occurred FROM lessons ORDER BY last_occurred DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::lesson_from_row).collect()
    }
}
