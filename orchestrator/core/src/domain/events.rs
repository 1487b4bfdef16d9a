// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::domain::escalation::{EscalationId, EscalationPriority};
use crate::domain::execution::ExecutionId;
use crate::domain::lesson::{LessonId, LessonType};
use crate::domain::policy::RuleId;
use crate::domain::promotion::{PromotionId, PromotionStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChainEvent {
    ChainRegistered {
        chain_name: String,
        version: String,
        registered_at: DateTime<Utc>,
    },
    ExecutionStarted {
        execution_id: ExecutionId,
        chain_name: String,
        triggered_by: String,
        started_at: DateTime<Utc>,
    },
    StepCompleted {
        execution_id: ExecutionId,
        step_index: usize,
        step_name: String,
        cost: f64,
        duration_ms: u64,
        completed_at: DateTime<Utc>,
    },
    StepBlocked {
        execution_id: ExecutionId,
        step_index: usize,
        step_name: String,
        reason: String,
        blocked_at: DateTime<Utc>,
    },
    StepFailed {
        execution_id: ExecutionId,
        step_index: usize,
        step_name: String,
        error: String,
        failed_at: DateTime<Utc>,
    },
    ExecutionPaused {
        execution_id: ExecutionId,
        step_index: usize,
        paused_at: DateTime<Utc>,
    },
    ExecutionResumed {
        execution_id: ExecutionId,
        approved_by: String,
        resumed_at: DateTime<Utc>,
    },
    ExecutionCompleted {
        execution_id: ExecutionId,
        total_cost: f64,
        total_duration_ms: u64,
        completed_at: DateTime<Utc>,
    },
    ExecutionFailed {
        execution_id: ExecutionId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    ExecutionCancelled {
        execution_id: ExecutionId,
        cancelled_at: DateTime<Utc>,
    },
}

impl ChainEvent {
    /// Execution the event belongs to; `None` for template events
    pub fn execution_id(&self) -> Option<ExecutionId> {
        match self {
            ChainEvent::ChainRegistered { .. } => None,
            ChainEvent::ExecutionStarted { execution_id, .. }
            | ChainEvent::StepCompleted { execution_id, .. }
            | ChainEvent::StepBlocked { execution_id, .. }
            | ChainEvent::StepFailed { execution_id, .. }
            | ChainEvent::ExecutionPaused { execution_id, .. }
            | ChainEvent::ExecutionResumed { execution_id, .. }
            | ChainEvent::ExecutionCompleted { execution_id, .. }
            | ChainEvent::ExecutionFailed { execution_id, .. }
            | ChainEvent::ExecutionCancelled { execution_id, .. } => Some(*execution_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GuardEvent {
    ActionBlocked {
        action: String,
        domain: String,
        agent_id: String,
        rule_ids: Vec<RuleId>,
        blocked_at: DateTime<Utc>,
    },
    ActionWarned {
        action: String,
        domain: String,
        warning_count: usize,
        warned_at: DateTime<Utc>,
    },
    /// Policy store unreachable; the check failed open
    DegradedMode {
        action: String,
        error: String,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LessonEvent {
    LessonRecorded {
        lesson_id: LessonId,
        lesson_type: LessonType,
        title: String,
        domain: String,
        recorded_at: DateTime<Utc>,
    },
    LessonRecurred {
        lesson_id: LessonId,
        occurrence_count: u32,
        recurred_at: DateTime<Utc>,
    },
    RuleDerived {
        lesson_id: LessonId,
        rule_id: RuleId,
        derived_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EscalationEvent {
    EscalationRaised {
        escalation_id: EscalationId,
        target: String,
        priority: EscalationPriority,
        raised_at: DateTime<Utc>,
    },
    EscalationDelivered {
        escalation_id: EscalationId,
        attempts: u32,
        delivered_at: DateTime<Utc>,
    },
    EscalationPending {
        escalation_id: EscalationId,
        attempts: u32,
        last_error: String,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PromotionEvent {
    PromotionStarted {
        promotion_id: PromotionId,
        source_env: String,
        dest_env: String,
        started_at: DateTime<Utc>,
    },
    StageChanged {
        promotion_id: PromotionId,
        status: PromotionStatus,
        changed_at: DateTime<Utc>,
    },
    ItemApplied {
        promotion_id: PromotionId,
        item: String,
        applied_at: DateTime<Utc>,
    },
    PromotionCompleted {
        promotion_id: PromotionId,
        applied_items: usize,
        completed_at: DateTime<Utc>,
    },
    PromotionFailed {
        promotion_id: PromotionId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LockEvent {
    Unlocked {
        unlocked_by: String,
        reason: String,
        expires_at: DateTime<Utc>,
    },
    Relocked {
        relocked_at: DateTime<Utc>,
    },
    /// Expired unlock observed and re-engaged on read
    Expired {
        expired_at: DateTime<Utc>,
    },
}
