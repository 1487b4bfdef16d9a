// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Chain Execution Aggregate
//!
//! One run of a [`Chain`]. The execution owns a snapshot of the chain it was
//! started from plus an append-only list of [`StepResult`]s, one per step
//! reached, at position `step_index`.
//!
//! ## State machine
//!
//! ```text
//! pending -> running -> { completed | failed | cancelled }
//!            running -> paused -> running   (approval steps only)
//! ```
//!
//! Step statuses only move forward: `pending -> running -> {completed|failed}`
//! or `pending -> {blocked|failed}`. A final step status is never rewritten.

use crate::domain::chain::{Chain, StepDefinition};
use crate::domain::guard::GuardDecision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(value).map(Self)
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Blocked,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Blocked | Self::Completed | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Blocked | Self::Completed | Self::Failed => 2,
        }
    }

    /// Forward-only transition check. `running -> blocked` covers a step
    /// re-dispatched after a crash that the guard now denies.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Token usage reported by an agent call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

impl AddAssign for TokenCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.input += rhs.input;
        self.output += rhs.output;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub step_name: String,
    pub agent_ref: String,
    pub status: StepStatus,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    pub cost: f64,
    #[serde(default)]
    pub tokens: TokenCounts,
    /// Populated only for sensitive steps
    pub guard_decision: Option<GuardDecision>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepResult {
    fn pending(index: usize, step: &StepDefinition) -> Self {
        Self {
            step_index: index,
            step_name: step.name.clone(),
            agent_ref: step.agent_ref.clone(),
            status: StepStatus::Pending,
            input: None,
            output: None,
            error: None,
            warnings: Vec::new(),
            duration_ms: 0,
            cost: 0.0,
            tokens: TokenCounts::default(),
            guard_decision: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn transition(&mut self, next: StepStatus) -> Result<(), ExecutionError> {
        if !self.status.can_transition_to(next) {
            return Err(ExecutionError::StepTransition {
                step: self.step_name.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_final() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Manual approval recorded for a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepApproval {
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
}

/// Successful agent call folded into the execution
#[derive(Debug, Clone)]
pub struct StepCompletion {
    pub output: serde_json::Value,
    pub cost: f64,
    pub duration_ms: u64,
    pub tokens: TokenCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainExecution {
    pub id: ExecutionId,
    pub chain_name: String,
    /// Copy of the template taken at start
    pub chain: Chain,
    pub status: ExecutionStatus,
    pub current_step_index: usize,
    step_results: Vec<StepResult>,
    pub input: serde_json::Value,
    pub total_cost: f64,
    pub total_duration_ms: u64,
    pub total_tokens: TokenCounts,
    pub triggered_by: String,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub approvals: BTreeMap<usize, StepApproval>,
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Cannot {action} execution in status '{from}'")]
    InvalidTransition {
        from: ExecutionStatus,
        action: &'static str,
    },

    #[error("Step '{step}' cannot move from {} to {}", .from.as_str(), .to.as_str())]
    StepTransition {
        step: String,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("No step at index {0}")]
    StepOutOfRange(usize),
}

impl ChainExecution {
    pub fn new(chain: Chain, input: serde_json::Value, triggered_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ExecutionId::new(),
            chain_name: chain.name.clone(),
            chain,
            status: ExecutionStatus::Pending,
            current_step_index: 0,
            step_results: Vec::new(),
            input,
            total_cost: 0.0,
            total_duration_ms: 0,
            total_tokens: TokenCounts::default(),
            triggered_by: triggered_by.into(),
            failure_reason: None,
            approvals: BTreeMap::new(),
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Rebuild from persisted parts
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ExecutionId,
        chain: Chain,
        status: ExecutionStatus,
        current_step_index: usize,
        step_results: Vec<StepResult>,
        input: serde_json::Value,
        triggered_by: String,
        failure_reason: Option<String>,
        approvals: BTreeMap<usize, StepApproval>,
        cancel_requested: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        let mut execution = Self {
            id,
            chain_name: chain.name.clone(),
            chain,
            status,
            current_step_index,
            step_results,
            input,
            total_cost: 0.0,
            total_duration_ms: 0,
            total_tokens: TokenCounts::default(),
            triggered_by,
            failure_reason,
            approvals,
            cancel_requested,
            created_at,
            updated_at,
            completed_at,
        };
        execution.recompute_totals();
        execution
    }

    fn recompute_totals(&mut self) {
        self.total_cost = 0.0;
        self.total_duration_ms = 0;
        self.total_tokens = TokenCounts::default();
        for result in self.step_results.iter().filter(|r| r.status == StepStatus::Completed) {
            self.total_cost += result.cost;
            self.total_duration_ms += result.duration_ms;
            self.total_tokens += result.tokens;
        }
    }

    pub fn step_results(&self) -> &[StepResult] {
        &self.step_results
    }

    pub fn current_step(&self) -> Option<&StepDefinition> {
        self.chain.step(self.current_step_index)
    }

    pub fn current_result(&self) -> Option<&StepResult> {
        self.step_results.get(self.current_step_index)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Outputs of completed steps keyed by step name
    pub fn step_outputs(&self) -> serde_json::Map<String, serde_json::Value> {
        self.step_results
            .iter()
            .filter_map(|r| r.output.clone().map(|o| (r.step_name.clone(), o)))
            .collect()
    }

    /// Output of the most recent completed step
    pub fn previous_output(&self) -> Option<&serde_json::Value> {
        self.step_results
            .iter()
            .rev()
            .find(|r| r.status == StepStatus::Completed)
            .and_then(|r| r.output.as_ref())
    }

    pub fn start(&mut self) -> Result<(), ExecutionError> {
        self.require(ExecutionStatus::Pending, "start")?;
        self.status = ExecutionStatus::Running;
        self.touch();
        Ok(())
    }

    /// The current step needs a manual approval that has not been given
    pub fn awaiting_approval(&self) -> bool {
        self.current_step()
            .is_some_and(|s| s.requires_approval && !self.approvals.contains_key(&self.current_step_index))
    }

    pub fn pause_for_approval(&mut self) -> Result<(), ExecutionError> {
        self.require(ExecutionStatus::Running, "pause")?;
        if !self.awaiting_approval() {
            return Err(ExecutionError::InvalidTransition {
                from: self.status,
                action: "pause a step that needs no approval for",
            });
        }
        self.status = ExecutionStatus::Paused;
        self.touch();
        Ok(())
    }

    pub fn approve(&mut self, approved_by: impl Into<String>) -> Result<(), ExecutionError> {
        self.require(ExecutionStatus::Paused, "approve")?;
        self.approvals.insert(
            self.current_step_index,
            StepApproval {
                approved_by: approved_by.into(),
                approved_at: Utc::now(),
            },
        );
        self.status = ExecutionStatus::Running;
        self.touch();
        Ok(())
    }

    /// Ensure a result slot exists for the current step and return it
    fn current_slot(&mut self) -> Result<&mut StepResult, ExecutionError> {
        let index = self.current_step_index;
        let step = self
            .chain
            .step(index)
            .cloned()
            .ok_or(ExecutionError::StepOutOfRange(index))?;
        if self.step_results.len() == index {
            self.step_results.push(StepResult::pending(index, &step));
        }
        self.step_results
            .get_mut(index)
            .ok_or(ExecutionError::StepOutOfRange(index))
    }

    /// Mark the current step running. Returns `true` when the step was
    /// already running (an interrupted dispatch being resumed).
    pub fn begin_step(
        &mut self,
        input: serde_json::Value,
        guard_decision: Option<GuardDecision>,
    ) -> Result<bool, ExecutionError> {
        self.require(ExecutionStatus::Running, "advance")?;
        let slot = self.current_slot()?;
        if slot.status == StepStatus::Running {
            return Ok(true);
        }
        slot.transition(StepStatus::Running)?;
        slot.started_at = Utc::now();
        if let Some(decision) = &guard_decision {
            slot.warnings = decision.warnings.clone();
        }
        slot.guard_decision = guard_decision;
        slot.input = Some(input);
        self.touch();
        Ok(false)
    }

    /// Guard denied the current step; the chain fails without retry
    pub fn block_step(&mut self, decision: GuardDecision, reason: String) -> Result<(), ExecutionError> {
        self.require(ExecutionStatus::Running, "block")?;
        let slot = self.current_slot()?;
        slot.transition(StepStatus::Blocked)?;
        slot.error = Some(reason.clone());
        slot.guard_decision = Some(decision);
        self.finish(ExecutionStatus::Failed, Some(reason));
        Ok(())
    }

    pub fn complete_step(&mut self, completion: StepCompletion) -> Result<(), ExecutionError> {
        let slot = self.current_slot()?;
        slot.transition(StepStatus::Completed)?;
        slot.output = Some(completion.output);
        slot.cost = completion.cost;
        slot.duration_ms = completion.duration_ms;
        slot.tokens = completion.tokens;

        self.total_cost += completion.cost;
        self.total_duration_ms += completion.duration_ms;
        self.total_tokens += completion.tokens;
        self.current_step_index += 1;

        if self.current_step_index >= self.chain.len() {
            self.finish(ExecutionStatus::Completed, None);
        } else {
            self.touch();
        }
        Ok(())
    }

    /// The current step failed; the whole chain fails
    pub fn fail_step(&mut self, error: String, duration_ms: u64) -> Result<(), ExecutionError> {
        let step_name = self.current_step().map(|s| s.name.clone()).unwrap_or_default();
        let slot = self.current_slot()?;
        slot.transition(StepStatus::Failed)?;
        slot.error = Some(error.clone());
        slot.duration_ms = duration_ms;
        self.finish(
            ExecutionStatus::Failed,
            Some(format!("step '{}' failed: {}", step_name, error)),
        );
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), ExecutionError> {
        match self.status {
            ExecutionStatus::Pending | ExecutionStatus::Running | ExecutionStatus::Paused => {
                self.finish(ExecutionStatus::Cancelled, Some("cancelled by request".to_string()));
                Ok(())
            }
            from => Err(ExecutionError::InvalidTransition { from, action: "cancel" }),
        }
    }

    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
        self.touch();
    }

    fn finish(&mut self, status: ExecutionStatus, reason: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.failure_reason = reason;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    fn require(&self, expected: ExecutionStatus, action: &'static str) -> Result<(), ExecutionError> {
        if self.status != expected {
            return Err(ExecutionError::InvalidTransition { from: self.status, action });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
