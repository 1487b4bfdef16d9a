// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Promotion
//!
//! Controlled movement of schema, data or workflow state between
//! environments. A run walks `backup → diff → apply → verify`; a failure at
//! any stage is terminal and must be retried as a new run.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** PromotionRun state machine, drift computation, collaborator traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromotionId(pub Uuid);

impl PromotionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(value).map(Self)
    }
}

impl Default for PromotionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PromotionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionTarget {
    Schema,
    Data,
    Workflow,
}

impl PromotionTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Data => "data",
            Self::Workflow => "workflow",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "schema" => Some(Self::Schema),
            "data" => Some(Self::Data),
            "workflow" => Some(Self::Workflow),
            _ => None,
        }
    }
}

impl std::fmt::Display for PromotionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    Created,
    BackingUp,
    Diffing,
    AwaitingApproval,
    Applying,
    Verifying,
    Completed,
    Failed,
}

impl PromotionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::BackingUp => "backing_up",
            Self::Diffing => "diffing",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Applying => "applying",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "backing_up" => Some(Self::BackingUp),
            "diffing" => Some(Self::Diffing),
            "awaiting_approval" => Some(Self::AwaitingApproval),
            "applying" => Some(Self::Applying),
            "verifying" => Some(Self::Verifying),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    fn can_transition_to(&self, next: PromotionStatus) -> bool {
        use PromotionStatus::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Created, BackingUp)
            | (BackingUp, Diffing)
            | (Diffing, AwaitingApproval)
            | (Diffing, Applying)
            | (AwaitingApproval, Applying)
            | (Applying, Verifying)
            | (Verifying, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PromotionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStage {
    Backup,
    Diff,
    Apply,
    Verify,
}

impl PromotionStage {
    pub const ALL: [PromotionStage; 4] = [Self::Backup, Self::Diff, Self::Apply, Self::Verify];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Diff => "diff",
            Self::Apply => "apply",
            Self::Verify => "verify",
        }
    }

    fn for_status(status: PromotionStatus) -> Option<Self> {
        match status {
            PromotionStatus::BackingUp => Some(Self::Backup),
            PromotionStatus::Diffing | PromotionStatus::AwaitingApproval => Some(Self::Diff),
            PromotionStatus::Applying => Some(Self::Apply),
            PromotionStatus::Verifying => Some(Self::Verify),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub detail: Option<String>,
}

// ============================================================================
// Drift
// ============================================================================

/// Named unit of environment state with a content fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentItem {
    pub name: String,
    pub fingerprint: String,
}

impl EnvironmentItem {
    pub fn new(name: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Absent from the destination or different there; candidates for apply
    pub missing_in_destination: Vec<String>,
    /// Present only in the destination; surfaced as warnings
    pub extra_in_destination: Vec<String>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.missing_in_destination.is_empty()
    }

    pub fn warnings(&self, dest_env: &str) -> Vec<String> {
        self.extra_in_destination
            .iter()
            .map(|name| format!("{} has extra item '{}' not present in source", dest_env, name))
            .collect()
    }
}

/// Compare environments by item name and fingerprint. Output is sorted by name.
pub fn compute_drift(source: &[EnvironmentItem], destination: &[EnvironmentItem]) -> DriftReport {
    let dest: BTreeMap<&str, &str> = destination
        .iter()
        .map(|i| (i.name.as_str(), i.fingerprint.as_str()))
        .collect();
    let src: BTreeMap<&str, &str> = source
        .iter()
        .map(|i| (i.name.as_str(), i.fingerprint.as_str()))
        .collect();

    let missing_in_destination = src
        .iter()
        .filter(|(name, fingerprint)| dest.get(*name) != Some(*fingerprint))
        .map(|(name, _)| name.to_string())
        .collect();
    let extra_in_destination = dest
        .keys()
        .filter(|name| !src.contains_key(*name))
        .map(|name| name.to_string())
        .collect();

    DriftReport {
        missing_in_destination,
        extra_in_destination,
    }
}

// ============================================================================
// Aggregate: PromotionRun
// ============================================================================

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("Promotion cannot move from {from} to {to}")]
    InvalidTransition {
        from: PromotionStatus,
        to: PromotionStatus,
    },

    #[error("Source and destination environments must differ")]
    SameEnvironment,

    #[error("Environment name cannot be empty")]
    EmptyEnvironment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub target: PromotionTarget,
    pub source_env: String,
    pub dest_env: String,
    #[serde(default)]
    pub initiated_by: String,
    /// Overrides the configured default when set
    #[serde(default)]
    pub require_approval: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRun {
    pub id: PromotionId,
    pub target: PromotionTarget,
    pub source_env: String,
    pub dest_env: String,
    pub status: PromotionStatus,
    pub stages: BTreeMap<PromotionStage, StageRecord>,
    pub backup_id: Option<String>,
    pub drift: Option<DriftReport>,
    /// Items applied in order, up to any failure
    pub applied_items: Vec<String>,
    pub failed_item: Option<String>,
    pub warnings: Vec<String>,
    pub failure_reason: Option<String>,
    pub initiated_by: String,
    pub require_approval: bool,
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PromotionRun {
    pub fn new(
        target: PromotionTarget,
        source_env: impl Into<String>,
        dest_env: impl Into<String>,
        initiated_by: impl Into<String>,
        require_approval: bool,
    ) -> Result<Self, PromotionError> {
        let source_env = source_env.into();
        let dest_env = dest_env.into();
        if source_env.trim().is_empty() || dest_env.trim().is_empty() {
            return Err(PromotionError::EmptyEnvironment);
        }
        if source_env == dest_env {
            return Err(PromotionError::SameEnvironment);
        }
        let now = Utc::now();
        Ok(Self {
            id: PromotionId::new(),
            target,
            source_env,
            dest_env,
            status: PromotionStatus::Created,
            stages: PromotionStage::ALL
                .iter()
                .map(|s| (*s, StageRecord::default()))
                .collect(),
            backup_id: None,
            drift: None,
            applied_items: Vec::new(),
            failed_item: None,
            warnings: Vec::new(),
            failure_reason: None,
            initiated_by: initiated_by.into(),
            require_approval,
            approved_by: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub fn stage(&self, stage: PromotionStage) -> Option<&StageRecord> {
        self.stages.get(&stage)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: PromotionStatus) -> Result<(), PromotionError> {
        if !self.status.can_transition_to(next) {
            return Err(PromotionError::InvalidTransition { from: self.status, to: next });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn stage_mut(&mut self, stage: PromotionStage) -> &mut StageRecord {
        self.stages.entry(stage).or_default()
    }

    fn start_stage(&mut self, stage: PromotionStage) {
        let record = self.stage_mut(stage);
        record.status = StageStatus::Running;
        record.started_at = Some(Utc::now());
    }

    fn finish_stage(&mut self, stage: PromotionStage, detail: Option<String>) {
        let record = self.stage_mut(stage);
        record.status = StageStatus::Completed;
        record.completed_at = Some(Utc::now());
        record.detail = detail;
    }

    pub fn begin_backup(&mut self) -> Result<(), PromotionError> {
        self.transition(PromotionStatus::BackingUp)?;
        self.start_stage(PromotionStage::Backup);
        Ok(())
    }

    pub fn backup_taken(&mut self, backup_id: impl Into<String>) -> Result<(), PromotionError> {
        let backup_id = backup_id.into();
        self.transition(PromotionStatus::Diffing)?;
        self.finish_stage(PromotionStage::Backup, Some(format!("backup {}", backup_id)));
        self.backup_id = Some(backup_id);
        self.start_stage(PromotionStage::Diff);
        Ok(())
    }

    /// Store the drift and surface destination-only items as warnings.
    pub fn record_drift(&mut self, drift: DriftReport) -> Result<(), PromotionError> {
        if self.status != PromotionStatus::Diffing {
            return Err(PromotionError::InvalidTransition {
                from: self.status,
                to: PromotionStatus::Diffing,
            });
        }
        self.warnings.extend(drift.warnings(&self.dest_env));
        let detail = format!(
            "{} missing, {} extra",
            drift.missing_in_destination.len(),
            drift.extra_in_destination.len()
        );
        self.finish_stage(PromotionStage::Diff, Some(detail));
        self.drift = Some(drift);
        if self.require_approval {
            self.transition(PromotionStatus::AwaitingApproval)?;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn approve(&mut self, approved_by: impl Into<String>) -> Result<(), PromotionError> {
        if self.status != PromotionStatus::AwaitingApproval {
            return Err(PromotionError::InvalidTransition {
                from: self.status,
                to: PromotionStatus::Applying,
            });
        }
        self.approved_by = Some(approved_by.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Ready to apply: diffed without approval gate, or approved
    pub fn ready_to_apply(&self) -> bool {
        match self.status {
            PromotionStatus::Diffing => self.drift.is_some() && !self.require_approval,
            PromotionStatus::AwaitingApproval => self.approved_by.is_some(),
            _ => false,
        }
    }

    pub fn begin_apply(&mut self) -> Result<(), PromotionError> {
        if !self.ready_to_apply() {
            return Err(PromotionError::InvalidTransition {
                from: self.status,
                to: PromotionStatus::Applying,
            });
        }
        self.transition(PromotionStatus::Applying)?;
        self.start_stage(PromotionStage::Apply);
        Ok(())
    }

    /// Items the apply stage must process, in order
    pub fn pending_items(&self) -> Vec<String> {
        self.drift
            .as_ref()
            .map(|d| {
                d.missing_in_destination
                    .iter()
                    .filter(|i| !self.applied_items.contains(i))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn record_applied(&mut self, item: impl Into<String>) {
        self.applied_items.push(item.into());
        self.updated_at = Utc::now();
    }

    pub fn begin_verify(&mut self) -> Result<(), PromotionError> {
        self.transition(PromotionStatus::Verifying)?;
        let detail = format!("{} items applied", self.applied_items.len());
        self.finish_stage(PromotionStage::Apply, Some(detail));
        self.start_stage(PromotionStage::Verify);
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), PromotionError> {
        self.transition(PromotionStatus::Completed)?;
        self.finish_stage(PromotionStage::Verify, Some("destination matches source".to_string()));
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Fail the run at its current stage
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), PromotionError> {
        let reason = reason.into();
        let stage = PromotionStage::for_status(self.status);
        self.transition(PromotionStatus::Failed)?;
        if let Some(stage) = stage {
            let record = self.stage_mut(stage);
            record.status = StageStatus::Failed;
            record.completed_at = Some(Utc::now());
            record.error = Some(reason.clone());
        }
        self.failure_reason = Some(reason);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail_item(&mut self, item: impl Into<String>, error: impl std::fmt::Display) -> Result<(), PromotionError> {
        let item = item.into();
        let reason = format!(
            "applying '{}' failed after {} applied item(s) [{}]: {}",
            item,
            self.applied_items.len(),
            self.applied_items.join(", "),
            error
        );
        self.failed_item = Some(item);
        self.fail(reason)
    }
}

// ============================================================================
// Collaborators
// ============================================================================

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Backup command failed: {0}")]
    Failed(String),

    #[error("Backup timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backup produced no id")]
    NoBackupId,
}

#[async_trait]
pub trait BackupService: Send + Sync {
    /// Snapshot `target` and return the backup id
    async fn snapshot(&self, target: &str, timeout: Duration) -> Result<String, BackupError>;
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error("Item '{0}' not found")]
    ItemNotFound(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Read and mutate environment state
#[async_trait]
pub trait EnvironmentGateway: Send + Sync {
    async fn list_items(&self, env: &str, target: PromotionTarget) -> Result<Vec<EnvironmentItem>, GatewayError>;

    async fn apply_item(
        &self,
        source_env: &str,
        dest_env: &str,
        target: PromotionTarget,
        item: &str,
    ) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(list: &[(&str, &str)]) -> Vec<EnvironmentItem> {
        list.iter().map(|(n, f)| EnvironmentItem::new(*n, *f)).collect()
    }

    #[test]
    fn test_compute_drift() {
        let source = items(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let dest = items(&[("a", "1"), ("b", "changed"), ("z", "9")]);
        let drift = compute_drift(&source, &dest);
        assert_eq!(drift.missing_in_destination, vec!["b", "c"]);
        assert_eq!(drift.extra_in_destination, vec!["z"]);
        assert!(!drift.is_clean());
        assert_eq!(drift.warnings("prod").len(), 1);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = PromotionRun::new(PromotionTarget::Schema, "dev", "prod", "ops", false).unwrap();
        run.begin_backup().unwrap();
        run.backup_taken("bk-1").unwrap();
        run.record_drift(DriftReport {
            missing_in_destination: vec!["x".into()],
            extra_in_destination: vec![],
        })
        .unwrap();
        assert!(run.ready_to_apply());
        run.begin_apply().unwrap();
        assert_eq!(run.pending_items(), vec!["x"]);
        run.record_applied("x");
        assert!(run.pending_items().is_empty());
        run.begin_verify().unwrap();
        run.complete().unwrap();
        assert_eq!(run.status, PromotionStatus::Completed);
        assert!(run
            .stages
            .values()
            .all(|s| s.status == StageStatus::Completed));
    }

    #[test]
    fn test_approval_gate() {
        let mut run = PromotionRun::new(PromotionTarget::Workflow, "dev", "prod", "ops", true).unwrap();
        run.begin_backup().unwrap();
        run.backup_taken("bk").unwrap();
        run.record_drift(DriftReport::default()).unwrap();
        assert_eq!(run.status, PromotionStatus::AwaitingApproval);
        assert!(run.begin_apply().is_err());
        run.approve("lead").unwrap();
        run.begin_apply().unwrap();
        assert_eq!(run.status, PromotionStatus::Applying);
    }

    #[test]
    fn test_failure_is_terminal_and_recorded_on_stage() {
        let mut run = PromotionRun::new(PromotionTarget::Schema, "dev", "prod", "ops", false).unwrap();
        run.begin_backup().unwrap();
        run.fail("disk full").unwrap();
        assert_eq!(run.status, PromotionStatus::Failed);
        let backup = run.stage(PromotionStage::Backup).unwrap();
        assert_eq!(backup.status, StageStatus::Failed);
        assert_eq!(backup.error.as_deref(), Some("disk full"));
        assert!(run.fail("again").is_err());
        assert!(run.begin_apply().is_err());
    }

    #[test]
    fn test_same_environment_rejected() {
        assert!(matches!(
            PromotionRun::new(PromotionTarget::Data, "prod", "prod", "ops", false),
            Err(PromotionError::SameEnvironment)
        ));
    }
}
