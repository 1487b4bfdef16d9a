// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Promotion Gate
//!
//! Moves schema, data or workflow items from one environment to another:
//! backup → diff → (approval) → apply → verify.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Collaborators:** `PromotionRepository`, `BackupService`,
//!   `EnvironmentGateway`, `EnvironmentLockService`, `GuardService`, `EventBus`
//!
//! # Failure handling
//!
//! Collaborator failures (backup, listing, applying) end the run in `failed`
//! with a reason and the run is returned normally. The two safety gates are
//! surfaced as errors as well as recorded on the run:
//! - the environment lock, re-checked right before `applying` starts
//!   ([`AtlasError::LockViolation`]);
//! - the guard, consulted once for the promotion as a whole
//!   ([`AtlasError::Blocked`]).
//!
//! A run that failed mid-apply records which items were applied. Starting a
//! new run diffs afresh, so the retry only applies what is still missing.

use crate::application::environment_lock::EnvironmentLockService;
use crate::application::error::AtlasError;
use crate::application::guard::GuardService;
use crate::domain::events::PromotionEvent;
use crate::domain::guard::GuardContext;
use crate::domain::promotion::{
    compute_drift, BackupService, DriftReport, EnvironmentGateway, GatewayError, PromotionId, PromotionRequest,
    PromotionRun, PromotionStatus,
};
use crate::domain::repository::PromotionRepository;
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Guard domain for promotion checks
pub const PROMOTION_DOMAIN: &str = "promotion";

#[derive(Debug, Clone)]
pub struct PromotionSettings {
    pub backup_timeout: Duration,
    /// Default for requests that do not say
    pub require_approval: bool,
}

impl Default for PromotionSettings {
    fn default() -> Self {
        Self {
            backup_timeout: Duration::from_secs(600),
            require_approval: false,
        }
    }
}

#[async_trait]
pub trait PromotionGate: Send + Sync {
    async fn start(&self, request: PromotionRequest) -> Result<PromotionRun, AtlasError>;

    /// Continue a run parked in `awaiting_approval`
    async fn approve(&self, id: PromotionId, approved_by: &str) -> Result<PromotionRun, AtlasError>;

    async fn get(&self, id: PromotionId) -> Result<PromotionRun, AtlasError>;

    async fn list(&self, limit: usize) -> Result<Vec<PromotionRun>, AtlasError>;
}

pub struct StandardPromotionGate {
    runs: Arc<dyn PromotionRepository>,
    backup: Arc<dyn BackupService>,
    gateway: Arc<dyn EnvironmentGateway>,
    lock: Arc<EnvironmentLockService>,
    guard: Option<Arc<dyn GuardService>>,
    event_bus: Arc<EventBus>,
    settings: PromotionSettings,
    leases: DashMap<PromotionId, Arc<Mutex<()>>>,
}

impl StandardPromotionGate {
    pub fn new(
        runs: Arc<dyn PromotionRepository>,
        backup: Arc<dyn BackupService>,
        gateway: Arc<dyn EnvironmentGateway>,
        lock: Arc<EnvironmentLockService>,
        guard: Option<Arc<dyn GuardService>>,
        event_bus: Arc<EventBus>,
        settings: PromotionSettings,
    ) -> Self {
        Self {
            runs,
            backup,
            gateway,
            lock,
            guard,
            event_bus,
            settings,
            leases: DashMap::new(),
        }
    }

    fn lease(&self, id: PromotionId) -> Arc<Mutex<()>> {
        self.leases.entry(id).or_default().clone()
    }

    /// Drop the lease entry unless another caller is waiting on it. Called by
    /// the holder after its last write.
    fn release_lease(&self, id: PromotionId) {
        self.leases.remove_if(&id, |_, lease| Arc::strong_count(lease) <= 2);
    }

    async fn start_locked(&self, mut run: PromotionRun) -> Result<PromotionRun, AtlasError> {
        self.runs.save(&run).await?;
        info!(
            promotion_id = %run.id,
            target = %run.target,
            source = %run.source_env,
            dest = %run.dest_env,
            "Promotion started"
        );
        self.event_bus.publish_promotion_event(PromotionEvent::PromotionStarted {
            promotion_id: run.id,
            source_env: run.source_env.clone(),
            dest_env: run.dest_env.clone(),
            started_at: Utc::now(),
        });

        if let Err(e) = self.check_guard(&run).await {
            let reason = match &e {
                AtlasError::Blocked { message, .. } => format!("blocked by guard: {}", message),
                other => other.to_string(),
            };
            self.fail_run(&mut run, reason).await?;
            return Err(e);
        }

        run.begin_backup()?;
        self.save_stage(&run).await?;
        // The destination is what the apply stage mutates
        let backup_id = match self.backup.snapshot(&run.dest_env, self.settings.backup_timeout).await {
            Ok(id) => id,
            Err(e) => {
                self.fail_run(&mut run, format!("backup failed: {}", e)).await?;
                return Ok(run);
            }
        };
        run.backup_taken(backup_id)?;
        self.save_stage(&run).await?;

        let drift = match self.diff(&run).await {
            Ok(drift) => drift,
            Err(e) => {
                self.fail_run(&mut run, format!("diff failed: {}", e)).await?;
                return Ok(run);
            }
        };
        run.record_drift(drift)?;
        if run.status == PromotionStatus::AwaitingApproval {
            self.save_stage(&run).await?;
            info!(promotion_id = %run.id, "Promotion awaiting approval");
            return Ok(run);
        }
        self.runs.save(&run).await?;

        self.apply_and_verify(&mut run).await.map(|_| run)
    }

    async fn load(&self, id: PromotionId) -> Result<PromotionRun, AtlasError> {
        self.runs
            .find_by_id(id)
            .await?
            .ok_or_else(|| AtlasError::NotFound(format!("promotion {} not found", id)))
    }

    /// Persist and announce a status change
    async fn save_stage(&self, run: &PromotionRun) -> Result<(), AtlasError> {
        self.runs.save(run).await?;
        self.event_bus.publish_promotion_event(PromotionEvent::StageChanged {
            promotion_id: run.id,
            status: run.status,
            changed_at: Utc::now(),
        });
        Ok(())
    }

    async fn fail_run(&self, run: &mut PromotionRun, reason: String) -> Result<(), AtlasError> {
        warn!(promotion_id = %run.id, status = %run.status, reason = %reason, "Promotion failed");
        run.fail(reason.clone())?;
        self.runs.save(run).await?;
        metrics::counter!("atlas_promotions_total", "status" => "failed").increment(1);
        self.event_bus.publish_promotion_event(PromotionEvent::PromotionFailed {
            promotion_id: run.id,
            reason,
            failed_at: Utc::now(),
        });
        Ok(())
    }

    async fn diff(&self, run: &PromotionRun) -> Result<DriftReport, GatewayError> {
        let (source, dest) = tokio::try_join!(
            self.gateway.list_items(&run.source_env, run.target),
            self.gateway.list_items(&run.dest_env, run.target),
        )?;
        Ok(compute_drift(&source, &dest))
    }

    async fn check_guard(&self, run: &PromotionRun) -> Result<(), AtlasError> {
        let Some(guard) = &self.guard else {
            return Ok(());
        };
        let action = format!("promote {} from {} to {}", run.target, run.source_env, run.dest_env);
        let context = GuardContext::new(PROMOTION_DOMAIN, run.initiated_by.clone());
        let result = guard.check(&action, &context).await;
        if !result.blocked {
            return Ok(());
        }
        Err(AtlasError::Blocked {
            message: result.reason(),
            details: json!({
                "promotion_id": run.id,
                "matched_rules": result.matched_rules.iter().map(|r| r.id).collect::<Vec<_>>(),
                "alternatives": result.alternatives,
                "warnings": result.warnings,
            }),
        })
    }

    /// Lock check, apply and verify
    async fn apply_and_verify(&self, run: &mut PromotionRun) -> Result<(), AtlasError> {
        if let Err(e) = self.lock.check_for_apply().await {
            let message = match &e {
                AtlasError::LockViolation { message, .. } => message.clone(),
                other => format!("environment lock state unavailable: {}", other),
            };
            self.fail_run(run, message.clone()).await?;
            return Err(match e {
                AtlasError::LockViolation { .. } => AtlasError::LockViolation {
                    message,
                    details: Some(json!({ "promotion_id": run.id, "status": run.status })),
                },
                other => other,
            });
        }

        run.begin_apply()?;
        self.save_stage(run).await?;

        for item in run.pending_items() {
            match self
                .gateway
                .apply_item(&run.source_env, &run.dest_env, run.target, &item)
                .await
            {
                Ok(()) => {
                    run.record_applied(item.clone());
                    self.runs.save(run).await?;
                    self.event_bus.publish_promotion_event(PromotionEvent::ItemApplied {
                        promotion_id: run.id,
                        item,
                        applied_at: Utc::now(),
                    });
                }
                Err(e) => {
                    run.fail_item(item, e)?;
                    self.runs.save(run).await?;
                    metrics::counter!("atlas_promotions_total", "status" => "failed").increment(1);
                    self.event_bus.publish_promotion_event(PromotionEvent::PromotionFailed {
                        promotion_id: run.id,
                        reason: run.failure_reason.clone().unwrap_or_default(),
                        failed_at: Utc::now(),
                    });
                    return Ok(());
                }
            }
        }

        run.begin_verify()?;
        self.save_stage(run).await?;

        let drift = match self.diff(run).await {
            Ok(drift) => drift,
            Err(e) => return self.fail_run(run, format!("verification failed: {}", e)).await,
        };
        if !drift.missing_in_destination.is_empty() {
            let reason = format!(
                "verification found {} item(s) still missing in {}: [{}]",
                drift.missing_in_destination.len(),
                run.dest_env,
                drift.missing_in_destination.join(", ")
            );
            return self.fail_run(run, reason).await;
        }

        run.complete()?;
        self.runs.save(run).await?;
        info!(
            promotion_id = %run.id,
            applied = run.applied_items.len(),
            "Promotion completed"
        );
        metrics::counter!("atlas_promotions_total", "status" => "completed").increment(1);
        self.event_bus.publish_promotion_event(PromotionEvent::PromotionCompleted {
            promotion_id: run.id,
            applied_items: run.applied_items.len(),
            completed_at: Utc::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl PromotionGate for StandardPromotionGate {
    async fn start(&self, request: PromotionRequest) -> Result<PromotionRun, AtlasError> {
        let run = PromotionRun::new(
            request.target,
            request.source_env,
            request.dest_env,
            request.initiated_by,
            request.require_approval.unwrap_or(self.settings.require_approval),
        )?;
        let id = run.id;
        let lease = self.lease(id);
        let _guard = lease.lock().await;
        let result = self.start_locked(run).await;
        self.release_lease(id);
        result
    }

    async fn approve(&self, id: PromotionId, approved_by: &str) -> Result<PromotionRun, AtlasError> {
        let lease = self.lease(id);
        let _guard = lease.lock().await;

        let result = async {
            let mut run = self.load(id).await?;
            run.approve(approved_by)?;
            self.runs.save(&run).await?;
            info!(promotion_id = %id, approved_by = %approved_by, "Promotion approved");
            self.apply_and_verify(&mut run).await.map(|_| run)
        }
        .await;
        self.release_lease(id);
        result
    }

    async fn get(&self, id: PromotionId) -> Result<PromotionRun, AtlasError> {
        self.load(id).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<PromotionRun>, AtlasError> {
        Ok(self.runs.list_recent(limit).await?)
    }
}
