// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Environment Lock Service
//!
//! Narrow interface over the lock store: read state, unlock, relock, and the
//! atomic pre-apply check. Every read re-engages an expired unlock and
//! persists that transition before answering.

use crate::application::error::AtlasError;
use crate::domain::environment_lock::{EnvironmentLock, LockError};
use crate::domain::events::LockEvent;
use crate::domain::repository::{EnvironmentLockStore, RepositoryError};
use crate::infrastructure::event_bus::EventBus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound on compare-and-swap retries under contention
const MAX_CAS_ATTEMPTS: usize = 16;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockStatus {
    pub locked: bool,
    pub unlock_expiry: Option<DateTime<Utc>>,
    pub unlock_reason: Option<String>,
    pub unlocked_by: Option<String>,
    pub remaining_seconds: Option<i64>,
}

impl LockStatus {
    fn from_lock(lock: &EnvironmentLock, now: DateTime<Utc>) -> Self {
        let engaged = lock.is_engaged_at(now);
        Self {
            locked: engaged,
            unlock_expiry: if engaged { None } else { lock.unlock_expiry },
            unlock_reason: if engaged { None } else { lock.unlock_reason.clone() },
            unlocked_by: if engaged { None } else { lock.unlocked_by.clone() },
            remaining_seconds: lock.remaining_at(now).map(|d| d.num_seconds()),
        }
    }
}

pub struct EnvironmentLockService {
    store: Arc<dyn EnvironmentLockStore>,
    clock: Arc<dyn Clock>,
    max_unlock_minutes: i64,
    event_bus: Arc<EventBus>,
}

impl EnvironmentLockService {
    pub fn new(
        store: Arc<dyn EnvironmentLockStore>,
        clock: Arc<dyn Clock>,
        max_unlock_minutes: i64,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            clock,
            max_unlock_minutes,
            event_bus,
        }
    }

    /// Load the state, persisting a lazy relock when the unlock has expired.
    /// Returns the state as of `now`.
    async fn observe(&self, now: DateTime<Utc>) -> Result<EnvironmentLock, RepositoryError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.store.load().await?;
            let mut next = current.clone();
            if !next.expire_if_due(now) {
                return Ok(current);
            }
            if self.store.compare_and_swap(&current, &next).await? {
                let expired_at = current.unlock_expiry.unwrap_or(now);
                info!(expired_at = %expired_at, "Unlock window expired, environment re-locked");
                metrics::counter!("atlas_lock_relocks_total").increment(1);
                self.event_bus.publish_lock_event(LockEvent::Expired { expired_at });
                return Ok(next);
            }
        }
        Err(RepositoryError::Conflict("environment lock under contention".to_string()))
    }

    pub async fn status(&self) -> Result<LockStatus, AtlasError> {
        let now = self.clock.now();
        let lock = self.observe(now).await?;
        Ok(LockStatus::from_lock(&lock, now))
    }

    pub async fn unlock(
        &self,
        duration_minutes: i64,
        reason: &str,
        unlocked_by: &str,
    ) -> Result<LockStatus, AtlasError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = self.clock.now();
            let current = self.observe(now).await?;
            let mut next = current.clone();
            next.unlock(duration_minutes, self.max_unlock_minutes, reason, unlocked_by, now)?;
            if self.store.compare_and_swap(&current, &next).await? {
                let expires_at = next.unlock_expiry.unwrap_or(now);
                warn!(
                    unlocked_by,
                    reason,
                    expires_at = %expires_at,
                    "Environment unlocked"
                );
                self.event_bus.publish_lock_event(LockEvent::Unlocked {
                    unlocked_by: unlocked_by.to_string(),
                    reason: reason.to_string(),
                    expires_at,
                });
                return Ok(LockStatus::from_lock(&next, now));
            }
        }
        Err(AtlasError::Internal("environment lock under contention".to_string()))
    }

    pub async fn relock(&self) -> Result<LockStatus, AtlasError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = self.clock.now();
            let current = self.store.load().await?;
            let mut next = current.clone();
            next.relock();
            if current == next || self.store.compare_and_swap(&current, &next).await? {
                info!("Environment locked");
                self.event_bus.publish_lock_event(LockEvent::Relocked { relocked_at: now });
                return Ok(LockStatus::from_lock(&next, now));
            }
        }
        Err(AtlasError::Internal("environment lock under contention".to_string()))
    }

    /// Single read-then-decide used at the top of a promotion's apply stage.
    /// Fails with `LockViolation` unless unlocked and unexpired right now.
    pub async fn check_for_apply(&self) -> Result<(), AtlasError> {
        let now = self.clock.now();
        let lock = self.observe(now).await?;
        lock.ensure_unlocked(now).map_err(|e| match e {
            LockError::Engaged(reason) => AtlasError::lock_violation(format!("environment locked: {}", reason)),
            other => AtlasError::from(other),
        })
    }
}
