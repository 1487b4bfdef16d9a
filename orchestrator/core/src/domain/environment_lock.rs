// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Environment lock
//!
//! Process-wide gate on production mutation. Defaults to locked; an unlock
//! is time-boxed and an expired unlock is treated as locked on every read.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on a single unlock window
pub const MAX_UNLOCK_MINUTES: i64 = 120;

#[derive(Debug, Error, PartialEq)]
pub enum LockError {
    #[error("Unlock duration must be positive")]
    NonPositiveDuration,

    #[error("Unlock duration of {requested} minutes exceeds the maximum of {max}")]
    DurationTooLong { requested: i64, max: i64 },

    #[error("Unlock reason cannot be empty")]
    MissingReason,

    #[error("Environment is locked: {0}")]
    Engaged(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentLock {
    pub locked: bool,
    pub unlock_expiry: Option<DateTime<Utc>>,
    pub unlock_reason: Option<String>,
    pub unlocked_by: Option<String>,
}

impl Default for EnvironmentLock {
    fn default() -> Self {
        Self::engaged()
    }
}

impl EnvironmentLock {
    pub fn engaged() -> Self {
        Self {
            locked: true,
            unlock_expiry: None,
            unlock_reason: None,
            unlocked_by: None,
        }
    }

    /// Locked, or unlocked past its expiry
    pub fn is_engaged_at(&self, now: DateTime<Utc>) -> bool {
        self.locked || self.unlock_expiry.is_none_or(|expiry| now > expiry)
    }

    /// Re-engage an unlock whose window has passed. Returns `true` when the
    /// state changed and must be persisted.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if !self.locked && self.is_engaged_at(now) {
            *self = Self::engaged();
            return true;
        }
        false
    }

    pub fn unlock(
        &mut self,
        minutes: i64,
        max_minutes: i64,
        reason: impl Into<String>,
        unlocked_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), LockError> {
        validate_duration(minutes, max_minutes)?;
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(LockError::MissingReason);
        }
        self.locked = false;
        self.unlock_expiry = Some(now + Duration::minutes(minutes));
        self.unlock_reason = Some(reason);
        self.unlocked_by = Some(unlocked_by.into());
        Ok(())
    }

    pub fn relock(&mut self) {
        *self = Self::engaged();
    }

    /// Fails with [`LockError::Engaged`] unless unlocked and unexpired at `now`
    pub fn ensure_unlocked(&self, now: DateTime<Utc>) -> Result<(), LockError> {
        if !self.is_engaged_at(now) {
            return Ok(());
        }
        let reason = match (self.locked, self.unlock_expiry) {
            (false, Some(expiry)) => format!("unlock window expired at {}", expiry.to_rfc3339()),
            _ => "environment locked".to_string(),
        };
        Err(LockError::Engaged(reason))
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_engaged_at(now) {
            return None;
        }
        self.unlock_expiry.map(|expiry| expiry - now)
    }
}

pub fn validate_duration(minutes: i64, max_minutes: i64) -> Result<(), LockError> {
    if minutes <= 0 {
        return Err(LockError::NonPositiveDuration);
    }
    let max = max_minutes.min(MAX_UNLOCK_MINUTES);
    if minutes > max {
        return Err(LockError::DurationTooLong { requested: minutes, max });
    }
    Ok(())
}
