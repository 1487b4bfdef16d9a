// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application error taxonomy.
//!
//! `Blocked` and `LockViolation` are deliberate safety outcomes and carry the
//! matched rules / lock reason so callers can act on them.

use crate::domain::chain::ChainError;
use crate::domain::environment_lock::LockError;
use crate::domain::execution::ExecutionError;
use crate::domain::lesson::LessonError;
use crate::domain::policy::PolicyError;
use crate::domain::promotion::PromotionError;
use crate::domain::repository::RepositoryError;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Blocked,
    UpstreamFailure,
    LockViolation,
    InvalidTransition,
    DegradedMode,
    InvalidRequest,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Blocked => "blocked",
            Self::UpstreamFailure => "upstream_failure",
            Self::LockViolation => "lock_violation",
            Self::InvalidTransition => "invalid_transition",
            Self::DegradedMode => "degraded_mode",
            Self::InvalidRequest => "invalid_request",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    #[error("{0}")]
    NotFound(String),

    #[error("Blocked: {message}")]
    Blocked { message: String, details: Value },

    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("Lock violation: {message}")]
    LockViolation { message: String, details: Option<Value> },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Degraded mode: {0}")]
    DegradedMode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AtlasError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Blocked { .. } => ErrorKind::Blocked,
            Self::UpstreamFailure(_) => ErrorKind::UpstreamFailure,
            Self::LockViolation { .. } => ErrorKind::LockViolation,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::DegradedMode(_) => ErrorKind::DegradedMode,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Blocked { details, .. } => Some(details.clone()),
            Self::LockViolation { details, .. } => details.clone(),
            _ => None,
        }
    }

    pub fn lock_violation(message: impl Into<String>) -> Self {
        Self::LockViolation {
            message: message.into(),
            details: None,
        }
    }
}

impl From<RepositoryError> for AtlasError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => AtlasError::NotFound(what),
            other => AtlasError::Internal(other.to_string()),
        }
    }
}

impl From<ExecutionError> for AtlasError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::StepOutOfRange(_) => AtlasError::Internal(err.to_string()),
            other => AtlasError::InvalidTransition(other.to_string()),
        }
    }
}

impl From<PromotionError> for AtlasError {
    fn from(err: PromotionError) -> Self {
        match err {
            PromotionError::InvalidTransition { .. } => AtlasError::InvalidTransition(err.to_string()),
            other => AtlasError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<LockError> for AtlasError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Engaged(reason) => AtlasError::lock_violation(reason),
            other => AtlasError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<ChainError> for AtlasError {
    fn from(err: ChainError) -> Self {
        AtlasError::InvalidRequest(err.to_string())
    }
}

impl From<PolicyError> for AtlasError {
    fn from(err: PolicyError) -> Self {
        AtlasError::InvalidRequest(err.to_string())
    }
}

impl From<LessonError> for AtlasError {
    fn from(err: LessonError) -> Self {
        AtlasError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::ExecutionStatus;

    #[test]
    fn test_repository_not_found_maps_to_not_found() {
        let err: AtlasError = RepositoryError::NotFound("execution x".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err: AtlasError = RepositoryError::Database("down".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_lock_errors() {
        let err: AtlasError = LockError::Engaged("environment locked".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::LockViolation);
        assert_eq!(err.kind().as_str(), "lock_violation");
        let err: AtlasError = LockError::DurationTooLong { requested: 200, max: 120 }.into();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_execution_transition() {
        let err: AtlasError = ExecutionError::InvalidTransition {
            from: ExecutionStatus::Completed,
            action: "cancel",
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert!(err.to_string().contains("completed"));
    }
}
