// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::execution::TokenCounts;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Input handed to an agent for one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub agent_ref: String,
    pub input: serde_json::Map<String, serde_json::Value>,
    /// Correlation id of the chain execution
    pub execution_id: String,
    pub step: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationOutput {
    pub output: serde_json::Value,
    pub cost: f64,
    pub duration_ms: u64,
    #[serde(default)]
    pub tokens: TokenCounts,
}

#[derive(Debug, Error)]
pub enum InvokerError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
    #[error("Agent call failed: {0}")]
    CallFailed(String),
    #[error("Agent call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid agent response: {0}")]
    InvalidResponse(String),
}

/// Transport to the agents bound to chain steps
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: InvocationRequest, timeout: Duration) -> Result<InvocationOutput, InvokerError>;
}
