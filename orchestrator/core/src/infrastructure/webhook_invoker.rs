// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Webhook Agent Invoker
//!
//! Calls agents over HTTP. Each `agent_ref` maps to an endpoint URL; the
//! step input is POSTed as JSON and the agent answers with
//! `{ "output": .., "cost": .., "tokens": { "input": .., "output": .. } }`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Anti-corruption layer between chain steps and agent services

use crate::domain::execution::TokenCounts;
use crate::domain::runtime::{AgentInvoker, InvocationOutput, InvocationRequest, InvokerError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Endpoint key used for agents without their own entry
pub const DEFAULT_ENDPOINT: &str = "*";

pub struct WebhookAgentInvoker {
    client: reqwest::Client,
    endpoints: HashMap<String, String>,
    max_timeout: Option<Duration>,
}

#[derive(Serialize)]
struct AgentCallBody<'a> {
    agent_ref: &'a str,
    execution_id: &'a str,
    step: &'a str,
    input: &'a serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct AgentCallResponse {
    #[serde(default)]
    output: serde_json::Value,
    #[serde(default)]
    cost: f64,
    #[serde(default)]
    tokens: TokenCounts,
    duration_ms: Option<u64>,
}

impl WebhookAgentInvoker {
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            max_timeout: None,
        }
    }

    /// Cap every call at `max`, whatever the step asks for
    pub fn with_max_timeout(mut self, max: Duration) -> Self {
        self.max_timeout = Some(max);
        self
    }

    fn endpoint_for(&self, agent_ref: &str) -> Option<&String> {
        self.endpoints
            .get(agent_ref)
            .or_else(|| self.endpoints.get(DEFAULT_ENDPOINT))
    }
}

#[async_trait]
impl AgentInvoker for WebhookAgentInvoker {
    async fn invoke(&self, request: InvocationRequest, timeout: Duration) -> Result<InvocationOutput, InvokerError> {
        let url = self
            .endpoint_for(&request.agent_ref)
            .ok_or_else(|| InvokerError::UnknownAgent(request.agent_ref.clone()))?;

        let timeout = self.max_timeout.map_or(timeout, |max| timeout.min(max));
        debug!(agent = %request.agent_ref, step = %request.step, url = %url, "Invoking agent");
        let started = Instant::now();

        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(&AgentCallBody {
                agent_ref: &request.agent_ref,
                execution_id: &request.execution_id,
                step: &request.step,
                input: &request.input,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InvokerError::Timeout(timeout)
                } else {
                    InvokerError::CallFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(if status == 404 {
                InvokerError::UnknownAgent(request.agent_ref)
            } else {
                InvokerError::CallFailed(format!("HTTP {}: {}", status, error_text))
            });
        }

        let body: AgentCallResponse = response
            .json()
            .await
            .map_err(|e| InvokerError::InvalidResponse(e.to_string()))?;

        Ok(InvocationOutput {
            output: body.output,
            cost: body.cost,
            duration_ms: body
                .duration_ms
                .unwrap_or_else(|| started.elapsed().as_millis() as u64),
            tokens: body.tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(agent: &str) -> InvocationRequest {
        let mut input = serde_json::Map::new();
        input.insert("topic".to_string(), json!("sales"));
        InvocationRequest {
            agent_ref: agent.to_string(),
            input,
            execution_id: "exec-1".to_string(),
            step: "fetch".to_string(),
        }
    }

    #[tokio::test]
    async fn test_invoke_parses_agent_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/scout")
            .match_body(mockito::Matcher::PartialJson(json!({"step": "fetch", "input": {"topic": "sales"}})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"output": {"rows": 3}, "cost": 0.02, "tokens": {"input": 10, "output": 4}, "duration_ms": 7}"#)
            .create_async()
            .await;

        let invoker = WebhookAgentInvoker::new(HashMap::from([(
            "scout".to_string(),
            format!("{}/scout", server.url()),
        )]));
        let output = invoker.invoke(request("scout"), Duration::from_secs(5)).await.unwrap();

        mock.assert_async().await;
        assert_eq!(output.output, json!({"rows": 3}));
        assert_eq!(output.tokens.total(), 14);
        assert_eq!(output.duration_ms, 7);
    }

    #[tokio::test]
    async fn test_unknown_agent_without_default_endpoint() {
        let invoker = WebhookAgentInvoker::new(HashMap::new());
        let err = invoker.invoke(request("ghost"), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, InvokerError::UnknownAgent(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_call_failure() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/").with_status(500).with_body("boom").create_async().await;

        let invoker = WebhookAgentInvoker::new(HashMap::from([(DEFAULT_ENDPOINT.to_string(), server.url())]));
        let err = invoker.invoke(request("any"), Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, InvokerError::CallFailed(msg) if msg.contains("500")));
    }
}
