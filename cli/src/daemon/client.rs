// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with the Atlas server API

use anyhow::{Context, Result};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use atlas_core::application::environment_lock::LockStatus;
use atlas_core::application::escalation_router::RetrySummary;
use atlas_core::domain::chain::Chain;
use atlas_core::domain::escalation::Escalation;
use atlas_core::domain::execution::ChainExecution;
use atlas_core::domain::guard::GuardResult;
use atlas_core::domain::lesson::{Lesson, LessonReport};
use atlas_core::domain::policy::PolicyRule;
use atlas_core::domain::promotion::{PromotionRequest, PromotionRun};
use atlas_core::infrastructure::chain_parser::ChainManifest;

/// Structured error body returned by every endpoint
#[derive(Debug, Clone, Deserialize, thiserror::Error)]
#[error("{error_kind}: {message}")]
pub struct ApiErrorBody {
    pub error_kind: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct AtlasClient {
    client: Client,
    base_url: String,
}

impl AtlasClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client = Client::builder()
            // No global timeout: chain runs and promotions can be long-lived
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: super::base_url(host, port),
        })
    }

    async fn request<B, T>(&self, method: Method, path: &str, body: Option<&B>, what: &str) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to {}", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return match serde_json::from_str::<ApiErrorBody>(&text) {
                Ok(body) => Err(anyhow::Error::new(body).context(format!("Failed to {}", what))),
                Err(_) => anyhow::bail!("Failed to {}: HTTP {} {}", what, status, text),
            };
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response to {}", what))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        self.request::<Value, T>(Method::GET, path, None, what).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B, what: &str) -> Result<T> {
        self.request(Method::POST, path, Some(body), what).await
    }

    // Chains

    pub async fn register_chain(&self, manifest: &ChainManifest) -> Result<Chain> {
        self.post("/chains", manifest, "register chain").await
    }

    pub async fn list_chains(&self) -> Result<Vec<Chain>> {
        self.get("/chains", "list chains").await
    }

    pub async fn start_chain(&self, name: &str, input: Value, triggered_by: &str, run: bool) -> Result<ChainExecution> {
        let body = json!({ "input": input, "triggered_by": triggered_by, "run": run });
        self.post(&format!("/chains/{}/start", name), &body, "start chain").await
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<ChainExecution> {
        self.get(&format!("/executions/{}", id), "get execution").await
    }

    pub async fn list_executions(&self, chain: Option<&str>, limit: usize) -> Result<Vec<ChainExecution>> {
        let mut path = format!("/executions?limit={}", limit);
        if let Some(chain) = chain {
            path.push_str(&format!("&chain={}", chain));
        }
        self.get(&path, "list executions").await
    }

    pub async fn advance_execution(&self, id: Uuid, expected_step: Option<usize>) -> Result<ChainExecution> {
        let body = json!({ "expected_step": expected_step });
        self.post(&format!("/executions/{}/advance", id), &body, "advance execution")
            .await
    }

    pub async fn cancel_execution(&self, id: Uuid) -> Result<ChainExecution> {
        self.post(&format!("/executions/{}/cancel", id), &json!({}), "cancel execution")
            .await
    }

    pub async fn approve_execution(&self, id: Uuid, approved_by: &str) -> Result<ChainExecution> {
        let body = json!({ "approved_by": approved_by });
        self.post(&format!("/executions/{}/approve", id), &body, "approve execution")
            .await
    }

    // Guard, lessons, rules, escalations

    pub async fn guard_check(&self, request: &Value) -> Result<GuardResult> {
        self.post("/guard/check", request, "check action").await
    }

    pub async fn report_lesson(&self, report: &LessonReport) -> Result<Value> {
        self.post("/lessons/report", report, "report lesson").await
    }

    pub async fn list_lessons(&self, limit: usize) -> Result<Vec<Lesson>> {
        self.get(&format!("/lessons?limit={}", limit), "list lessons").await
    }

    pub async fn list_rules(&self) -> Result<Vec<PolicyRule>> {
        self.get("/rules", "list rules").await
    }

    pub async fn create_rule(&self, rule: &Value) -> Result<PolicyRule> {
        self.post("/rules", rule, "create rule").await
    }

    pub async fn list_escalations(&self, limit: usize) -> Result<Vec<Escalation>> {
        self.get(&format!("/escalations?limit={}", limit), "list escalations")
            .await
    }

    pub async fn retry_escalations(&self) -> Result<RetrySummary> {
        self.post("/escalations/retry", &json!({}), "retry escalations").await
    }

    // Promotions

    pub async fn start_promotion(&self, request: &PromotionRequest) -> Result<PromotionRun> {
        self.post("/promotions/start", request, "start promotion").await
    }

    pub async fn get_promotion(&self, id: Uuid) -> Result<PromotionRun> {
        self.get(&format!("/promotions/{}", id), "get promotion").await
    }

    pub async fn list_promotions(&self, limit: usize) -> Result<Vec<PromotionRun>> {
        self.get(&format!("/promotions?limit={}", limit), "list promotions")
            .await
    }

    pub async fn approve_promotion(&self, id: Uuid, approved_by: &str) -> Result<PromotionRun> {
        let body = json!({ "approved_by": approved_by });
        self.post(&format!("/promotions/{}/approve", id), &body, "approve promotion")
            .await
    }

    // Environment lock

    pub async fn lock_status(&self) -> Result<LockStatus> {
        self.get("/environment-lock", "read environment lock").await
    }

    pub async fn unlock(&self, duration_minutes: i64, reason: &str, unlocked_by: &str) -> Result<LockStatus> {
        let body = json!({
            "durationMinutes": duration_minutes,
            "reason": reason,
            "unlocked_by": unlocked_by,
        });
        self.post("/environment-lock/unlock", &body, "unlock environment").await
    }

    pub async fn lock(&self) -> Result<LockStatus> {
        self.post("/environment-lock/lock", &json!({}), "lock environment").await
    }
}
