// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP API
//!
//! JSON surface over the application services. Every failure is rendered as
//! `{ "error_kind", "message", "details" }` with a status derived from the
//! error kind.

use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, Method, StatusCode, Uri},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::application::chain_catalog::ChainCatalog;
use crate::application::environment_lock::EnvironmentLockService;
use crate::application::error::{AtlasError, ErrorKind};
use crate::application::escalation_router::EscalationRouter;
use crate::application::executor::ChainExecutor;
use crate::application::guard::GuardService;
use crate::application::lesson_reporter::LessonReporter;
use crate::application::policy_store::PolicyStore;
use crate::application::promotion_gate::PromotionGate;
use crate::domain::execution::ExecutionId;
use crate::domain::guard::GuardContext;
use crate::domain::lesson::LessonReport;
use crate::domain::policy::{PolicyRule, RuleAction, Severity};
use crate::domain::promotion::{PromotionId, PromotionRequest};
use crate::infrastructure::chain_parser::ChainManifest;
use crate::infrastructure::event_bus::{EventBus, EventBusError};

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn ChainCatalog>,
    pub executor: Arc<dyn ChainExecutor>,
    pub guard: Arc<dyn GuardService>,
    pub lesson_reporter: Arc<dyn LessonReporter>,
    pub policy_store: Arc<dyn PolicyStore>,
    pub escalation_router: Arc<dyn EscalationRouter>,
    pub promotion_gate: Arc<dyn PromotionGate>,
    pub environment_lock: Arc<EnvironmentLockService>,
    pub event_bus: Arc<EventBus>,
    pub started_at: Instant,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chains", get(list_chains).post(register_chain))
        .route("/chains/{name}", get(get_chain))
        .route("/chains/{name}/start", post(start_chain))
        .route("/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/advance", post(advance_execution))
        .route("/executions/{id}/cancel", post(cancel_execution))
        .route("/executions/{id}/approve", post(approve_execution))
        .route("/executions/{id}/events", get(stream_execution_events))
        .route("/guard/check", post(guard_check))
        .route("/lessons", get(list_lessons))
        .route("/lessons/report", post(report_lesson))
        .route("/rules", get(list_rules).post(create_rule))
        .route("/escalations", get(list_escalations))
        .route("/escalations/retry", post(retry_escalations))
        .route("/promotions", get(list_promotions))
        .route("/promotions/start", post(start_promotion))
        .route("/promotions/{id}", get(get_promotion))
        .route("/promotions/{id}/approve", post(approve_promotion))
        .route("/environment-lock", get(lock_status))
        .route("/environment-lock/unlock", post(unlock_environment))
        .route("/environment-lock/lock", post(lock_environment))
        .fallback(route_not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

// ============================================================================
// Errors and extractors
// ============================================================================

#[derive(Debug)]
pub struct ApiError(pub AtlasError);

impl From<AtlasError> for ApiError {
    fn from(err: AtlasError) -> Self {
        Self(err)
    }
}

impl From<crate::domain::repository::RepositoryError> for ApiError {
    fn from(err: crate::domain::repository::RepositoryError) -> Self {
        Self(err.into())
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Blocked | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
        ErrorKind::UpstreamFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::LockViolation => StatusCode::LOCKED,
        ErrorKind::DegradedMode => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(err: &AtlasError) -> Value {
    let message = match err {
        AtlasError::Blocked { message, .. } | AtlasError::LockViolation { message, .. } => message.clone(),
        other => other.to_string(),
    };
    json!({
        "error_kind": err.kind().as_str(),
        "message": message,
        "details": err.details(),
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_for(self.0.kind()), Json(error_body(&self.0))).into_response()
    }
}

async fn route_not_found(method: Method, uri: Uri) -> ApiError {
    ApiError(AtlasError::NotFound(format!("no route for {} {}", method, uri.path())))
}

/// 405 keeps its status but reports the `invalid_request` kind
async fn method_not_allowed(method: Method, uri: Uri) -> Response {
    let err = AtlasError::InvalidRequest(format!("method {} not allowed on {}", method, uri.path()));
    (StatusCode::METHOD_NOT_ALLOWED, Json(error_body(&err))).into_response()
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// `Json` whose rejection uses the structured error body
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError(AtlasError::InvalidRequest(e.body_text())))?;
        Ok(Self(value))
    }
}

/// `Query` whose rejection uses the structured error body
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError(AtlasError::InvalidRequest(e.body_text())))?;
        Ok(Self(value))
    }
}

/// Bodies that may be omitted entirely
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError(AtlasError::InvalidRequest(e.to_string())))
}

fn parse_execution_id(value: &str) -> Result<ExecutionId, ApiError> {
    ExecutionId::parse(value)
        .map_err(|_| ApiError(AtlasError::InvalidRequest(format!("invalid execution id '{}'", value))))
}

fn parse_promotion_id(value: &str) -> Result<PromotionId, ApiError> {
    PromotionId::parse(value)
        .map_err(|_| ApiError(AtlasError::InvalidRequest(format!("invalid promotion id '{}'", value))))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub chain: Option<String>,
}

impl ListQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT)
    }
}

// ============================================================================
// Health
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

// ============================================================================
// Chains and executions
// ============================================================================

async fn list_chains(State(state): State<Arc<AppState>>) -> ApiResult<Vec<crate::domain::chain::Chain>> {
    Ok(Json(state.catalog.list().await?))
}

async fn get_chain(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<crate::domain::chain::Chain> {
    Ok(Json(state.catalog.get(&name).await?))
}

async fn register_chain(
    State(state): State<Arc<AppState>>,
    ApiJson(manifest): ApiJson<ChainManifest>,
) -> Result<(StatusCode, Json<crate::domain::chain::Chain>), ApiError> {
    let chain = state.catalog.register_manifest(manifest).await?;
    Ok((StatusCode::CREATED, Json(chain)))
}

#[derive(Debug, Default, Deserialize)]
pub struct StartChainRequest {
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub triggered_by: Option<String>,
    /// Drive the execution until terminal or paused
    #[serde(default)]
    pub run: bool,
}

async fn start_chain(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<crate::domain::execution::ChainExecution>), ApiError> {
    let request: StartChainRequest = optional_body(&body)?;
    let input = if request.input.is_null() { json!({}) } else { request.input };
    let triggered_by = request.triggered_by.unwrap_or_else(|| "api".to_string());

    let mut execution = state.executor.start_chain(&name, input, &triggered_by).await?;
    if request.run {
        execution = state.executor.run_to_completion(execution.id).await?;
    }
    Ok((StatusCode::CREATED, Json(execution)))
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Vec<crate::domain::execution::ChainExecution>> {
    let executions = state
        .executor
        .list_executions(query.chain.as_deref(), query.limit())
        .await?;
    Ok(Json(executions))
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<crate::domain::execution::ChainExecution> {
    let id = parse_execution_id(&id)?;
    Ok(Json(state.executor.get_execution(id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct AdvanceRequest {
    #[serde(default)]
    pub expected_step: Option<usize>,
}

async fn advance_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<crate::domain::execution::ChainExecution> {
    let id = parse_execution_id(&id)?;
    let request: AdvanceRequest = optional_body(&body)?;
    Ok(Json(state.executor.advance_step(id, request.expected_step).await?))
}

async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<crate::domain::execution::ChainExecution> {
    let id = parse_execution_id(&id)?;
    Ok(Json(state.executor.cancel_chain(id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub approved_by: Option<String>,
}

impl ApproveRequest {
    fn approver(self) -> Result<String, ApiError> {
        match self.approved_by {
            Some(name) if !name.trim().is_empty() => Ok(name),
            _ => Err(ApiError(AtlasError::InvalidRequest("approved_by is required".to_string()))),
        }
    }
}

async fn approve_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<ApproveRequest>,
) -> ApiResult<crate::domain::execution::ChainExecution> {
    let id = parse_execution_id(&id)?;
    let approver = request.approver()?;
    Ok(Json(state.executor.approve_step(id, &approver).await?))
}

async fn stream_execution_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let id = parse_execution_id(&id)?;
    // Surface a missing execution as 404 before opening the stream
    state.executor.get_execution(id).await?;

    let receiver = state.event_bus.subscribe_execution(id);
    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok::<_, Infallible>(Event::default().data(data)), receiver));
                }
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// ============================================================================
// Guard, lessons and rules
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GuardCheckRequest {
    pub action: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub evidence: BTreeMap<String, Value>,
    /// Return a block as a `blocked` error instead of a result body
    #[serde(default)]
    pub enforce: bool,
}

async fn guard_check(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<GuardCheckRequest>,
) -> ApiResult<crate::domain::guard::GuardResult> {
    if request.action.trim().is_empty() {
        return Err(ApiError(AtlasError::InvalidRequest("action cannot be empty".to_string())));
    }
    let mut context = GuardContext::new(
        request.domain.unwrap_or_else(|| "general".to_string()),
        request.agent_id.unwrap_or_default(),
    );
    context.evidence = request.evidence;

    let result = if request.enforce {
        state.guard.enforce(&request.action, &context).await?
    } else {
        state.guard.check(&request.action, &context).await
    };
    Ok(Json(result))
}

async fn report_lesson(
    State(state): State<Arc<AppState>>,
    ApiJson(report): ApiJson<LessonReport>,
) -> Result<(StatusCode, Json<crate::application::lesson_reporter::LessonRecorded>), ApiError> {
    let recorded = state.lesson_reporter.report(report).await?;
    let status = if recorded.outcome.deduped_existing {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(recorded)))
}

async fn list_lessons(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Vec<crate::domain::lesson::Lesson>> {
    Ok(Json(state.policy_store.list_lessons(query.limit()).await?))
}

async fn list_rules(State(state): State<Arc<AppState>>) -> ApiResult<Vec<PolicyRule>> {
    Ok(Json(state.policy_store.list_rules().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    #[serde(default = "default_rule_domain")]
    pub domain: String,
    pub action: RuleAction,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    #[serde(default)]
    pub trigger_pattern: Option<String>,
    #[serde(default)]
    pub applies_to_domains: Vec<String>,
    #[serde(default)]
    pub applies_to_agents: Vec<String>,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub enforced: Option<bool>,
    #[serde(default)]
    pub required_action: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_rule_domain() -> String {
    "general".to_string()
}

impl CreateRuleRequest {
    fn into_rule(self) -> Result<PolicyRule, AtlasError> {
        let mut rule = PolicyRule::new(self.name, self.domain, self.action, self.severity)
            .with_keywords(self.trigger_keywords)
            .with_alternatives(self.alternatives)
            .for_domains(self.applies_to_domains)
            .for_agents(self.applies_to_agents);
        if let Some(pattern) = &self.trigger_pattern {
            rule = rule.with_pattern(pattern)?;
        }
        if let Some(key) = self.required_action {
            rule = rule.requiring(key);
        }
        if let Some(expires_at) = self.expires_at {
            rule = rule.expiring_at(expires_at);
        }
        rule.enforced = self.enforced.unwrap_or(true);
        rule.message = self.message;
        rule.validate()?;
        Ok(rule)
    }
}

async fn create_rule(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<CreateRuleRequest>,
) -> Result<(StatusCode, Json<PolicyRule>), ApiError> {
    let rule = request.into_rule()?;
    state.policy_store.save_rule(&rule).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

// ============================================================================
// Escalations
// ============================================================================

async fn list_escalations(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Vec<crate::domain::escalation::Escalation>> {
    Ok(Json(state.escalation_router.list_recent(query.limit()).await?))
}

async fn retry_escalations(
    State(state): State<Arc<AppState>>,
) -> ApiResult<crate::application::escalation_router::RetrySummary> {
    Ok(Json(state.escalation_router.retry_pending().await?))
}

// ============================================================================
// Promotions
// ============================================================================

async fn start_promotion(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<PromotionRequest>,
) -> Result<(StatusCode, Json<crate::domain::promotion::PromotionRun>), ApiError> {
    let run = state.promotion_gate.start(request).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

async fn list_promotions(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> ApiResult<Vec<crate::domain::promotion::PromotionRun>> {
    Ok(Json(state.promotion_gate.list(query.limit()).await?))
}

async fn get_promotion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<crate::domain::promotion::PromotionRun> {
    let id = parse_promotion_id(&id)?;
    Ok(Json(state.promotion_gate.get(id).await?))
}

async fn approve_promotion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<ApproveRequest>,
) -> ApiResult<crate::domain::promotion::PromotionRun> {
    let id = parse_promotion_id(&id)?;
    let approver = request.approver()?;
    Ok(Json(state.promotion_gate.approve(id, &approver).await?))
}

// ============================================================================
// Environment lock
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct UnlockRequest {
    #[serde(rename = "durationMinutes", alias = "duration_minutes")]
    pub duration_minutes: i64,
    pub reason: String,
    #[serde(default)]
    pub unlocked_by: Option<String>,
}

async fn lock_status(
    State(state): State<Arc<AppState>>,
) -> ApiResult<crate::application::environment_lock::LockStatus> {
    Ok(Json(state.environment_lock.status().await?))
}

async fn unlock_environment(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<UnlockRequest>,
) -> ApiResult<crate::application::environment_lock::LockStatus> {
    let unlocked_by = request.unlocked_by.unwrap_or_else(|| "api".to_string());
    let status = state
        .environment_lock
        .unlock(request.duration_minutes, &request.reason, &unlocked_by)
        .await?;
    Ok(Json(status))
}

async fn lock_environment(
    State(state): State<Arc<AppState>>,
) -> ApiResult<crate::application::environment_lock::LockStatus> {
    Ok(Json(state.environment_lock.relock().await?))
}
