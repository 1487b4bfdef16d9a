// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP API tests against the in-memory service graph

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

use atlas_core::application::chain_catalog::StandardChainCatalog;
use atlas_core::application::environment_lock::{EnvironmentLockService, SystemClock};
use atlas_core::application::escalation_router::{DeliveryPolicy, EscalationRouter, StandardEscalationRouter};
use atlas_core::application::executor::{ExecutorSettings, StandardChainExecutor};
use atlas_core::application::guard::{GuardService, StandardGuardService};
use atlas_core::application::lesson_reporter::{LessonReporter, StandardLessonReporter};
use atlas_core::application::policy_store::{PolicyStore, StandardPolicyStore};
use atlas_core::application::promotion_gate::{PromotionSettings, StandardPromotionGate};
use atlas_core::domain::escalation::EscalationRule;
use atlas_core::domain::execution::TokenCounts;
use atlas_core::domain::runtime::{AgentInvoker, InvocationOutput, InvocationRequest, InvokerError};
use atlas_core::infrastructure::directory_gateway::DirectoryEnvironmentGateway;
use atlas_core::infrastructure::event_bus::EventBus;
use atlas_core::infrastructure::repositories::{
    InMemoryChainExecutionRepository, InMemoryChainRepository, InMemoryEnvironmentLockStore,
    InMemoryEscalationRepository, InMemoryLessonRepository, InMemoryPolicyRuleRepository,
    InMemoryPromotionRepository,
};
use atlas_core::infrastructure::webhook_notifier::LogNotifier;
use atlas_core::presentation::{app, AppState};

struct EchoInvoker;

#[async_trait]
impl AgentInvoker for EchoInvoker {
    async fn invoke(&self, request: InvocationRequest, _timeout: Duration) -> Result<InvocationOutput, InvokerError> {
        Ok(InvocationOutput {
            output: json!({ "step": request.step }),
            cost: 0.1,
            duration_ms: 1,
            tokens: TokenCounts::default(),
        })
    }
}

fn router(dir: &tempfile::TempDir) -> Router {
    let bus = Arc::new(EventBus::with_default_capacity());
    let chains = Arc::new(InMemoryChainRepository::new());

    let escalation_router: Arc<dyn EscalationRouter> = Arc::new(StandardEscalationRouter::new(
        EscalationRule::defaults(),
        Arc::new(InMemoryEscalationRepository::new()),
        Arc::new(LogNotifier),
        DeliveryPolicy::default(),
        bus.clone(),
    ));
    let policy_store: Arc<dyn PolicyStore> = Arc::new(StandardPolicyStore::new(
        Arc::new(InMemoryPolicyRuleRepository::new()),
        Arc::new(InMemoryLessonRepository::new()),
    ));
    let lesson_reporter: Arc<dyn LessonReporter> = Arc::new(StandardLessonReporter::new(
        policy_store.clone(),
        Some(escalation_router.clone()),
        bus.clone(),
    ));
    let guard: Arc<dyn GuardService> = Arc::new(StandardGuardService::new(
        policy_store.clone(),
        Some(lesson_reporter.clone()),
        Some(escalation_router.clone()),
        bus.clone(),
        Duration::from_secs(1),
    ));
    let executor = Arc::new(StandardChainExecutor::new(
        chains.clone(),
        Arc::new(InMemoryChainExecutionRepository::new()),
        guard.clone(),
        Arc::new(EchoInvoker),
        Some(lesson_reporter.clone()),
        bus.clone(),
        ExecutorSettings::default(),
    ));
    let environment_lock = Arc::new(EnvironmentLockService::new(
        Arc::new(InMemoryEnvironmentLockStore::new()),
        Arc::new(SystemClock),
        60,
        bus.clone(),
    ));

    let dev = dir.path().join("dev");
    let prod = dir.path().join("prod");
    std::fs::create_dir_all(dev.join("schema")).unwrap();
    std::fs::create_dir_all(prod.join("schema")).unwrap();
    std::fs::write(dev.join("schema/001_init.sql"), "create table t ();").unwrap();
    let gateway = Arc::new(
        DirectoryEnvironmentGateway::new(HashMap::from([
            ("dev".to_string(), dev),
            ("prod".to_string(), prod),
        ]))
        .with_backups_dir(dir.path().join("backups")),
    );
    let promotion_gate = Arc::new(StandardPromotionGate::new(
        Arc::new(InMemoryPromotionRepository::new()),
        gateway.clone(),
        gateway,
        environment_lock.clone(),
        Some(guard.clone()),
        bus.clone(),
        PromotionSettings::default(),
    ));

    app(AppState {
        catalog: Arc::new(StandardChainCatalog::new(chains, bus.clone())),
        executor,
        guard,
        lesson_reporter,
        policy_store,
        escalation_router,
        promotion_gate,
        environment_lock,
        event_bus: bus,
        started_at: Instant::now(),
    })
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn report_chain() -> Value {
    json!({
        "apiVersion": "atlas/v1",
        "kind": "Chain",
        "metadata": { "name": "daily-report", "version": "1.0.0" },
        "spec": {
            "steps": [
                { "name": "fetch", "agent_ref": "scout" },
                {
                    "name": "publish",
                    "agent_ref": "herald",
                    "action": "publish report to prod supabase",
                    "sensitive": true
                }
            ]
        }
    })
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(&dir);
    let (status, body) = call(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_errors_use_structured_body() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(&dir);

    let (status, body) = call(&router, Method::GET, "/chains/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_kind"], "not_found");
    assert!(body["message"].as_str().unwrap().contains("missing"));
    assert!(body.get("details").is_some());

    let (status, body) = call(&router, Method::GET, "/executions/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_kind"], "invalid_request");

    let (status, body) = call(
        &router,
        Method::POST,
        "/environment-lock/unlock",
        Some(json!({ "durationMinutes": 500, "reason": "too long", "unlocked_by": "ops" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_kind"], "invalid_request");

    let (status, body) = call(&router, Method::GET, "/executions?limit=abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_kind"], "invalid_request");
    assert!(body["message"].is_string());

    let (status, body) = call(&router, Method::GET, "/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_kind"], "not_found");
    assert!(body["message"].as_str().unwrap().contains("/nope"));

    let (status, body) = call(&router, Method::DELETE, "/chains", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error_kind"], "invalid_request");
    assert!(body.get("details").is_some());
}

#[tokio::test]
async fn test_chain_round_trip_with_guard_block() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(&dir);

    let (status, _) = call(&router, Method::POST, "/chains", Some(report_chain())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, rule) = call(
        &router,
        Method::POST,
        "/rules",
        Some(json!({
            "name": "no-direct-prod",
            "action": "block",
            "severity": "high",
            "trigger_keywords": ["prod supabase"],
            "alternatives": ["promote from dev"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(rule["enforced"], true);

    let (status, execution) = call(
        &router,
        Method::POST,
        "/chains/daily-report/start",
        Some(json!({ "input": { "day": "monday" }, "run": true })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(execution["status"], "failed");
    assert_eq!(execution["current_step_index"], 1);

    let id = execution["id"].as_str().unwrap().to_string();
    let (status, fetched) = call(&router, Method::GET, &format!("/executions/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["status"], "failed");

    // Terminal executions ignore further advances
    let (status, replay) = call(
        &router,
        Method::POST,
        &format!("/executions/{}/advance", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["status"], "failed");

    let (status, body) = call(
        &router,
        Method::POST,
        "/guard/check",
        Some(json!({ "action": "write to prod supabase", "enforce": true })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_kind"], "blocked");

    let (status, body) = call(
        &router,
        Method::POST,
        "/guard/check",
        Some(json!({ "action": "write to staging" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blocked"], false);
}

#[tokio::test]
async fn test_lesson_report_dedupes() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(&dir);
    let report = json!({
        "type": "failure",
        "domain": "billing",
        "title": "invoice export timed out",
        "severity": "medium"
    });

    let (status, first) = call(&router, Method::POST, "/lessons/report", Some(report.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["deduped_existing"], false);

    let (status, second) = call(&router, Method::POST, "/lessons/report", Some(report)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["deduped_existing"], true);
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["occurrence_count"], 2);

    let (status, lessons) = call(&router, Method::GET, "/lessons", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lessons.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_promotion_requires_unlock() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(&dir);
    let request = json!({ "target": "schema", "source_env": "dev", "dest_env": "prod", "initiated_by": "ci" });

    let (status, body) = call(&router, Method::POST, "/promotions/start", Some(request.clone())).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body["error_kind"], "lock_violation");
    assert!(body["details"]["promotion_id"].is_string());

    let (status, lock) = call(
        &router,
        Method::POST,
        "/environment-lock/unlock",
        Some(json!({ "durationMinutes": 15, "reason": "release", "unlocked_by": "ops" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lock["locked"], false);

    let (status, run) = call(&router, Method::POST, "/promotions/start", Some(request)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(run["status"], "completed");
    assert!(dir.path().join("prod/schema/001_init.sql").exists());

    let (status, lock) = call(&router, Method::POST, "/environment-lock/lock", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lock["locked"], true);
}
