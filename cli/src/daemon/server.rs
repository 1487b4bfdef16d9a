// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Server wiring
//!
//! Builds every service from the loaded configuration and serves the HTTP
//! API until Ctrl+C / SIGTERM.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use atlas_core::{
    application::{
        environment_lock::{EnvironmentLockService, SystemClock},
        escalation_router::{DeliveryPolicy, EscalationRouter, StandardEscalationRouter},
        executor::{ExecutorSettings, StandardChainExecutor},
        guard::{GuardService, StandardGuardService},
        lesson_reporter::{LessonReporter, StandardLessonReporter},
        policy_store::{PolicyStore, StandardPolicyStore},
        promotion_gate::{PromotionSettings, StandardPromotionGate},
        repository_factory::Repositories,
        StandardChainCatalog,
    },
    domain::{
        config::{AtlasConfigManifest, StorageBackendKind},
        escalation::{EscalationRule, Notifier},
        promotion::BackupService,
        repository::{PostgresConfig, StorageBackend},
    },
    infrastructure::{
        backup_command::CommandBackupService, db::Database, directory_gateway::DirectoryEnvironmentGateway,
        event_bus::EventBus, webhook_invoker::WebhookAgentInvoker, webhook_notifier::LogNotifier,
        webhook_notifier::WebhookNotifier,
    },
    presentation::{app, AppState},
};

/// Wire repositories, collaborators and services for `config`
pub async fn build_state(config: &AtlasConfigManifest) -> Result<AppState> {
    let spec = &config.spec;
    let event_bus = Arc::new(EventBus::with_default_capacity());

    let (backend, database) = match spec.storage.backend {
        StorageBackendKind::InMemory => (StorageBackend::InMemory, None),
        StorageBackendKind::Postgres => {
            let url = spec
                .storage
                .database_url
                .clone()
                .context("spec.storage.database_url is required for the postgres backend")?;
            let database = Database::new(&url).await?;
            (
                StorageBackend::PostgreSQL(PostgresConfig { connection_string: url }),
                Some(database),
            )
        }
    };
    let pool = database.as_ref().map(|db| db.get_pool());
    let repos = Repositories::create(&backend, pool, &spec.environment_lock.state_file)
        .context("Failed to create repositories")?;
    if backend_is_memory(&backend) {
        warn!("Using in-memory storage: chains, executions, lessons and promotions are lost on restart");
        info!(state_file = %spec.environment_lock.state_file.display(), "Environment lock persisted to file");
    }

    let notifier: Arc<dyn Notifier> = if spec.escalation.targets.is_empty() {
        info!("No escalation targets configured, escalations are logged only");
        Arc::new(LogNotifier)
    } else {
        Arc::new(WebhookNotifier::new(spec.escalation.targets.clone()))
    };
    let escalation_rules = spec.escalation.rules.clone().unwrap_or_else(EscalationRule::defaults);
    let escalation_router: Arc<dyn EscalationRouter> = Arc::new(StandardEscalationRouter::new(
        escalation_rules,
        repos.escalations.clone(),
        notifier,
        DeliveryPolicy {
            max_attempts: spec.escalation.max_attempts,
            retry_delay: spec.escalation.retry_delay,
        },
        event_bus.clone(),
    ));

    let policy_store: Arc<dyn PolicyStore> =
        Arc::new(StandardPolicyStore::new(repos.rules.clone(), repos.lessons.clone()));
    let lesson_reporter: Arc<dyn LessonReporter> = Arc::new(StandardLessonReporter::new(
        policy_store.clone(),
        Some(escalation_router.clone()),
        event_bus.clone(),
    ));
    let guard: Arc<dyn GuardService> = Arc::new(StandardGuardService::new(
        policy_store.clone(),
        Some(lesson_reporter.clone()),
        Some(escalation_router.clone()),
        event_bus.clone(),
        spec.guard.policy_timeout,
    ));

    let catalog = Arc::new(StandardChainCatalog::new(repos.chains.clone(), event_bus.clone()));
    if let Some(dir) = &spec.chains_dir {
        let loaded = catalog
            .load_dir(dir)
            .await
            .with_context(|| format!("Failed to load chains from {:?}", dir))?;
        info!(count = loaded, dir = %dir.display(), "Loaded chain manifests");
    }

    let invoker = Arc::new(
        WebhookAgentInvoker::new(spec.agents.endpoints.clone()).with_max_timeout(spec.agents.agent_timeout),
    );
    let executor = Arc::new(StandardChainExecutor::new(
        repos.chains.clone(),
        repos.executions.clone(),
        guard.clone(),
        invoker,
        Some(lesson_reporter.clone()),
        event_bus.clone(),
        ExecutorSettings {
            step_timeout: spec.executor.step_timeout,
            default_domain: spec.executor.default_domain.clone(),
            record_lessons: spec.executor.record_lessons,
        },
    ));

    let environment_lock = Arc::new(EnvironmentLockService::new(
        repos.environment_lock.clone(),
        Arc::new(SystemClock),
        spec.environment_lock.max_unlock_minutes,
        event_bus.clone(),
    ));

    let gateway = Arc::new(DirectoryEnvironmentGateway::new(spec.promotion.environments.clone()));
    let backup: Arc<dyn BackupService> = if spec.promotion.backup_command.is_empty() {
        info!("No backup command configured, promotions snapshot environment directories");
        gateway.clone()
    } else {
        Arc::new(CommandBackupService::new(spec.promotion.backup_command.clone()))
    };
    let promotion_gate = Arc::new(StandardPromotionGate::new(
        repos.promotions.clone(),
        backup,
        gateway,
        environment_lock.clone(),
        Some(guard.clone()),
        event_bus.clone(),
        PromotionSettings {
            backup_timeout: spec.promotion.backup_timeout,
            require_approval: spec.promotion.require_approval,
        },
    ));

    Ok(AppState {
        catalog,
        executor,
        guard,
        lesson_reporter,
        policy_store,
        escalation_router,
        promotion_gate,
        environment_lock,
        event_bus,
        started_at: Instant::now(),
    })
}

fn backend_is_memory(backend: &StorageBackend) -> bool {
    matches!(backend, StorageBackend::InMemory)
}

fn install_metrics_exporter(config: &AtlasConfigManifest) -> Result<()> {
    let metrics = &config.spec.observability.metrics;
    if !metrics.enabled {
        return Ok(());
    }
    let addr: SocketAddr = format!("{}:{}", config.spec.server.bind_address, metrics.port)
        .parse()
        .context("Invalid metrics listen address")?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Prometheus metrics exporter listening on {}", addr);
    Ok(())
}

/// Load configuration and serve the API in the foreground
pub async fn start_server(config_path: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = AtlasConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(host) = host {
        config.spec.server.bind_address = host;
    }
    if let Some(port) = port {
        config.spec.server.port = port;
    }
    config.validate().context("Configuration validation failed")?;
    info!("Configuration loaded: name={}", config.metadata.name);

    install_metrics_exporter(&config)?;
    let state = build_state(&config).await?;

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!(pid = std::process::id(), "Atlas listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Atlas shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::application::ChainCatalog;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_build_state_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AtlasConfigManifest::default();
        config.spec.environment_lock.state_file = dir.path().join("lock.json");
        config.spec.promotion.environments = HashMap::from([
            ("dev".to_string(), dir.path().join("dev")),
            ("prod".to_string(), dir.path().join("prod")),
        ]);

        let state = build_state(&config).await.unwrap();
        assert!(state.environment_lock.status().await.unwrap().locked);
        assert!(state.catalog.list().await.unwrap().is_empty());
    }
}
