// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Register Chain Use Case
//!
//! Registers chain templates and serves them back by name.
//!
//! # DDD Pattern: Application Service
//!
//! - **Layer:** Application
//! - **Responsibility:** Validate and persist chain definitions
//! - **Collaborators:**
//!   - Domain: Chain aggregate (validation)
//!   - Infrastructure: ChainParser, ChainRepository, EventBus
//!
//! # Flow
//!
//! 1. Accept a YAML manifest or an already-built chain
//! 2. Validate apiVersion/kind, name, step names and template syntax
//! 3. Persist to the ChainRepository (same name replaces the old version)
//! 4. Publish `ChainEvent::ChainRegistered`
//!
//! Running executions keep the copy they were started with, so replacing a
//! chain never changes an execution in flight.

use crate::application::error::AtlasError;
use crate::domain::chain::Chain;
use crate::domain::events::ChainEvent;
use crate::domain::repository::ChainRepository;
use crate::infrastructure::chain_parser::{ChainManifest, ChainParseError, ChainParser};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::input_template_engine::InputTemplateEngine;
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait ChainCatalog: Send + Sync {
    async fn register(&self, chain: Chain) -> Result<Chain, AtlasError>;

    async fn register_manifest(&self, manifest: ChainManifest) -> Result<Chain, AtlasError> {
        self.register(ChainParser::into_chain(manifest)?).await
    }

    async fn register_yaml(&self, yaml: &str) -> Result<Chain, AtlasError> {
        let chain = ChainParser::parse_yaml(yaml).map_err(|e| match e {
            ChainParseError::Invalid(e) => AtlasError::from(e),
            other => AtlasError::InvalidRequest(other.to_string()),
        })?;
        self.register(chain).await
    }

    async fn get(&self, name: &str) -> Result<Chain, AtlasError>;

    async fn list(&self) -> Result<Vec<Chain>, AtlasError>;
}

pub struct StandardChainCatalog {
    chains: Arc<dyn ChainRepository>,
    event_bus: Arc<EventBus>,
}

impl StandardChainCatalog {
    pub fn new(chains: Arc<dyn ChainRepository>, event_bus: Arc<EventBus>) -> Self {
        Self { chains, event_bus }
    }

    /// Register every manifest in `dir`; returns how many were loaded
    pub async fn load_dir(&self, dir: &Path) -> Result<usize, AtlasError> {
        let chains = ChainParser::load_dir(dir).map_err(|e| AtlasError::Internal(e.to_string()))?;
        let count = chains.len();
        for chain in chains {
            self.register(chain).await?;
        }
        info!(dir = %dir.display(), count, "Loaded chain manifests");
        Ok(count)
    }
}

#[async_trait]
impl ChainCatalog for StandardChainCatalog {
    async fn register(&self, chain: Chain) -> Result<Chain, AtlasError> {
        for step in &chain.steps {
            InputTemplateEngine::validate_step(step)?;
        }
        self.chains.save(&chain).await?;

        info!(chain = %chain.name, version = %chain.version, steps = chain.len(), "Chain registered");
        self.event_bus.publish_chain_event(ChainEvent::ChainRegistered {
            chain_name: chain.name.clone(),
            version: chain.version.clone(),
            registered_at: Utc::now(),
        });
        Ok(chain)
    }

    async fn get(&self, name: &str) -> Result<Chain, AtlasError> {
        self.chains
            .find_by_name(name)
            .await?
            .ok_or_else(|| AtlasError::NotFound(format!("chain '{}' not found", name)))
    }

    async fn list(&self) -> Result<Vec<Chain>, AtlasError> {
        Ok(self.chains.list_all().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryChainRepository;

    fn catalog() -> StandardChainCatalog {
        StandardChainCatalog::new(
            Arc::new(InMemoryChainRepository::new()),
            Arc::new(EventBus::with_default_capacity()),
        )
    }

    const YAML: &str = r#"
apiVersion: atlas/v1
kind: Chain
metadata:
  name: triage
spec:
  steps:
    - name: classify
      agent_ref: sorter
"#;

    #[tokio::test]
    async fn test_register_and_get() {
        let catalog = catalog();
        let chain = catalog.register_yaml(YAML).await.unwrap();
        assert_eq!(chain.version, "0.1.0");
        assert_eq!(catalog.get("triage").await.unwrap().len(), 1);
        assert_eq!(catalog.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_manifest_is_invalid_request() {
        let err = catalog().register_yaml(&YAML.replace("kind: Chain", "kind: Job")).await.unwrap_err();
        assert!(matches!(err, AtlasError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_missing_chain() {
        assert!(matches!(catalog().get("nope").await, Err(AtlasError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("triage.yaml"), YAML).unwrap();
        let catalog = catalog();
        assert_eq!(catalog.load_dir(dir.path()).await.unwrap(), 1);
        assert!(catalog.get("triage").await.is_ok());
    }
}
