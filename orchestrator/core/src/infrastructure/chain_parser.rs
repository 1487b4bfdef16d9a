// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Chain YAML Parser
//!
//! Parses chain manifests into domain [`Chain`]s.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Translates the manifest schema to the domain model
//!
//! # Manifest Format
//!
//! ```yaml
//! apiVersion: atlas/v1
//! kind: Chain
//! metadata:
//!   name: nightly-report
//!   version: "1.2.0"
//!   description: Pull figures, draft, publish
//! spec:
//!   steps:
//!     - name: fetch
//!       agent_ref: scout
//!       input:
//!         topic: "{{input.topic}}"
//!     - name: publish
//!       agent_ref: herald
//!       action: "publish report on {{input.topic}}"
//!       domain: production
//!       sensitive: true
//!       requires_approval: true
//!       timeout: 2m
//! ```

use crate::domain::chain::{Chain, ChainError, StepDefinition};
use crate::infrastructure::input_template_engine::InputTemplateEngine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

pub const CHAIN_API_VERSION: &str = "atlas/v1";
pub const CHAIN_KIND: &str = "Chain";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainManifest {
    pub api_version: String,
    pub kind: String,
    pub metadata: ChainMetadataYaml,
    pub spec: ChainSpecYaml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainMetadataYaml {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSpecYaml {
    pub steps: Vec<StepDefinition>,
}

impl From<&Chain> for ChainManifest {
    fn from(chain: &Chain) -> Self {
        Self {
            api_version: CHAIN_API_VERSION.to_string(),
            kind: CHAIN_KIND.to_string(),
            metadata: ChainMetadataYaml {
                name: chain.name.clone(),
                version: Some(chain.version.clone()),
                description: chain.description.clone(),
                labels: HashMap::new(),
            },
            spec: ChainSpecYaml {
                steps: chain.steps.clone(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ChainParseError {
    #[error("Failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error(transparent)]
    Invalid(#[from] ChainError),
}

/// Chain manifest parser (Infrastructure service)
pub struct ChainParser;

impl ChainParser {
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Chain, ChainParseError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ChainParseError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse_yaml(&content)
    }

    pub fn parse_yaml(yaml: &str) -> Result<Chain, ChainParseError> {
        let manifest: ChainManifest =
            serde_yaml::from_str(yaml).map_err(|e| ChainParseError::Yaml(e.to_string()))?;

        Ok(Self::into_chain(manifest)?)
    }

    /// Validate a manifest and convert it to a domain chain
    pub fn into_chain(manifest: ChainManifest) -> Result<Chain, ChainError> {
        if manifest.api_version != CHAIN_API_VERSION {
            return Err(ChainError::InvalidApiVersion(manifest.api_version));
        }
        if manifest.kind != CHAIN_KIND {
            return Err(ChainError::InvalidKind(manifest.kind));
        }

        for step in &manifest.spec.steps {
            InputTemplateEngine::validate_step(step)?;
        }

        Chain::new(
            manifest.metadata.name,
            manifest.metadata.version.unwrap_or_else(|| "0.1.0".to_string()),
            manifest.metadata.description,
            manifest.spec.steps,
        )
    }

    pub fn to_yaml(chain: &Chain) -> Result<String, ChainParseError> {
        serde_yaml::to_string(&ChainManifest::from(chain)).map_err(|e| ChainParseError::Yaml(e.to_string()))
    }

    /// Parse every `*.yaml` / `*.yml` file in `dir`.
    ///
    /// Files that fail to parse are logged and skipped so one broken manifest
    /// does not keep the rest from loading.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<Chain>, ChainParseError> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|e| ChainParseError::Io {
            path: dir.display().to_string(),
            error: e.to_string(),
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        paths.sort();

        let mut chains = Vec::new();
        for path in paths {
            match Self::parse_file(&path) {
                Ok(chain) => {
                    debug!(chain = %chain.name, path = %path.display(), "Loaded chain manifest");
                    chains.push(chain);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping invalid chain manifest"),
            }
        }
        Ok(chains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
apiVersion: atlas/v1
kind: Chain
metadata:
  name: nightly-report
  version: "1.2.0"
spec:
  steps:
    - name: fetch
      agent_ref: scout
      input:
        topic: "{{input.topic}}"
    - name: publish
      agent_ref: herald
      domain: production
      sensitive: true
      requires_approval: true
      timeout: 2m
"#;

    #[test]
    fn test_parse_manifest() {
        let chain = ChainParser::parse_yaml(MANIFEST).unwrap();
        assert_eq!(chain.name, "nightly-report");
        assert_eq!(chain.version, "1.2.0");
        assert_eq!(chain.len(), 2);

        let publish = chain.step(1).unwrap();
        assert!(publish.sensitive);
        assert!(publish.requires_approval);
        assert_eq!(publish.domain.as_deref(), Some("production"));
        assert_eq!(publish.timeout, Some(std::time::Duration::from_secs(120)));
    }

    #[test]
    fn test_rejects_wrong_api_version() {
        let yaml = MANIFEST.replace("atlas/v1", "atlas/v0");
        assert!(matches!(
            ChainParser::parse_yaml(&yaml),
            Err(ChainParseError::Invalid(ChainError::InvalidApiVersion(_)))
        ));
    }

    #[test]
    fn test_rejects_broken_template() {
        let yaml = MANIFEST.replace("{{input.topic}}", "{{#each input}}");
        assert!(matches!(
            ChainParser::parse_yaml(&yaml),
            Err(ChainParseError::Invalid(ChainError::Template { .. }))
        ));
    }

    #[test]
    fn test_yaml_round_trip_keeps_steps() {
        let chain = ChainParser::parse_yaml(MANIFEST).unwrap();
        let reparsed = ChainParser::parse_yaml(&ChainParser::to_yaml(&chain).unwrap()).unwrap();
        assert_eq!(reparsed.steps, chain.steps);
    }

    #[test]
    fn test_load_dir_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.yaml"), MANIFEST).unwrap();
        fs::write(dir.path().join("bad.yml"), "kind: [").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let chains = ChainParser::load_dir(dir.path()).unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].name, "nightly-report");
    }
}
