// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Atlas Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) for an Atlas
// node: server, storage, executor, guard, environment lock, escalation,
// agent endpoints, promotion and observability settings.

use crate::domain::environment_lock::MAX_UNLOCK_MINUTES;
use crate::domain::escalation::EscalationRule;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "atlas/v1";
pub const CONFIG_KIND: &str = "AtlasConfig";

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtlasConfigManifest {
    /// API version (must be "atlas/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "AtlasConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: AtlasConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtlasConfigSpec {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Directory of chain manifests loaded at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains_dir: Option<PathBuf>,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub guard: GuardConfig,

    #[serde(default)]
    pub environment_lock: EnvironmentLockConfig,

    #[serde(default)]
    pub escalation: EscalationConfig,

    #[serde(default)]
    pub agents: AgentsConfig,

    #[serde(default)]
    pub promotion: PromotionConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Default per-step agent timeout
    #[serde(default = "default_step_timeout", with = "humantime_serde")]
    pub step_timeout: Duration,

    /// Domain used for guard checks when a step declares none
    #[serde(default = "default_domain")]
    pub default_domain: String,

    /// Report success / failure lessons when executions finish
    #[serde(default = "default_true")]
    pub record_lessons: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Policy store lookups slower than this fail open
    #[serde(default = "default_policy_timeout", with = "humantime_serde")]
    pub policy_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentLockConfig {
    /// JSON state file used when storage is in-memory
    #[serde(default = "default_lock_file")]
    pub state_file: PathBuf,

    #[serde(default = "default_max_unlock_minutes")]
    pub max_unlock_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Target name → webhook URL
    #[serde(default)]
    pub targets: HashMap<String, String>,

    /// Replaces the default rule table when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<EscalationRule>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// agent_ref → webhook endpoint
    #[serde(default)]
    pub endpoints: HashMap<String, String>,

    /// HTTP client timeout ceiling for agent calls
    #[serde(default = "default_agent_timeout", with = "humantime_serde")]
    pub agent_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// Program and arguments; `{target}` is substituted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup_command: Vec<String>,

    #[serde(default = "default_backup_timeout", with = "humantime_serde")]
    pub backup_timeout: Duration,

    /// Environment name → directory holding its items
    #[serde(default)]
    pub environments: HashMap<String, PathBuf>,

    #[serde(default)]
    pub require_approval: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_domain() -> String {
    "general".to_string()
}

fn default_policy_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_lock_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".atlas")
        .join("environment-lock.json")
}

fn default_max_unlock_minutes() -> i64 {
    MAX_UNLOCK_MINUTES
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_agent_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_backup_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            step_timeout: default_step_timeout(),
            default_domain: default_domain(),
            record_lessons: true,
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            policy_timeout: default_policy_timeout(),
        }
    }
}

impl Default for EnvironmentLockConfig {
    fn default() -> Self {
        Self {
            state_file: default_lock_file(),
            max_unlock_minutes: default_max_unlock_minutes(),
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay: default_retry_delay(),
            targets: HashMap::new(),
            rules: None,
        }
    }
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            endpoints: HashMap::new(),
            agent_timeout: default_agent_timeout(),
        }
    }
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            backup_command: Vec::new(),
            backup_timeout: default_backup_timeout(),
            environments: HashMap::new(),
            require_approval: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for AtlasConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "atlas".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: CONFIG_KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: None,
                labels: None,
            },
            spec: AtlasConfigSpec::default(),
        }
    }
}

impl AtlasConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. ATLAS_CONFIG_PATH environment variable
    /// 2. ./atlas-config.yaml (working directory)
    /// 3. ~/.atlas/config.yaml (user home)
    /// 4. /etc/atlas/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("ATLAS_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./atlas-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".atlas").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/atlas/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::warn!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Container deployments override selected values via env vars
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ATLAS_DATABASE_URL") {
            tracing::info!("Environment override: ATLAS_DATABASE_URL (postgres backend)");
            self.spec.storage.backend = StorageBackendKind::Postgres;
            self.spec.storage.database_url = Some(url);
        }

        if let Ok(val) = std::env::var("ATLAS_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: ATLAS_PORT={}", port);
                    self.spec.server.port = port;
                }
                Err(_) => tracing::warn!("Invalid value for ATLAS_PORT: '{}'. Ignoring.", val),
            }
        }

        if let Ok(addr) = std::env::var("ATLAS_BIND_ADDRESS") {
            tracing::info!("Environment override: ATLAS_BIND_ADDRESS={}", addr);
            self.spec.server.bind_address = addr;
        }

        if let Ok(path) = std::env::var("ATLAS_LOCK_FILE") {
            tracing::info!("Environment override: ATLAS_LOCK_FILE={}", path);
            self.spec.environment_lock.state_file = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != CONFIG_KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, CONFIG_KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        if spec.storage.backend == StorageBackendKind::Postgres && spec.storage.database_url.is_none() {
            anyhow::bail!("spec.storage.database_url is required for the postgres backend");
        }

        let timeouts = [
            ("spec.executor.step_timeout", spec.executor.step_timeout),
            ("spec.guard.policy_timeout", spec.guard.policy_timeout),
            ("spec.agents.agent_timeout", spec.agents.agent_timeout),
            ("spec.promotion.backup_timeout", spec.promotion.backup_timeout),
        ];
        for (name, timeout) in timeouts {
            if timeout.is_zero() {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        let max = spec.environment_lock.max_unlock_minutes;
        if max <= 0 || max > MAX_UNLOCK_MINUTES {
            anyhow::bail!(
                "spec.environment_lock.max_unlock_minutes must be within 1..={} (got {})",
                MAX_UNLOCK_MINUTES,
                max
            );
        }

        if spec.escalation.max_attempts == 0 {
            anyhow::bail!("spec.escalation.max_attempts must be at least 1");
        }

        for (agent_ref, endpoint) in &spec.agents.endpoints {
            if endpoint.is_empty() {
                anyhow::bail!("Agent endpoint cannot be empty for: {}", agent_ref);
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.spec.server.bind_address, self.spec.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = AtlasConfigManifest::default();
        assert_eq!(manifest.api_version, "atlas/v1");
        assert_eq!(manifest.kind, "AtlasConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.server.port, 8000);
        assert_eq!(manifest.spec.executor.step_timeout, Duration::from_secs(300));
        assert_eq!(manifest.spec.escalation.max_attempts, 3);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_yaml_with_durations() {
        let yaml = r#"
apiVersion: atlas/v1
kind: AtlasConfig
metadata:
  name: atlas-prod
spec:
  storage:
    backend: postgres
    database_url: postgres://atlas@localhost/atlas
  guard:
    policy_timeout: 750ms
  escalation:
    retry_delay: 2s
    targets:
      supervisor: http://hooks.local/supervisor
  promotion:
    backup_command: ["./backup.sh", "{target}"]
    environments:
      dev: /srv/env/dev
      prod: /srv/env/prod
"#;
        let manifest = AtlasConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.storage.backend, StorageBackendKind::Postgres);
        assert_eq!(manifest.spec.guard.policy_timeout, Duration::from_millis(750));
        assert_eq!(manifest.spec.escalation.retry_delay, Duration::from_secs(2));
        assert_eq!(manifest.spec.promotion.environments.len(), 2);
        assert_eq!(manifest.spec.executor.default_domain, "general");
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut manifest = AtlasConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "WrongKind".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = CONFIG_KIND.to_string();

        manifest.metadata.name = String::new();
        assert!(manifest.validate().is_err());
        manifest.metadata.name = "atlas".to_string();

        manifest.spec.guard.policy_timeout = Duration::ZERO;
        assert!(manifest.validate().is_err());
        manifest.spec.guard.policy_timeout = Duration::from_secs(1);

        manifest.spec.environment_lock.max_unlock_minutes = 121;
        assert!(manifest.validate().is_err());
        manifest.spec.environment_lock.max_unlock_minutes = 60;

        manifest.spec.escalation.max_attempts = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.escalation.max_attempts = 1;

        manifest.spec.storage.backend = StorageBackendKind::Postgres;
        assert!(manifest.validate().is_err());
        manifest.spec.storage.database_url = Some("postgres://localhost/atlas".to_string());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_custom_escalation_rules_parse() {
        let yaml = r#"
apiVersion: atlas/v1
kind: AtlasConfig
metadata:
  name: atlas
spec:
  escalation:
    rules:
      - name: any-failure
        field: lesson_type
        comparator: eq
        value: failure
        target: dashboard
        priority: low
"#;
        let manifest = AtlasConfigManifest::from_yaml_str(yaml).unwrap();
        let rules = manifest.spec.escalation.rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].target, "dashboard");
    }
}
