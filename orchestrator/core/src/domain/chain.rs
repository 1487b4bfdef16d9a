// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Chain Domain Model
//!
//! A chain is a named, versioned template of ordered steps. Each step is bound
//! to an external agent (`agent_ref`) and carries the input mapping used to
//! build the agent's input from the execution input and prior step outputs.
//!
//! # Architectural Context
//!
//! - **Bounded Context:** Execution Context
//! - **Aggregate Root:** Chain
//!
//! Chains are immutable once loaded. A running execution keeps its own copy
//! of the chain (copy-on-invoke), so re-registering a chain never changes an
//! execution already in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

// ============================================================================
// Aggregate Root: Chain
// ============================================================================

/// Chain template
///
/// # Invariants
/// - name is a DNS label (lowercase alphanumeric + hyphens, 1-63 chars)
/// - at least one step
/// - step names are unique within the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<StepDefinition>,
    pub registered_at: DateTime<Utc>,
}

impl Chain {
    /// Create a new Chain with validation
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: Option<String>,
        steps: Vec<StepDefinition>,
    ) -> Result<Self, ChainError> {
        let name = name.into();
        validate_name(&name)?;

        if steps.is_empty() {
            return Err(ChainError::NoSteps);
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if step.name.trim().is_empty() {
                return Err(ChainError::InvalidStep("step name cannot be empty".to_string()));
            }
            if step.agent_ref.trim().is_empty() {
                return Err(ChainError::InvalidStep(format!(
                    "step '{}' has no agent_ref",
                    step.name
                )));
            }
            if step.estimated_cost < 0.0 {
                return Err(ChainError::InvalidStep(format!(
                    "step '{}' has a negative cost estimate",
                    step.name
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ChainError::DuplicateStep(step.name.clone()));
            }
        }

        Ok(Self {
            name,
            version: version.into(),
            description,
            steps,
            registered_at: Utc::now(),
        })
    }

    pub fn step(&self, index: usize) -> Option<&StepDefinition> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sum of the declared per-step cost estimates
    pub fn estimated_cost(&self) -> f64 {
        self.steps.iter().map(|s| s.estimated_cost).sum()
    }

    /// Sum of the declared per-step duration estimates
    pub fn estimated_duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.estimated_duration_ms).sum()
    }
}

/// A single step in a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,

    /// Opaque agent identifier, resolved by the agent invoker
    pub agent_ref: String,

    /// Input mapping: agent input key -> handlebars template
    ///
    /// Templates see `input` (execution input), `steps.<name>` (outputs of
    /// earlier steps) and `previous` (output of the step right before).
    #[serde(default)]
    pub input: BTreeMap<String, String>,

    /// Text describing what the step does, checked by the guard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Policy domain for guard checks (falls back to the executor default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default)]
    pub estimated_cost: f64,

    #[serde(default)]
    pub estimated_duration_ms: u64,

    /// Mutates external state; the guard is consulted before dispatch
    #[serde(default)]
    pub sensitive: bool,

    /// Execution pauses before this step until approved
    #[serde(default)]
    pub requires_approval: bool,

    /// Evidence always supplied to the guard for this step
    #[serde(default)]
    pub evidence: BTreeMap<String, serde_json::Value>,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, agent_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_ref: agent_ref.into(),
            input: BTreeMap::new(),
            action: None,
            domain: None,
            estimated_cost: 0.0,
            estimated_duration_ms: 0,
            sensitive: false,
            requires_approval: false,
            evidence: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    pub fn requires_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn map_input(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.input.insert(key.into(), template.into());
        self
    }

    pub fn estimate(mut self, cost: f64, duration_ms: u64) -> Self {
        self.estimated_cost = cost;
        self.estimated_duration_ms = duration_ms;
        self
    }

    /// The action text handed to the guard
    pub fn action_text(&self) -> String {
        self.action
            .clone()
            .unwrap_or_else(|| format!("{} via {}", self.name, self.agent_ref))
    }
}

fn validate_name(name: &str) -> Result<(), ChainError> {
    if name.is_empty() || name.len() > 63 {
        return Err(ChainError::InvalidName("Name must be 1-63 characters".to_string()));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(ChainError::InvalidName(
            "Name must be lowercase alphanumeric + hyphens".to_string(),
        ));
    }

    let starts_ok = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let ends_ok = name.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if !starts_ok || !ends_ok {
        return Err(ChainError::InvalidName(
            "Name must start and end with alphanumeric".to_string(),
        ));
    }

    Ok(())
}

// ============================================================================
// Domain Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Chain must have at least one step")]
    NoSteps,

    #[error("Invalid chain name: {0}")]
    InvalidName(String),

    #[error("Duplicate step name '{0}'")]
    DuplicateStep(String),

    #[error("Invalid step: {0}")]
    InvalidStep(String),

    #[error("Invalid API version: expected 'atlas/v1', got '{0}'")]
    InvalidApiVersion(String),

    #[error("Invalid kind: expected 'Chain', got '{0}'")]
    InvalidKind(String),

    #[error("Template error in step '{step}': {message}")]
    Template { step: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> Vec<StepDefinition> {
        vec![
            StepDefinition::new("fetch", "scout").estimate(0.25, 1_000),
            StepDefinition::new("publish", "herald").sensitive(true).estimate(0.5, 2_000),
        ]
    }

    #[test]
    fn test_chain_creation() {
        let chain = Chain::new("daily-report", "1.0.0", None, steps()).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.estimated_cost(), 0.75);
        assert_eq!(chain.estimated_duration_ms(), 3_000);
    }

    #[test]
    fn test_chain_name_validation() {
        assert!(Chain::new("Daily", "1", None, steps()).is_err());
        assert!(Chain::new("-daily", "1", None, steps()).is_err());
        assert!(Chain::new("daily_report", "1", None, steps()).is_err());
        assert!(Chain::new("daily-2", "1", None, steps()).is_ok());
    }

    #[test]
    fn test_chain_rejects_empty_and_duplicate_steps() {
        assert!(matches!(
            Chain::new("empty", "1", None, vec![]),
            Err(ChainError::NoSteps)
        ));

        let dup = vec![
            StepDefinition::new("a", "x"),
            StepDefinition::new("a", "y"),
        ];
        assert!(matches!(
            Chain::new("dup", "1", None, dup),
            Err(ChainError::DuplicateStep(name)) if name == "a"
        ));
    }

    #[test]
    fn test_action_text_defaults_to_step_and_agent() {
        let step = StepDefinition::new("migrate", "db-agent");
        assert_eq!(step.action_text(), "migrate via db-agent");

        let step = step.action("modify prod supabase directly");
        assert_eq!(step.action_text(), "modify prod supabase directly");
    }
}
