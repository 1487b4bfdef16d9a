// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Input Template Engine
//!
//! Renders a step's input mapping and action text with Handlebars.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Turn `input:` mappings from chain manifests into agent input
//!
//! # Template context
//!
//! - `{{input.<key>}}` - execution input
//! - `{{steps.<name>.<key>}}` - output of an earlier step
//! - `{{previous.<key>}}` - output of the most recent completed step
//! - `{{execution_id}}`, `{{chain}}`
//!
//! A template consisting of a single `{{path}}` expression yields the
//! referenced JSON value unchanged (objects and numbers stay structured).
//! Anything else renders to a string.

use crate::domain::chain::{ChainError, StepDefinition};
use crate::domain::execution::ChainExecution;
use handlebars::Handlebars;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static SINGLE_EXPRESSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}$").ok());

/// Data visible to step templates
#[derive(Debug, Clone, Serialize)]
pub struct StepTemplateContext {
    pub input: Value,
    pub steps: Map<String, Value>,
    pub previous: Value,
    pub execution_id: String,
    pub chain: String,
}

impl StepTemplateContext {
    pub fn from_execution(execution: &ChainExecution) -> Self {
        Self {
            input: execution.input.clone(),
            steps: execution.step_outputs(),
            previous: execution.previous_output().cloned().unwrap_or(Value::Null),
            execution_id: execution.id.to_string(),
            chain: execution.chain_name.clone(),
        }
    }

    fn lookup(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let mut current = match segments.next()? {
            "input" => &self.input,
            "previous" => &self.previous,
            "steps" => {
                let name = segments.next()?;
                self.steps.get(name)?
            }
            _ => return None,
        };
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }
}

pub struct InputTemplateEngine {
    handlebars: Handlebars<'static>,
}

impl InputTemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Agent input is data, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    pub fn render(&self, template: &str, context: &StepTemplateContext) -> Result<String, String> {
        self.handlebars
            .render_template(template, context)
            .map_err(|e| e.to_string())
    }

    fn render_value(&self, template: &str, context: &StepTemplateContext) -> Result<Value, String> {
        let single = SINGLE_EXPRESSION
            .as_ref()
            .and_then(|re| re.captures(template.trim()))
            .and_then(|caps| caps.get(1).map(|m| m.as_str().to_string()));
        if let Some(value) = single.and_then(|path| context.lookup(&path)) {
            return Ok(value);
        }
        self.render(template, context).map(Value::String)
    }

    /// Agent input for `step`. Without a mapping the agent receives
    /// `{input, previous}`.
    pub fn render_step_input(
        &self,
        step: &StepDefinition,
        execution: &ChainExecution,
    ) -> Result<Map<String, Value>, ChainError> {
        let context = StepTemplateContext::from_execution(execution);
        if step.input.is_empty() {
            let mut map = Map::new();
            map.insert("input".to_string(), context.input);
            map.insert("previous".to_string(), context.previous);
            return Ok(map);
        }

        step.input
            .iter()
            .map(|(key, template)| {
                self.render_value(template, &context)
                    .map(|value| (key.clone(), value))
                    .map_err(|message| ChainError::Template {
                        step: step.name.clone(),
                        message: format!("input '{}': {}", key, message),
                    })
            })
            .collect()
    }

    /// Guard-checked action text with templates resolved
    pub fn render_action(&self, step: &StepDefinition, execution: &ChainExecution) -> Result<String, ChainError> {
        let context = StepTemplateContext::from_execution(execution);
        self.render(&step.action_text(), &context)
            .map_err(|message| ChainError::Template {
                step: step.name.clone(),
                message: format!("action: {}", message),
            })
    }

    /// Syntax check without rendering
    pub fn validate_template(template: &str) -> Result<(), String> {
        handlebars::Template::compile(template)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Check every template a step carries
    pub fn validate_step(step: &StepDefinition) -> Result<(), ChainError> {
        let action = step.action.iter().map(|a| ("action".to_string(), a));
        let inputs = step.input.iter().map(|(k, v)| (format!("input '{}'", k), v));
        for (label, template) in action.chain(inputs) {
            Self::validate_template(template).map_err(|message| ChainError::Template {
                step: step.name.clone(),
                message: format!("{}: {}", label, message),
            })?;
        }
        Ok(())
    }
}

impl Default for InputTemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}
