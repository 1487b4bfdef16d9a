// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Atlas CLI

pub mod chain;
pub mod config;
pub mod escalation;
pub mod guard;
pub mod lesson;
pub mod lock;
pub mod promote;
pub mod rule;
pub mod update;

pub use self::chain::ChainCommand;
pub use self::config::ConfigCommand;
pub use self::escalation::EscalationCommand;
pub use self::guard::GuardCommand;
pub use self::lesson::LessonCommand;
pub use self::lock::LockCommand;
pub use self::promote::PromoteCommand;
pub use self::rule::RuleCommand;
pub use self::update::UpdateCommand;

use anyhow::Result;
use colored::Colorize;
use serde_json::Value;
use std::path::Path;

use crate::daemon::{check_server_running, AtlasClient, ServerStatus};

/// Client for a reachable server, or an error telling the user to start one
pub(crate) async fn connect(host: &str, port: u16) -> Result<AtlasClient> {
    match check_server_running(host, port).await? {
        ServerStatus::Running { .. } => AtlasClient::new(host, port),
        ServerStatus::Unhealthy { error } => {
            anyhow::bail!("Atlas server at {}:{} is unhealthy: {}", host, port, error)
        }
        ServerStatus::Stopped => anyhow::bail!(
            "Atlas server is not running at {}:{}. Start it with 'atlas serve'.",
            host,
            port
        ),
    }
}

/// Parse `--input` as inline JSON or `@file.json`
pub(crate) fn parse_json_arg(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path))
            .map_err(|e| anyhow::anyhow!("Failed to read input file {}: {}", path, e))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("Input is not valid JSON: {}", e))
}

pub(crate) fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn status_colored(status: &str) -> colored::ColoredString {
    match status {
        "completed" => status.green(),
        "failed" | "cancelled" => status.red(),
        "paused" | "awaiting_approval" => status.yellow(),
        _ => status.cyan(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_arg() {
        assert_eq!(parse_json_arg(None).unwrap(), serde_json::json!({}));
        assert_eq!(parse_json_arg(Some(r#"{"a":1}"#)).unwrap()["a"], 1);
        assert!(parse_json_arg(Some("not json")).is_err());

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("input.json");
        std::fs::write(&file, r#"{"ticket":"OPS-1"}"#).unwrap();
        let value = parse_json_arg(Some(&format!("@{}", file.display()))).unwrap();
        assert_eq!(value["ticket"], "OPS-1");
    }
}
