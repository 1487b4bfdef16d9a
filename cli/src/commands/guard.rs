// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Guard commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use serde_json::{json, Map, Value};

use super::connect;

#[derive(Subcommand)]
pub enum GuardCommand {
    /// Check a proposed action against the active policy rules
    Check {
        /// Free-text description of the action
        #[arg(value_name = "ACTION")]
        action: String,

        /// Domain the action belongs to
        #[arg(short, long)]
        domain: Option<String>,

        /// Agent proposing the action
        #[arg(short, long)]
        agent: Option<String>,

        /// Evidence entries as KEY=VALUE (repeatable)
        #[arg(short, long = "evidence", value_name = "KEY=VALUE", value_parser = parse_evidence)]
        evidence: Vec<(String, Value)>,

        /// Exit with an error when the action is blocked
        #[arg(long)]
        enforce: bool,
    },
}

fn parse_evidence(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err("evidence key cannot be empty".to_string());
    }
    // Values that parse as JSON keep their type, everything else is a string
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub async fn handle_command(command: GuardCommand, host: &str, port: u16) -> Result<()> {
    let client = connect(host, port).await?;

    match command {
        GuardCommand::Check {
            action,
            domain,
            agent,
            evidence,
            enforce,
        } => {
            let evidence: Map<String, Value> = evidence.into_iter().collect();
            let request = json!({
                "action": action,
                "domain": domain,
                "agent_id": agent,
                "evidence": evidence,
                "enforce": enforce,
            });
            let result = client.guard_check(&request).await?;

            if result.degraded {
                println!("{}", "⚠ Policy store unavailable, check failed open".yellow());
            }
            if result.blocked {
                println!("{}", "✗ BLOCKED".red().bold());
                for reason in &result.block_reasons {
                    println!("  {}", reason);
                }
            } else {
                println!("{}", "✓ Allowed".green());
            }
            for warning in &result.warnings {
                println!("  {} {}", "warning:".yellow(), warning);
            }
            if !result.alternatives.is_empty() {
                println!("  Alternatives:");
                for alternative in &result.alternatives {
                    println!("    - {}", alternative);
                }
            }
            if !result.matched_rules.is_empty() {
                let names: Vec<&str> = result.matched_rules.iter().map(|r| r.name.as_str()).collect();
                println!("  Matched rules: {}", names.join(", ").dimmed());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_evidence() {
        assert_eq!(
            parse_evidence("backup_id=bk-1").unwrap(),
            ("backup_id".to_string(), Value::String("bk-1".to_string()))
        );
        assert_eq!(parse_evidence("count=3").unwrap().1, json!(3));
        assert_eq!(parse_evidence("approved=true").unwrap().1, json!(true));
        assert!(parse_evidence("no-separator").is_err());
        assert!(parse_evidence("=value").is_err());
    }
}
