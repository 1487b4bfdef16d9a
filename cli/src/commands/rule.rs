// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Policy rule commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use serde_json::json;

use atlas_core::domain::policy::{RuleAction, Severity};

use super::lesson::parse_severity;
use super::{connect, print_json};

#[derive(Subcommand)]
pub enum RuleCommand {
    /// List active policy rules
    List {
        #[arg(long)]
        json: bool,
    },

    /// Add a policy rule
    Add {
        #[arg(value_name = "NAME")]
        name: String,

        /// block, warn, require or suggest
        #[arg(short, long, value_parser = parse_action)]
        action: RuleAction,

        #[arg(short, long, default_value = "medium", value_parser = parse_severity)]
        severity: Severity,

        /// Trigger keyword (repeatable)
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,

        /// Regex matched against the action text
        #[arg(short, long)]
        pattern: Option<String>,

        /// Restrict to a domain (repeatable)
        #[arg(long = "for-domain")]
        domains: Vec<String>,

        /// Restrict to an agent (repeatable)
        #[arg(long = "for-agent")]
        agents: Vec<String>,

        #[arg(long = "alternative")]
        alternatives: Vec<String>,

        /// Evidence key a `require` rule expects
        #[arg(long)]
        required_action: Option<String>,

        #[arg(short, long)]
        message: Option<String>,

        /// Only warn, never block
        #[arg(long)]
        advisory: bool,
    },
}

fn parse_action(raw: &str) -> Result<RuleAction, String> {
    RuleAction::parse(raw).ok_or_else(|| format!("unknown rule action '{}'", raw))
}

pub async fn handle_command(command: RuleCommand, host: &str, port: u16) -> Result<()> {
    let client = connect(host, port).await?;

    match command {
        RuleCommand::List { json } => {
            let rules = client.list_rules().await?;
            if json {
                return print_json(&rules);
            }
            if rules.is_empty() {
                println!("{}", "No active rules".yellow());
            }
            for rule in rules {
                let enforced = if rule.enforced { "enforced" } else { "advisory" };
                println!(
                    "{} {} [{} / {} / {}]",
                    rule.id,
                    rule.name.bold(),
                    rule.action.as_str(),
                    rule.severity,
                    enforced
                );
                if !rule.trigger_keywords.is_empty() {
                    println!("  keywords: {}", rule.trigger_keywords.join(", "));
                }
                if let Some(pattern) = &rule.trigger_pattern {
                    println!("  pattern: {}", pattern.as_str());
                }
            }
        }
        RuleCommand::Add {
            name,
            action,
            severity,
            keywords,
            pattern,
            domains,
            agents,
            alternatives,
            required_action,
            message,
            advisory,
        } => {
            let request = json!({
                "name": name,
                "action": action,
                "severity": severity,
                "trigger_keywords": keywords,
                "trigger_pattern": pattern,
                "applies_to_domains": domains,
                "applies_to_agents": agents,
                "alternatives": alternatives,
                "required_action": required_action,
                "message": message,
                "enforced": if advisory { Some(false) } else { None },
            });
            let rule = client.create_rule(&request).await?;
            println!("{}", format!("✓ Rule created: {} ({})", rule.name, rule.id).green());
        }
    }

    Ok(())
}
