// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Escalation commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use super::connect;

#[derive(Subcommand)]
pub enum EscalationCommand {
    /// List escalations, most recent first
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Redeliver pending escalations
    Retry,
}

pub async fn handle_command(command: EscalationCommand, host: &str, port: u16) -> Result<()> {
    let client = connect(host, port).await?;

    match command {
        EscalationCommand::List { limit } => {
            let escalations = client.list_escalations(limit).await?;
            if escalations.is_empty() {
                println!("{}", "No escalations".yellow());
            }
            for escalation in escalations {
                let status = if escalation.is_pending() {
                    escalation.status.as_str().yellow()
                } else {
                    escalation.status.as_str().green()
                };
                println!(
                    "{} {:<8} {:<10} -> {} ({} attempts)",
                    escalation.id, escalation.priority, status, escalation.target, escalation.attempts
                );
                println!("  {}", escalation.reason);
                if let Some(error) = &escalation.last_error {
                    println!("  {} {}", "last error:".red(), error);
                }
            }
        }
        EscalationCommand::Retry => {
            let summary = client.retry_escalations().await?;
            println!(
                "Retried {}: {} delivered, {} still pending",
                summary.attempted, summary.delivered, summary.still_pending
            );
        }
    }

    Ok(())
}
