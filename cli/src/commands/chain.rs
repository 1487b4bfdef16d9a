// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Chain commands
//!
//! Commands: register, list, start, status, advance, cancel, approve, executions

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use uuid::Uuid;

use atlas_core::domain::execution::ChainExecution;
use atlas_core::infrastructure::chain_parser::{ChainManifest, ChainParser};

use super::{connect, parse_json_arg, print_json, status_colored};

#[derive(Subcommand)]
pub enum ChainCommand {
    /// Register a chain from a manifest file
    Register {
        /// Path to chain manifest YAML file
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
    },

    /// List registered chains
    List,

    /// Start an execution of a chain
    Start {
        /// Chain name
        #[arg(value_name = "CHAIN")]
        name: String,

        /// Input data (JSON string or @file.json)
        #[arg(short, long, value_name = "INPUT")]
        input: Option<String>,

        /// Recorded as the execution's trigger
        #[arg(long, default_value = "cli")]
        triggered_by: String,

        /// Run steps until the execution finishes or pauses
        #[arg(short, long)]
        run: bool,
    },

    /// Show an execution
    Status {
        #[arg(value_name = "EXECUTION_ID")]
        execution_id: Uuid,

        /// Print the full execution as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the current step of an execution
    Advance {
        #[arg(value_name = "EXECUTION_ID")]
        execution_id: Uuid,

        /// Only advance if the execution is still at this step
        #[arg(long)]
        expected_step: Option<usize>,
    },

    /// Cancel an execution
    Cancel {
        #[arg(value_name = "EXECUTION_ID")]
        execution_id: Uuid,
    },

    /// Approve the paused step of an execution
    Approve {
        #[arg(value_name = "EXECUTION_ID")]
        execution_id: Uuid,

        #[arg(long)]
        by: String,
    },

    /// List recent executions
    Executions {
        /// Show only executions of this chain
        #[arg(long)]
        chain: Option<String>,

        /// Maximum number of results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

pub async fn handle_command(command: ChainCommand, host: &str, port: u16) -> Result<()> {
    let client = connect(host, port).await?;

    match command {
        ChainCommand::Register { manifest } => {
            // Validate locally so manifest errors point at the file
            let content = std::fs::read_to_string(&manifest)
                .with_context(|| format!("Failed to read manifest {:?}", manifest))?;
            ChainParser::parse_yaml(&content).with_context(|| format!("Invalid chain manifest {:?}", manifest))?;
            let parsed: ChainManifest = serde_yaml::from_str(&content)?;

            let chain = client.register_chain(&parsed).await?;
            println!(
                "{}",
                format!("✓ Registered chain {} v{} ({} steps)", chain.name, chain.version, chain.steps.len()).green()
            );
        }
        ChainCommand::List => {
            let chains = client.list_chains().await?;
            if chains.is_empty() {
                println!("{}", "No chains registered".yellow());
            }
            for chain in chains {
                println!("{} {} ({} steps)", chain.name.bold(), chain.version.dimmed(), chain.steps.len());
                if let Some(description) = &chain.description {
                    println!("  {}", description);
                }
            }
        }
        ChainCommand::Start {
            name,
            input,
            triggered_by,
            run,
        } => {
            let input = parse_json_arg(input.as_deref())?;
            let execution = client.start_chain(&name, input, &triggered_by, run).await?;
            println!("{}", format!("✓ Execution started: {}", execution.id).green());
            print_execution(&execution);
        }
        ChainCommand::Status { execution_id, json } => {
            let execution = client.get_execution(execution_id).await?;
            if json {
                print_json(&execution)?;
            } else {
                print_execution(&execution);
            }
        }
        ChainCommand::Advance {
            execution_id,
            expected_step,
        } => {
            let execution = client.advance_execution(execution_id, expected_step).await?;
            print_execution(&execution);
        }
        ChainCommand::Cancel { execution_id } => {
            let execution = client.cancel_execution(execution_id).await?;
            if execution.cancel_requested && !execution.is_terminal() {
                println!("{}", "ℹ Cancellation requested; the running step will finish first".yellow());
            } else {
                println!("{}", "✓ Execution cancelled".green());
            }
        }
        ChainCommand::Approve { execution_id, by } => {
            let execution = client.approve_execution(execution_id, &by).await?;
            println!("{}", format!("✓ Step approved by {}", by).green());
            print_execution(&execution);
        }
        ChainCommand::Executions { chain, limit } => {
            let executions = client.list_executions(chain.as_deref(), limit).await?;
            if executions.is_empty() {
                println!("{}", "No executions found".yellow());
            }
            for execution in executions {
                println!(
                    "{}  {:<24} {:<10} step {}/{}",
                    execution.id,
                    execution.chain_name,
                    status_colored(execution.status.as_str()),
                    execution.current_step_index,
                    execution.chain.steps.len()
                );
            }
        }
    }

    Ok(())
}

fn print_execution(execution: &ChainExecution) {
    println!("{}", format!("Execution {}", execution.id).bold());
    println!("  Chain: {}", execution.chain_name);
    println!("  Status: {}", status_colored(execution.status.as_str()));
    println!(
        "  Step: {}/{}",
        execution.current_step_index,
        execution.chain.steps.len()
    );
    println!("  Cost: {:.4}", execution.total_cost);
    for result in execution.step_results() {
        let line = format!(
            "    [{}] {} via {} ({} ms)",
            result.status.as_str(),
            result.step_name,
            result.agent_ref,
            result.duration_ms
        );
        println!("{}", line);
        for warning in &result.warnings {
            println!("      {} {}", "warning:".yellow(), warning);
        }
        if let Some(error) = &result.error {
            println!("      {} {}", "error:".red(), error);
        }
    }
    if let Some(reason) = &execution.failure_reason {
        println!("  {} {}", "Reason:".red().bold(), reason);
    }
}
