// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Promotion commands
//!
//! Commands: start, status, approve, list

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use uuid::Uuid;

use atlas_core::domain::promotion::{PromotionRequest, PromotionRun, PromotionStage, PromotionTarget, StageStatus};

use super::{connect, print_json, status_colored};

#[derive(Subcommand)]
pub enum PromoteCommand {
    /// Promote a change set between environments
    Start {
        /// schema, data or workflow
        #[arg(short, long, value_parser = parse_target)]
        target: PromotionTarget,

        /// Source environment
        #[arg(long = "from", default_value = "dev")]
        source_env: String,

        /// Destination environment
        #[arg(long = "to", default_value = "prod")]
        dest_env: String,

        #[arg(long, default_value = "cli")]
        by: String,

        /// Pause after the diff until approved
        #[arg(long, conflicts_with = "no_approval")]
        require_approval: bool,

        /// Apply without waiting for approval
        #[arg(long)]
        no_approval: bool,
    },

    /// Show a promotion run
    Status {
        #[arg(value_name = "PROMOTION_ID")]
        promotion_id: Uuid,

        #[arg(long)]
        json: bool,
    },

    /// Approve a run awaiting approval and apply it
    Approve {
        #[arg(value_name = "PROMOTION_ID")]
        promotion_id: Uuid,

        #[arg(long)]
        by: String,
    },

    /// List recent promotion runs
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

fn parse_target(raw: &str) -> Result<PromotionTarget, String> {
    PromotionTarget::parse(raw).ok_or_else(|| format!("unknown promotion target '{}'", raw))
}

pub async fn handle_command(command: PromoteCommand, host: &str, port: u16) -> Result<()> {
    let client = connect(host, port).await?;

    match command {
        PromoteCommand::Start {
            target,
            source_env,
            dest_env,
            by,
            require_approval,
            no_approval,
        } => {
            let require_approval = match (require_approval, no_approval) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let request = PromotionRequest {
                target,
                source_env,
                dest_env,
                initiated_by: by,
                require_approval,
            };
            let run = client.start_promotion(&request).await?;
            print_run(&run);
        }
        PromoteCommand::Status { promotion_id, json } => {
            let run = client.get_promotion(promotion_id).await?;
            if json {
                print_json(&run)?;
            } else {
                print_run(&run);
            }
        }
        PromoteCommand::Approve { promotion_id, by } => {
            let run = client.approve_promotion(promotion_id, &by).await?;
            print_run(&run);
        }
        PromoteCommand::List { limit } => {
            let runs = client.list_promotions(limit).await?;
            if runs.is_empty() {
                println!("{}", "No promotions".yellow());
            }
            for run in runs {
                println!(
                    "{} {:<8} {} -> {} {}",
                    run.id,
                    run.target.as_str(),
                    run.source_env,
                    run.dest_env,
                    status_colored(run.status.as_str())
                );
            }
        }
    }

    Ok(())
}

fn print_run(run: &PromotionRun) {
    println!(
        "{} {} {} -> {}",
        "Promotion".bold(),
        run.id,
        run.source_env,
        run.dest_env
    );
    println!("  Target: {}", run.target);
    println!("  Status: {}", status_colored(run.status.as_str()));
    for stage in PromotionStage::ALL {
        let Some(record) = run.stage(stage) else {
            continue;
        };
        let marker = match record.status {
            StageStatus::Completed => "✓".green(),
            StageStatus::Failed => "✗".red(),
            StageStatus::Running => "…".cyan(),
            StageStatus::Pending => "·".dimmed(),
        };
        print!("  {} {}", marker, stage.as_str());
        if let Some(detail) = &record.detail {
            print!(" ({})", detail);
        }
        if let Some(error) = &record.error {
            print!(": {}", error.red());
        }
        println!();
    }
    if let Some(backup_id) = &run.backup_id {
        println!("  Backup: {}", backup_id);
    }
    if !run.applied_items.is_empty() {
        println!("  Applied: {}", run.applied_items.join(", "));
    }
    if let Some(item) = &run.failed_item {
        println!("  {} {}", "Failed item:".red(), item);
    }
    for warning in &run.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
    if let Some(reason) = &run.failure_reason {
        println!("  {} {}", "Reason:".red().bold(), reason);
    }
}
