// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Environment lock commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use atlas_core::application::environment_lock::LockStatus;

use super::connect;

#[derive(Subcommand)]
pub enum LockCommand {
    /// Show whether the production environment is locked
    Status,

    /// Open a temporary unlock window
    Unlock {
        /// Window length in minutes
        #[arg(short, long, default_value = "30")]
        minutes: i64,

        #[arg(short, long)]
        reason: String,

        #[arg(long)]
        by: String,
    },

    /// Re-engage the lock immediately
    Lock,
}

pub async fn handle_command(command: LockCommand, host: &str, port: u16) -> Result<()> {
    let client = connect(host, port).await?;

    let status = match command {
        LockCommand::Status => client.lock_status().await?,
        LockCommand::Unlock { minutes, reason, by } => client.unlock(minutes, &reason, &by).await?,
        LockCommand::Lock => client.lock().await?,
    };
    print_status(&status);

    Ok(())
}

fn print_status(status: &LockStatus) {
    if status.locked {
        println!("{}", "🔒 Environment locked".red().bold());
        return;
    }
    println!("{}", "🔓 Environment unlocked".green().bold());
    if let Some(expiry) = status.unlock_expiry {
        let remaining = status.remaining_seconds.unwrap_or(0).max(0);
        println!(
            "  Relocks at {} ({}m {}s left)",
            expiry.format("%Y-%m-%d %H:%M:%S UTC"),
            remaining / 60,
            remaining % 60
        );
    }
    if let Some(reason) = &status.unlock_reason {
        println!("  Reason: {}", reason);
    }
    if let Some(by) = &status.unlocked_by {
        println!("  Unlocked by: {}", by);
    }
}
