// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Atlas CLI
//!
//! `atlas serve` runs the supervisor API in the foreground. Every other
//! command talks to a running server over HTTP.
//!
//! ## Commands
//!
//! - `atlas serve` - Run the API server
//! - `atlas chain register|list|start|status|advance|cancel|approve|executions`
//! - `atlas guard check` - Evaluate an action against policy rules
//! - `atlas lesson report|list`, `atlas rule list|add`, `atlas escalation list|retry`
//! - `atlas promote start|status|approve|list`
//! - `atlas lock status|unlock|lock`
//! - `atlas config show|validate|generate`, `atlas update`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use atlas_cli::commands::{
    self, ChainCommand, ConfigCommand, EscalationCommand, GuardCommand, LessonCommand, LockCommand, PromoteCommand,
    RuleCommand,
};
use atlas_cli::daemon;

/// Atlas - supervise agent chains, policy guards and environment promotions
#[derive(Parser)]
#[command(name = "atlas")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "ATLAS_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP API port of the server to talk to
    #[arg(long, global = true, env = "ATLAS_PORT", default_value = "8000")]
    port: u16,

    /// HTTP API host of the server to talk to
    #[arg(long, global = true, env = "ATLAS_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "ATLAS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (text or json)
    #[arg(long, global = true, env = "ATLAS_LOG_FORMAT", default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server in the foreground
    Serve {
        /// Bind address (overrides spec.server.bind_address)
        #[arg(long = "bind")]
        bind: Option<String>,

        /// Listen port (overrides spec.server.port)
        #[arg(long = "listen-port")]
        listen_port: Option<u16>,
    },

    /// Chain registration and execution
    Chain {
        #[command(subcommand)]
        command: ChainCommand,
    },

    /// Policy guard checks
    Guard {
        #[command(subcommand)]
        command: GuardCommand,
    },

    /// Lessons learned
    Lesson {
        #[command(subcommand)]
        command: LessonCommand,
    },

    /// Policy rules
    Rule {
        #[command(subcommand)]
        command: RuleCommand,
    },

    /// Escalations to humans
    Escalation {
        #[command(subcommand)]
        command: EscalationCommand,
    },

    /// Environment promotions
    Promote {
        #[command(subcommand)]
        command: PromoteCommand,
    },

    /// Production environment lock
    Lock {
        #[command(subcommand)]
        command: LockCommand,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Apply database migrations
    Update {
        #[command(flatten)]
        command: commands::UpdateCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_level, &cli.log_format)?;

    let host = cli.host.as_str();
    let port = cli.port;
    match cli.command {
        Some(Commands::Serve { bind, listen_port }) => {
            info!("Starting Atlas server");
            daemon::start_server(cli.config, bind, listen_port).await
        }
        Some(Commands::Chain { command }) => commands::chain::handle_command(command, host, port).await,
        Some(Commands::Guard { command }) => commands::guard::handle_command(command, host, port).await,
        Some(Commands::Lesson { command }) => commands::lesson::handle_command(command, host, port).await,
        Some(Commands::Rule { command }) => commands::rule::handle_command(command, host, port).await,
        Some(Commands::Escalation { command }) => commands::escalation::handle_command(command, host, port).await,
        Some(Commands::Promote { command }) => commands::promote::handle_command(command, host, port).await,
        Some(Commands::Lock { command }) => commands::lock::handle_command(command, host, port).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Update { command }) => commands::update::execute(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .init(),
        "text" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init(),
        other => anyhow::bail!("Unknown log format '{}' (expected text or json)", other),
    }

    Ok(())
}
