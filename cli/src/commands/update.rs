// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Database Update Command
//!
//! Applies the bundled SQL migrations to the PostgreSQL database used by the
//! `postgres` storage backend.
//!
//! ```bash
//! # Apply all pending migrations
//! atlas update
//!
//! # Preview migrations without applying
//! atlas update --dry-run
//! ```
//!
//! The database URL comes from `--database-url`, `ATLAS_DATABASE_URL`, or
//! `spec.storage.database_url` in the configuration file, in that order.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;

use atlas_core::domain::config::AtlasConfigManifest;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Args)]
pub struct UpdateCommand {
    /// Perform a dry run without applying changes
    #[arg(long)]
    dry_run: bool,

    #[arg(long, env = "ATLAS_DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,
}

pub async fn execute(cmd: UpdateCommand, config_path: Option<PathBuf>) -> Result<()> {
    println!("{}", "Atlas Update".bold().green());

    let database_url = match cmd.database_url {
        Some(url) => url,
        None => AtlasConfigManifest::load_or_default(config_path)
            .context("Failed to load configuration")?
            .spec
            .storage
            .database_url
            .context("No database URL: set ATLAS_DATABASE_URL or spec.storage.database_url")?,
    };

    println!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    // The tracking table does not exist before the first run
    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success")
        .fetch_all(&pool)
        .await
        .unwrap_or_default();

    let pending: Vec<_> = MIGRATOR
        .iter()
        .filter(|migration| !applied.contains(&migration.version))
        .collect();

    println!(
        "Migration status: {} applied, {} total available.",
        applied.len(),
        MIGRATOR.iter().count()
    );

    if pending.is_empty() {
        println!("{}", "✓ Database is up to date.".green());
        return Ok(());
    }

    if cmd.dry_run {
        println!("Pending migrations found (Dry Run):");
        for migration in pending {
            println!(" - {} {}", migration.version, migration.description);
        }
        println!("Skipping application due to --dry-run");
        return Ok(());
    }

    println!("Applying pending migrations...");
    MIGRATOR.run(&pool).await.context("Failed to apply migrations")?;
    println!("{}", "✓ Database updated successfully.".green());

    Ok(())
}
