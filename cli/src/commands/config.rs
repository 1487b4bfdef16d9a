// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use atlas_core::domain::config::{AtlasConfigManifest, StorageBackendKind};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default filled in
    Generate {
        #[arg(short, long, default_value = "./atlas-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, force } => generate(output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = AtlasConfigManifest::load_or_default(config_override.clone()).context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. ATLAS_CONFIG_PATH: {}",
            std::env::var("ATLAS_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./atlas-config.yaml");
        println!("  4. ~/.atlas/config.yaml");
        println!("  5. /etc/atlas/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", config.to_yaml_string()?);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!("  Listen: {}", config.bind_address());
    println!();

    println!("{}", "Storage:".bold());
    match spec.storage.backend {
        StorageBackendKind::InMemory => println!("  Backend: in_memory"),
        StorageBackendKind::Postgres => {
            println!("  Backend: postgres");
            // The URL may carry credentials
            let configured = if spec.storage.database_url.is_some() { "set" } else { "missing" };
            println!("  Database URL: {}", configured);
        }
    }
    println!("  Lock state file: {}", spec.environment_lock.state_file.display());
    println!();

    println!("{}", "Agents:".bold());
    if spec.agents.endpoints.is_empty() {
        println!("  {}", "(none configured)".dimmed());
    }
    let mut agents: Vec<_> = spec.agents.endpoints.iter().collect();
    agents.sort();
    for (name, url) in agents {
        println!("  {} → {}", name, url);
    }
    println!();

    println!("{}", "Promotion environments:".bold());
    let mut envs: Vec<_> = spec.promotion.environments.iter().collect();
    envs.sort();
    for (name, path) in envs {
        println!("  {} → {}", name, path.display());
    }
    println!(
        "  Require approval: {}",
        if spec.promotion.require_approval { "yes" } else { "no" }
    );
    println!();

    println!("{}", "Escalation:".bold());
    println!("  Targets: {}", spec.escalation.targets.len());
    println!("  Max attempts: {}", spec.escalation.max_attempts);

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = AtlasConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let yaml = AtlasConfigManifest::default().to_yaml_string()?;
    std::fs::write(&output, yaml).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_config_loads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("atlas-config.yaml");

        generate(output.clone(), false).unwrap();
        let loaded = AtlasConfigManifest::from_yaml_file(&output).unwrap();
        loaded.validate().unwrap();

        assert!(generate(output.clone(), false).is_err());
        generate(output, true).unwrap();
    }
}
