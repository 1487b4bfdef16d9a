// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Lesson commands

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use atlas_core::domain::lesson::{LessonReport, LessonType};
use atlas_core::domain::policy::Severity;

use super::{connect, print_json};

#[derive(Subcommand)]
pub enum LessonCommand {
    /// Report a lesson learned
    Report {
        /// success, failure, workaround, discovery or anti_pattern
        #[arg(short = 't', long = "type", value_parser = parse_lesson_type)]
        lesson_type: LessonType,

        #[arg(short, long)]
        domain: String,

        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        context: String,

        #[arg(long, default_value = "")]
        outcome: String,

        #[arg(long)]
        solution: Option<String>,

        /// low, medium, high or critical
        #[arg(short, long, default_value = "medium", value_parser = parse_severity)]
        severity: Severity,

        #[arg(long, default_value = "0.5")]
        confidence: f64,

        /// Keywords an anti_pattern lesson turns into a blocking rule (repeatable)
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,

        /// Suggested alternative actions (repeatable)
        #[arg(long = "alternative")]
        alternatives: Vec<String>,

        #[arg(long, default_value = "cli")]
        source: String,
    },

    /// List recorded lessons, most recent first
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
}

pub(crate) fn parse_lesson_type(raw: &str) -> Result<LessonType, String> {
    LessonType::parse(raw).ok_or_else(|| format!("unknown lesson type '{}'", raw))
}

pub(crate) fn parse_severity(raw: &str) -> Result<Severity, String> {
    Severity::parse(raw).ok_or_else(|| format!("unknown severity '{}'", raw))
}

pub async fn handle_command(command: LessonCommand, host: &str, port: u16) -> Result<()> {
    let client = connect(host, port).await?;

    match command {
        LessonCommand::Report {
            lesson_type,
            domain,
            title,
            context,
            outcome,
            solution,
            severity,
            confidence,
            keywords,
            alternatives,
            source,
        } => {
            let mut report = LessonReport::new(lesson_type, domain, title, source)
                .context(context)
                .outcome(outcome)
                .severity(severity)
                .keywords(keywords)
                .alternatives(alternatives);
            report.solution = solution;
            report.confidence = confidence;

            let recorded = client.report_lesson(&report).await?;
            let id = recorded["id"].as_str().unwrap_or_default();
            if recorded["deduped_existing"].as_bool().unwrap_or(false) {
                println!(
                    "{}",
                    format!(
                        "✓ Matched existing lesson {} (seen {} times)",
                        id, recorded["occurrence_count"]
                    )
                    .green()
                );
            } else {
                println!("{}", format!("✓ Lesson recorded: {}", id).green());
            }
            if let Some(rule_id) = recorded["derived_rule_id"].as_str() {
                println!("  Derived policy rule {}", rule_id);
            }
            if let Some(escalations) = recorded["escalations"].as_array() {
                for escalation in escalations {
                    println!(
                        "  {} escalated to {} ({})",
                        "⚠".yellow(),
                        escalation["target"].as_str().unwrap_or("?"),
                        escalation["status"].as_str().unwrap_or("?")
                    );
                }
            }
        }
        LessonCommand::List { limit, json } => {
            let lessons = client.list_lessons(limit).await?;
            if json {
                return print_json(&lessons);
            }
            if lessons.is_empty() {
                println!("{}", "No lessons recorded".yellow());
            }
            for lesson in lessons {
                println!(
                    "{} [{}] {} ({}, x{})",
                    lesson.id,
                    lesson.lesson_type.as_str(),
                    lesson.title.bold(),
                    lesson.domain,
                    lesson.occurrence_count
                );
            }
        }
    }

    Ok(())
}
