// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Backup service that shells out to an operator-provided command.
//!
//! `{target}` in any argument is replaced by the environment being backed
//! up. The last non-empty line the command prints is taken as the backup id.

use crate::domain::promotion::{BackupError, BackupService};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct CommandBackupService {
    command: Vec<String>,
}

impl CommandBackupService {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    fn render_args(&self, target: &str) -> Vec<String> {
        self.command.iter().map(|arg| arg.replace("{target}", target)).collect()
    }
}

#[async_trait]
impl BackupService for CommandBackupService {
    async fn snapshot(&self, target: &str, timeout: Duration) -> Result<String, BackupError> {
        let args = self.render_args(target);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| BackupError::Failed("no backup command configured".to_string()))?;

        debug!(program = %program, target = %target, "Running backup command");
        let child = Command::new(program)
            .args(rest)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackupError::Failed(format!("failed to spawn '{}': {}", program, e)))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| BackupError::Timeout(timeout))?
            .map_err(|e| BackupError::Failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, "Backup command failed");
            return Err(BackupError::Failed(format!("{}: {}", output.status, stderr.trim())));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or(BackupError::NoBackupId)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandBackupService {
        CommandBackupService::new(vec!["sh".into(), "-c".into(), script.into()])
    }

    #[tokio::test]
    async fn test_last_line_is_backup_id() {
        let service = sh("echo starting; echo 'bk-{target}-42'; echo");
        let id = service.snapshot("prod", Duration::from_secs(5)).await.unwrap();
        assert_eq!(id, "bk-prod-42");
    }

    #[tokio::test]
    async fn test_failure_exit_code() {
        let err = sh("echo nope >&2; exit 3").snapshot("prod", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, BackupError::Failed(msg) if msg.contains("nope")));
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = sh("sleep 5").snapshot("prod", Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, BackupError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_silent_command_has_no_id() {
        let err = sh("true").snapshot("prod", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, BackupError::NoBackupId));
    }

    #[tokio::test]
    async fn test_empty_command() {
        let err = CommandBackupService::new(vec![]).snapshot("prod", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, BackupError::Failed(_)));
    }
}
