// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Directory-backed environments.
//!
//! Each environment is a directory with one subdirectory per promotion
//! target (`schema/`, `data/`, `workflow/`). Every regular file in it is an
//! item; the item's fingerprint is the SHA-256 of its contents, so an item
//! whose contents changed in the source shows up as drift.
//!
//! The gateway doubles as a snapshot [`BackupService`] that copies an
//! environment into a timestamped directory under `backups_dir`.

use crate::domain::promotion::{
    BackupError, BackupService, EnvironmentGateway, EnvironmentItem, GatewayError, PromotionTarget,
};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

pub struct DirectoryEnvironmentGateway {
    environments: HashMap<String, PathBuf>,
    backups_dir: Option<PathBuf>,
}

impl DirectoryEnvironmentGateway {
    pub fn new(environments: HashMap<String, PathBuf>) -> Self {
        Self {
            environments,
            backups_dir: None,
        }
    }

    pub fn with_backups_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backups_dir = Some(dir.into());
        self
    }

    fn env_root(&self, env: &str) -> Result<&PathBuf, GatewayError> {
        self.environments
            .get(env)
            .ok_or_else(|| GatewayError::UnknownEnvironment(env.to_string()))
    }

    fn target_dir(&self, env: &str, target: PromotionTarget) -> Result<PathBuf, GatewayError> {
        Ok(self.env_root(env)?.join(target.as_str()))
    }

    fn item_path(dir: &Path, item: &str) -> Result<PathBuf, GatewayError> {
        let plain = !item.is_empty()
            && item != "."
            && item != ".."
            && !item.contains('/')
            && !item.contains('\\');
        if !plain {
            return Err(GatewayError::ItemNotFound(item.to_string()));
        }
        Ok(dir.join(item))
    }

    fn fingerprint(contents: &[u8]) -> String {
        hex::encode(Sha256::digest(contents))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> GatewayError {
    GatewayError::Io(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl EnvironmentGateway for DirectoryEnvironmentGateway {
    async fn list_items(&self, env: &str, target: PromotionTarget) -> Result<Vec<EnvironmentItem>, GatewayError> {
        let dir = self.target_dir(env, target)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let path = entry.path();
            if !entry.file_type().await.map_err(|e| io_error(&path, e))?.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(".tmp") {
                continue;
            }
            let contents = fs::read(&path).await.map_err(|e| io_error(&path, e))?;
            items.push(EnvironmentItem::new(name, Self::fingerprint(&contents)));
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn apply_item(
        &self,
        source_env: &str,
        dest_env: &str,
        target: PromotionTarget,
        item: &str,
    ) -> Result<(), GatewayError> {
        let source = Self::item_path(&self.target_dir(source_env, target)?, item)?;
        let dest_dir = self.target_dir(dest_env, target)?;
        let dest = Self::item_path(&dest_dir, item)?;

        let contents = match fs::read(&source).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GatewayError::ItemNotFound(item.to_string()))
            }
            Err(e) => return Err(io_error(&source, e)),
        };

        fs::create_dir_all(&dest_dir).await.map_err(|e| io_error(&dest_dir, e))?;
        let tmp = dest_dir.join(format!("{}.tmp", item));
        fs::write(&tmp, &contents).await.map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &dest).await.map_err(|e| io_error(&dest, e))?;

        debug!(item = %item, source = %source_env, dest = %dest_env, "Applied item");
        Ok(())
    }
}

async fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    let mut stack = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = stack.pop() {
        fs::create_dir_all(&dst).await?;
        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                stack.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), target).await?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl BackupService for DirectoryEnvironmentGateway {
    async fn snapshot(&self, target: &str, timeout: Duration) -> Result<String, BackupError> {
        let root = self
            .env_root(target)
            .map_err(|e| BackupError::Failed(e.to_string()))?
            .clone();
        let backups = self
            .backups_dir
            .clone()
            .unwrap_or_else(|| root.with_file_name(".atlas-backups"));

        let backup_id = format!("{}-{}", target, Utc::now().format("%Y%m%dT%H%M%S%.3fZ"));
        let dest = backups.join(&backup_id);

        tokio::time::timeout(timeout, copy_tree(&root, &dest))
            .await
            .map_err(|_| BackupError::Timeout(timeout))?
            .map_err(|e| BackupError::Failed(format!("{}: {}", dest.display(), e)))?;

        Ok(backup_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        gateway: DirectoryEnvironmentGateway,
        dev: PathBuf,
        prod: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let dev = dir.path().join("dev");
        let prod = dir.path().join("prod");
        std::fs::create_dir_all(dev.join("schema")).unwrap();
        std::fs::create_dir_all(prod.join("schema")).unwrap();
        let gateway = DirectoryEnvironmentGateway::new(HashMap::from([
            ("dev".to_string(), dev.clone()),
            ("prod".to_string(), prod.clone()),
        ]))
        .with_backups_dir(dir.path().join("backups"));
        Fixture { _dir: dir, gateway, dev, prod }
    }

    #[tokio::test]
    async fn test_fingerprints_follow_contents() {
        let f = fixture();
        std::fs::write(f.dev.join("schema/users.sql"), "create table users();").unwrap();
        std::fs::write(f.prod.join("schema/users.sql"), "create table users();").unwrap();

        let dev = f.gateway.list_items("dev", PromotionTarget::Schema).await.unwrap();
        let prod = f.gateway.list_items("prod", PromotionTarget::Schema).await.unwrap();
        assert_eq!(dev, prod);

        std::fs::write(f.dev.join("schema/users.sql"), "create table users(id int);").unwrap();
        let dev = f.gateway.list_items("dev", PromotionTarget::Schema).await.unwrap();
        assert_ne!(dev[0].fingerprint, prod[0].fingerprint);
    }

    #[tokio::test]
    async fn test_apply_copies_item() {
        let f = fixture();
        std::fs::write(f.dev.join("schema/orders.sql"), "create table orders();").unwrap();

        f.gateway
            .apply_item("dev", "prod", PromotionTarget::Schema, "orders.sql")
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(f.prod.join("schema/orders.sql")).unwrap(),
            "create table orders();"
        );
    }

    #[tokio::test]
    async fn test_apply_rejects_path_traversal() {
        let f = fixture();
        let err = f
            .gateway
            .apply_item("dev", "prod", PromotionTarget::Schema, "../secrets")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ItemNotFound(_)));
    }

    #[test]
    fn test_unknown_environment() {
        let f = fixture();
        assert!(matches!(
            tokio_test::block_on(f.gateway.list_items("staging", PromotionTarget::Schema)),
            Err(GatewayError::UnknownEnvironment(_))
        ));
        // Missing target directory is an empty environment
        let items = tokio_test::block_on(f.gateway.list_items("dev", PromotionTarget::Workflow)).unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_copies_environment() {
        let f = fixture();
        std::fs::write(f.prod.join("schema/users.sql"), "v1").unwrap();
        let id = f.gateway.snapshot("prod", Duration::from_secs(5)).await.unwrap();
        assert!(id.starts_with("prod-"));
        let copied = f._dir.path().join("backups").join(&id).join("schema/users.sql");
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "v1");
    }
}
