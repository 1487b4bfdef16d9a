// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Environment lock persisted as a small JSON file.
//!
//! Writes go to a sibling temp file that is renamed over the target, so a
//! crash mid-write leaves the previous state intact. A missing or empty file
//! reads as engaged.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use crate::domain::environment_lock::EnvironmentLock;
use crate::domain::repository::{EnvironmentLockStore, RepositoryError};

pub struct FileEnvironmentLockStore {
    path: PathBuf,
    // Serializes read-compare-write within this process
    guard: Mutex<()>,
}

impl FileEnvironmentLockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_state(&self) -> Result<EnvironmentLock, RepositoryError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(EnvironmentLock::engaged()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EnvironmentLock::engaged()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_state(&self, lock: &EnvironmentLock) -> Result<(), RepositoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(lock)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl EnvironmentLockStore for FileEnvironmentLockStore {
    async fn load(&self) -> Result<EnvironmentLock, RepositoryError> {
        let _guard = self.guard.lock();
        self.read_state()
    }

    async fn compare_and_swap(
        &self,
        expected: &EnvironmentLock,
        new: &EnvironmentLock,
    ) -> Result<bool, RepositoryError> {
        let _guard = self.guard.lock();
        if self.read_state()? != *expected {
            return Ok(false);
        }
        self.write_state(new)?;
        Ok(true)
    }
}
