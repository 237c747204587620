//! Single-writer guard for a checkpoint file
//!
//! Advisory lock on `<checkpoint>.run.lock`, distinct from the per-write
//! lock taken by the persist layer.

use super::CheckpointError;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Lock file guarding one checkpoint store against concurrent runs
pub struct RunLock {
    path: PathBuf,
    lock: RwLock<File>,
}

impl RunLock {
    /// Open (creating if needed) the run lock for `checkpoint_path`
    pub fn open(checkpoint_path: &Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = checkpoint_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CheckpointError::Lock(format!("{}: {e}", parent.display())))?;
            }
        }

        let path = checkpoint_path.with_extension("run.lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CheckpointError::Lock(format!("failed to open {}: {e}", path.display())))?;

        Ok(Self {
            path,
            lock: RwLock::new(file),
        })
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock without blocking; held until the guard drops
    pub fn try_exclusive(&mut self) -> Result<RwLockWriteGuard<'_, File>, CheckpointError> {
        let path = self.path.clone();
        self.lock.try_write().map_err(|e| {
            CheckpointError::Lock(format!(
                "another run holds {} ({e})",
                path.display()
            ))
        })
    }
}
