//! Durable file writes shared by the checkpoint store and the warehouse
//!
//! Every write goes to a temp file in the target directory, is fsynced, and
//! is atomically renamed over the target while holding an advisory write
//! lock on `<target>.lock`. Append-only files are extended with one write
//! under the same lock. Readers take the shared lock.

use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maximum size of any JSON document read back from disk (64 MB)
pub const MAX_DOCUMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Errors raised by durable file operations
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Filesystem error
    #[error("IO error on {path}: {source}")]
    Io {
        /// File involved in the failed operation
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Advisory lock could not be taken
    #[error("lock error on {path}: {message}")]
    Lock {
        /// Lock file path
        path: PathBuf,
        /// Failure description
        message: String,
    },

    /// Document exceeds [`MAX_DOCUMENT_SIZE`]
    #[error("{path} is too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        /// File path
        path: PathBuf,
        /// Actual size
        size: u64,
        /// Allowed size
        max: u64,
    },
}

impl PersistError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

fn open_lock_file(path: &Path) -> Result<File, PersistError> {
    let lock_path = lock_path_for(path);
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| PersistError::Lock {
            path: lock_path,
            message: format!("failed to open lock file: {e}"),
        })
}

/// Atomically replace `path` with `bytes`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| PersistError::io(&parent, e))?;

    let mut lock = RwLock::new(open_lock_file(path)?);
    let _guard = lock.write().map_err(|e| PersistError::Lock {
        path: lock_path_for(path),
        message: format!("failed to acquire write lock: {e}"),
    })?;

    let mut temp_file =
        tempfile::NamedTempFile::new_in(&parent).map_err(|e| PersistError::io(&parent, e))?;
    temp_file
        .write_all(bytes)
        .map_err(|e| PersistError::io(temp_file.path(), e))?;
    temp_file
        .flush()
        .map_err(|e| PersistError::io(temp_file.path(), e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| PersistError::io(temp_file.path(), e))?;
    temp_file
        .persist(path)
        .map_err(|e| PersistError::io(path, e.error))?;

    // the rename itself must survive a crash
    if let Ok(dir) = File::open(&parent) {
        let _ = dir.sync_all();
    }

    debug!(path = %path.display(), bytes = bytes.len(), "Wrote file atomically");
    Ok(())
}

/// Append `bytes` to `path` with a single write under the write lock, then sync
///
/// Concurrent appenders never interleave inside one call's bytes.
pub fn append_locked(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let mut lock = RwLock::new(open_lock_file(path)?);
    let _guard = lock.write().map_err(|e| PersistError::Lock {
        path: lock_path_for(path),
        message: format!("failed to acquire write lock: {e}"),
    })?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PersistError::io(path, e))?;
    file.write_all(bytes).map_err(|e| PersistError::io(path, e))?;
    file.sync_data().map_err(|e| PersistError::io(path, e))?;

    debug!(path = %path.display(), bytes = bytes.len(), "Appended to file");
    Ok(())
}

/// Read an append-only file under the shared lock; `None` when it does not exist
pub fn read_appended(path: &Path) -> Result<Option<String>, PersistError> {
    if !path.exists() {
        return Ok(None);
    }
    let lock = RwLock::new(open_lock_file(path)?);
    let _guard = lock.read().map_err(|e| PersistError::Lock {
        path: lock_path_for(path),
        message: format!("failed to acquire read lock: {e}"),
    })?;

    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PersistError::io(path, e)),
    }
}

/// Read a whole document under the shared lock, rejecting oversized files
pub fn read_locked(path: &Path) -> Result<String, PersistError> {
    let lock = RwLock::new(open_lock_file(path)?);
    let _guard = lock.read().map_err(|e| PersistError::Lock {
        path: lock_path_for(path),
        message: format!("failed to acquire read lock: {e}"),
    })?;

    let metadata = std::fs::metadata(path).map_err(|e| PersistError::io(path, e))?;
    if metadata.len() > MAX_DOCUMENT_SIZE {
        return Err(PersistError::TooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            max: MAX_DOCUMENT_SIZE,
        });
    }

    std::fs::read_to_string(path).map_err(|e| PersistError::io(path, e))
}
