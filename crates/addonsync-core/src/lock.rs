//! Single-writer guard for a published root.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use thiserror::Error;
use tracing::debug;

use crate::layout;

/// Errors taking the root lock.
#[derive(Error, Debug)]
pub enum LockError {
    /// Another run holds the lock on this root.
    #[error("{0} is locked by another run")]
    Held(PathBuf),

    /// The lock file could not be opened or locked.
    #[error("failed to lock {path}: {source}")]
    Io {
        /// The lock file.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

/// Exclusive advisory lock on `<root>/.addonsync.lock`, released on drop.
#[derive(Debug)]
pub struct RootLock {
    file: File,
    path: PathBuf,
}

impl RootLock {
    /// Take the lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Held`] if another process (or another handle in
    /// this process) holds it.
    pub fn acquire(root: &Path) -> Result<Self, LockError> {
        let path = root.join(layout::LOCK_FILE);
        let file = match OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
        {
            Ok(file) => file,
            Err(source) => return Err(LockError::Io { path, source }),
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(lock = %path.display(), "acquired");
                Ok(Self { file, path })
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Err(LockError::Held(root.to_path_buf())),
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(lock = %self.path.display(), "unlock failed: {e}");
        }
    }
}
