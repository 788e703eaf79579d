//! Target-level failures.
//!
//! Everything below this level (an unreachable source, a bad manifest, one
//! artifact failing to package, one unreadable index entry) is logged and
//! skipped. A `SyncError` aborts the current target only.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::indexer::IndexError;
use crate::lock::LockError;

/// A failure that aborts one target.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No target of that name in the configuration.
    #[error("target '{0}' is not configured")]
    UnknownTarget(String),

    /// The published root could not be read or changed.
    #[error("published root {path}: {source}")]
    PublishedRoot {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// Another run holds the root's lock.
    #[error("{0} is locked by another run")]
    Locked(PathBuf),

    /// Taking the lock failed for another reason.
    #[error(transparent)]
    Lock(LockError),

    /// The index could not be written.
    #[error("index generation failed: {0}")]
    Index(#[from] IndexError),
}

impl SyncError {
    /// Wrap an I/O failure on the published root.
    pub fn root(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::PublishedRoot {
            path: path.into(),
            source,
        }
    }
}

impl From<LockError> for SyncError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Held(path) => Self::Locked(path),
            other => Self::Lock(other),
        }
    }
}
