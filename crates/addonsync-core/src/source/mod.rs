//! Upstream package sources.
//!
//! A source enumerates package roots for a ref and knows how to turn a
//! [`LocationRef`] back into a file tree. Sources never modify anything.

pub mod binary;
pub mod directory;
pub mod git;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use addonsync_schema::Platform;
use thiserror::Error;

use crate::config::{SourceConfig, SourceKind};
use crate::io::extract::{self, ExtractError};

pub use binary::BinarySource;
pub use directory::DirectorySource;
pub use git::GitSource;

/// Errors reading an upstream source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The location or ref does not exist. Recoverable: the scan moves on.
    #[error("source unreachable: {0}")]
    Unreachable(String),

    /// An external command exited unsuccessfully.
    #[error("`{command}` failed: {stderr}")]
    Command {
        /// The command line.
        command: String,
        /// What it printed on stderr.
        stderr: String,
    },

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A binary archive could not be unpacked.
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// How to reproduce one package snapshot on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationRef {
    /// A top-level tree of a git commit.
    Git {
        /// Repository path.
        repo: PathBuf,
        /// Resolved commit id.
        commit: String,
        /// Tree path of the package inside the commit.
        path: String,
    },
    /// A directory on the local filesystem.
    Directory {
        /// The package root.
        path: PathBuf,
    },
    /// The `{prefix}/` subtree of a zip archive.
    Archive {
        /// The archive file.
        path: PathBuf,
        /// Top-level directory inside the archive.
        prefix: String,
    },
}

impl LocationRef {
    /// Write the package's file tree into `dest` (manifest at `dest/addon.xml`).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unreachable`] if the snapshot no longer exists,
    /// or another [`SourceError`] if it cannot be copied out.
    pub fn materialize(&self, dest: &Path) -> Result<(), SourceError> {
        match self {
            Self::Git { repo, commit, path } => git::export_tree(repo, commit, path, dest),
            Self::Directory { path } => directory::copy_tree(path, dest),
            Self::Archive { path, prefix } => {
                if !path.is_file() {
                    return Err(SourceError::Unreachable(path.display().to_string()));
                }
                extract::extract_zip_subtree(path, Some(prefix), dest)?;
                Ok(())
            }
        }
    }
}

impl fmt::Display for LocationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Git { repo, commit, path } => {
                let short = commit.get(..12).unwrap_or(commit);
                write!(f, "{}@{short}:{path}", repo.display())
            }
            Self::Directory { path } => write!(f, "{}", path.display()),
            Self::Archive { path, prefix } => write!(f, "{}!{prefix}", path.display()),
        }
    }
}

/// A directory inside a source that carries a manifest.
#[derive(Debug, Clone)]
pub struct PackageRoot {
    /// Name of the package directory within the source.
    pub name: String,
    /// Platform tag for platform-specific binaries.
    pub platform: Option<Platform>,
    /// Where the package tree can be materialized from.
    pub location: LocationRef,
    /// Raw manifest bytes, not yet parsed.
    pub manifest: Vec<u8>,
}

/// A configured upstream location.
pub trait UpstreamSource: fmt::Debug {
    /// Configured name, used in logs and target source filters.
    fn name(&self) -> &str;

    /// Whether the scan result depends on the ref. Ref-independent sources are
    /// scanned once per target.
    fn uses_refs(&self) -> bool {
        true
    }

    /// List package roots visible at `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unreachable`] for a missing location or ref.
    fn scan(&self, reference: &str) -> Result<Vec<PackageRoot>, SourceError>;
}

/// Build a source from its configuration entry.
pub fn from_config(config: &SourceConfig) -> Box<dyn UpstreamSource> {
    match config.kind {
        SourceKind::Git => Box::new(GitSource::new(&config.name, &config.path)),
        SourceKind::Directory => Box::new(DirectorySource::new(&config.name, &config.path)),
        SourceKind::Binary => Box::new(BinarySource::new(&config.name, &config.path)),
    }
}
