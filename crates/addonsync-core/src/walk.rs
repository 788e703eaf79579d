//! Published-root directory traversal.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use addonsync_schema::{PackageKey, Version};
use tracing::warn;

use crate::layout;

/// One archive file inside an entry directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArchive {
    /// Absolute path of the archive.
    pub path: PathBuf,
    /// File name, e.g. `plugin.example-1.2.0.zip`.
    pub file_name: String,
    /// Version parsed from the file name.
    pub version: Version,
}

/// A package directory in a published root.
#[derive(Debug, Clone)]
pub struct PublishedEntry {
    /// Key derived from the directory name.
    pub key: PackageKey,
    /// Absolute path of the directory.
    pub dir: PathBuf,
    /// Archives, newest first. Equal versions are ordered by file name.
    pub archives: Vec<PublishedArchive>,
}

impl PublishedEntry {
    /// The newest archive by file-name version, if any.
    pub fn newest(&self) -> Option<&PublishedArchive> {
        self.archives.first()
    }

    /// Whether an archive with exactly this file name is present.
    pub fn contains_archive(&self, file_name: &str) -> bool {
        self.archives.iter().any(|a| a.file_name == file_name)
    }
}

/// List the archives of one entry directory, newest first.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_archives(dir: &Path, key: &PackageKey) -> io::Result<Vec<PublishedArchive>> {
    let mut archives = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if let Some(version) = layout::archive_version(&file_name, key.id.as_str()) {
            archives.push(PublishedArchive {
                path: entry.path(),
                file_name,
                version,
            });
        }
    }
    archives.sort_by(|a, b| {
        b.version
            .cmp(&a.version)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
    Ok(archives)
}

/// Walk a published root and return every entry directory sorted by key.
///
/// Hidden directories and files at the root are skipped, as are directories
/// whose names are not valid package keys.
///
/// # Errors
///
/// Returns an error if the root or one of its entry directories cannot be
/// read.
pub fn published_entries(root: &Path) -> io::Result<Vec<PublishedEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if layout::is_hidden(&name) {
            continue;
        }
        let key = match PackageKey::from_dir_name(&name) {
            Ok(key) => key,
            Err(e) => {
                warn!(dir = %entry.path().display(), "ignoring directory: {e}");
                continue;
            }
        };
        let dir = entry.path();
        let archives = list_archives(&dir, &key)?;
        entries.push(PublishedEntry {
            key,
            dir,
            archives,
        });
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}
