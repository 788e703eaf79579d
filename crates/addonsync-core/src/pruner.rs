//! Retention policy: keep the N newest archives of every package.

use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::Path;

use addonsync_schema::{PackageKey, Version};
use tracing::info;

use crate::layout;
use crate::walk::{self, PublishedEntry};

/// An archive deleted by the pruner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedArchive {
    /// Entry directory key.
    pub key: PackageKey,
    /// Version of the removed archive.
    pub version: Version,
    /// File name of the removed archive.
    pub file_name: String,
}

/// Delete every archive of `entry` beyond the `retention` newest, along with
/// its detached signature and its versioned changelog.
///
/// # Errors
///
/// Returns an error if a file cannot be removed.
pub fn prune_entry(entry: &PublishedEntry, retention: NonZeroUsize) -> io::Result<Vec<PrunedArchive>> {
    let mut pruned = Vec::new();
    for archive in entry.archives.iter().skip(retention.get()) {
        info!(addon = %entry.key, version = %archive.version, "removing old archive {}", archive.file_name);
        fs::remove_file(&archive.path)?;
        remove_if_present(&layout::signature_path(&archive.path))?;
        remove_if_present(&entry.dir.join(layout::changelog_file_name(&archive.version)))?;
        pruned.push(PrunedArchive {
            key: entry.key.clone(),
            version: archive.version.clone(),
            file_name: archive.file_name.clone(),
        });
    }
    Ok(pruned)
}

/// Apply the retention policy to every entry of a published root.
///
/// # Errors
///
/// Returns an error if the root cannot be read or a file cannot be removed.
pub fn prune(root: &Path, retention: NonZeroUsize) -> io::Result<Vec<PrunedArchive>> {
    let mut pruned = Vec::new();
    for entry in walk::published_entries(root)? {
        pruned.extend(prune_entry(&entry, retention)?);
    }
    Ok(pruned)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keep(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn populate(dir: &Path, versions: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        for v in versions {
            fs::write(dir.join(format!("plugin.example-{v}.zip")), v).unwrap();
            fs::write(dir.join(format!("changelog-{v}.txt")), v).unwrap();
        }
    }

    #[test]
    fn test_keeps_newest_three_of_five() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("plugin.example");
        populate(&dir, &["1.0", "1.10", "1.2", "1.9", "1.3"]);
        fs::write(dir.join("plugin.example-1.0.zip.sig"), "sig").unwrap();
        fs::write(dir.join("icon.png"), "icon").unwrap();

        let pruned = prune(root.path(), keep(3)).unwrap();
        let mut versions: Vec<String> = pruned.iter().map(|p| p.version.to_string()).collect();
        versions.sort();
        assert_eq!(versions, vec!["1.0", "1.2"]);

        for kept in ["1.10", "1.9", "1.3"] {
            assert!(dir.join(format!("plugin.example-{kept}.zip")).is_file());
            assert!(dir.join(format!("changelog-{kept}.txt")).is_file());
        }
        for gone in ["1.0", "1.2"] {
            assert!(!dir.join(format!("plugin.example-{gone}.zip")).exists());
            assert!(!dir.join(format!("changelog-{gone}.txt")).exists());
        }
        assert!(!dir.join("plugin.example-1.0.zip.sig").exists());
        assert!(dir.join("icon.png").is_file());
    }

    #[test]
    fn test_fewer_archives_than_retention_untouched() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("plugin.example");
        populate(&dir, &["1.0", "1.1"]);
        assert!(prune(root.path(), keep(3)).unwrap().is_empty());
        assert!(dir.join("plugin.example-1.0.zip").is_file());
    }

    #[test]
    fn test_every_entry_is_pruned() {
        let root = tempfile::tempdir().unwrap();
        populate(&root.path().join("plugin.example"), &["1.0", "2.0"]);
        let other = root.path().join("plugin.other");
        fs::create_dir_all(&other).unwrap();
        fs::write(other.join("plugin.other-0.1.zip"), "").unwrap();
        fs::write(other.join("plugin.other-0.2.zip"), "").unwrap();
        fs::write(other.join("readme"), "").unwrap();

        let pruned = prune(root.path(), keep(1)).unwrap();
        assert_eq!(pruned.len(), 2);
        assert!(other.join("plugin.other-0.2.zip").is_file());
        assert!(!other.join("plugin.other-0.1.zip").exists());
        assert!(other.join("readme").is_file());
    }
}
