//! Convergence step: diff the resolved set against the published root.
//!
//! The plan is computed completely, from an in-memory snapshot of the
//! published root, before anything is mutated.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use addonsync_schema::PackageKey;

use crate::layout;
use crate::resolver::ResolvedArtifact;
use crate::walk::PublishedEntry;

/// An entry directory scheduled for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRemoval {
    /// Key of the entry.
    pub key: PackageKey,
    /// The entry directory.
    pub dir: PathBuf,
}

/// Added, removed and unchanged keys for one target.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Resolved artifacts whose archive is not on disk yet.
    pub added: Vec<ResolvedArtifact>,
    /// Resolved artifacts not on disk that the retention window would prune
    /// as soon as they were published.
    pub superseded: Vec<ResolvedArtifact>,
    /// Published entries no resolved artifact maps to.
    pub removed: Vec<PlannedRemoval>,
    /// Resolved keys whose archive is already published.
    pub unchanged: Vec<PackageKey>,
}

impl SyncPlan {
    /// Diff `resolved` against `published`, keeping `retention` archives per
    /// entry.
    pub fn compute(
        resolved: &[ResolvedArtifact],
        published: &[PublishedEntry],
        retention: NonZeroUsize,
    ) -> Self {
        let mut plan = Self::default();

        for artifact in resolved {
            let archive = layout::archive_file_name(&artifact.key.id, &artifact.version);
            let entry = published.iter().find(|e| e.key == artifact.key);
            if entry.is_some_and(|e| e.contains_archive(&archive)) {
                plan.unchanged.push(artifact.key.clone());
            } else if entry.is_some_and(|e| outranked_by(e, artifact, &archive) >= retention.get()) {
                plan.superseded.push(artifact.clone());
            } else {
                plan.added.push(artifact.clone());
            }
        }

        let wanted: BTreeSet<&PackageKey> = resolved.iter().map(|a| &a.key).collect();
        plan.removed = published
            .iter()
            .filter(|e| !wanted.contains(&e.key))
            .map(|e| PlannedRemoval {
                key: e.key.clone(),
                dir: e.dir.clone(),
            })
            .collect();

        plan
    }

    /// No additions and no removals.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Published archives the pruner would keep ahead of `artifact`'s archive.
/// Same ordering as [`PublishedEntry::archives`].
fn outranked_by(entry: &PublishedEntry, artifact: &ResolvedArtifact, archive: &str) -> usize {
    entry
        .archives
        .iter()
        .filter(|a| a.version > artifact.version || (a.version == artifact.version && a.file_name.as_str() < archive))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::LocationRef;
    use crate::walk::PublishedArchive;
    use addonsync_schema::{AddonId, Manifest, Version};

    fn artifact(id: &str, version: &str) -> ResolvedArtifact {
        let xml = format!(r#"<addon id="{id}" version="{version}"/>"#);
        let manifest = Manifest::parse(xml.as_bytes()).unwrap();
        ResolvedArtifact {
            key: PackageKey::new(manifest.id.clone()),
            version: manifest.version.clone(),
            location: LocationRef::Directory {
                path: PathBuf::from("/upstream").join(id),
            },
            manifest,
            source: "test".to_string(),
        }
    }

    fn keep(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn entry(id: &str, versions: &[&str]) -> PublishedEntry {
        let key = PackageKey::new(AddonId::new(id).unwrap());
        let dir = PathBuf::from("/published").join(id);
        let archives = versions
            .iter()
            .map(|v| {
                let file_name = format!("{id}-{v}.zip");
                PublishedArchive {
                    path: dir.join(&file_name),
                    file_name,
                    version: Version::new(v),
                }
            })
            .collect();
        PublishedEntry { key, dir, archives }
    }

    #[test]
    fn test_first_run_adds_everything() {
        let plan = SyncPlan::compute(&[artifact("plugin.example", "1.2")], &[], keep(3));
        assert_eq!(plan.added.len(), 1);
        assert_eq!(plan.added[0].version, Version::new("1.2"));
        assert!(plan.removed.is_empty());
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_unchanged_input_is_idempotent() {
        let resolved = [artifact("plugin.example", "1.2")];
        let published = [entry("plugin.example", &["1.2", "1.1"])];
        let plan = SyncPlan::compute(&resolved, &published, keep(3));
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged.len(), 1);
    }

    #[test]
    fn test_new_version_and_removed_package() {
        let resolved = [artifact("plugin.example", "1.3")];
        let published = [
            entry("plugin.example", &["1.2"]),
            entry("plugin.gone", &["0.9"]),
        ];
        let plan = SyncPlan::compute(&resolved, &published, keep(3));
        assert_eq!(plan.added.len(), 1);
        assert_eq!(plan.removed.len(), 1);
        assert_eq!(plan.removed[0].key.to_string(), "plugin.gone");
        assert_eq!(plan.removed[0].dir, PathBuf::from("/published/plugin.gone"));
    }

    #[test]
    fn test_platform_entries_are_distinct_keys() {
        let mut resolved = artifact("pvr.demo", "1.0");
        resolved.key.platform = Some(addonsync_schema::Platform::new("linux").unwrap());
        let plain = entry("pvr.demo", &["1.0"]);
        let plan = SyncPlan::compute(&[resolved], &[plain], keep(3));
        assert_eq!(plan.added.len(), 1);
        assert_eq!(plan.removed.len(), 1);
    }

    #[test]
    fn test_version_older_than_retained_archives_is_superseded() {
        let published = [entry("plugin.example", &["1.2"])];

        let plan = SyncPlan::compute(&[artifact("plugin.example", "1.1")], &published, keep(1));
        assert!(plan.added.is_empty());
        assert_eq!(plan.superseded.len(), 1);
        assert!(plan.is_empty());

        // Room in the window: the older version is published alongside.
        let plan = SyncPlan::compute(&[artifact("plugin.example", "1.1")], &published, keep(2));
        assert_eq!(plan.added.len(), 1);
        assert!(plan.superseded.is_empty());
    }
}
