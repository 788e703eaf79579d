//! Pre-built platform-specific archives.

use std::fs;
use std::path::{Path, PathBuf};

use addonsync_schema::{MANIFEST_FILE, PackageKey};
use tracing::warn;

use super::{LocationRef, PackageRoot, SourceError, UpstreamSource};
use crate::io::archive::ArchiveReader;
use crate::layout;
use crate::walk;

/// Archives laid out as `<id>+<platform>/<id>-<version>.zip`. Only the
/// newest archive of each directory is offered as a candidate.
#[derive(Debug, Clone)]
pub struct BinarySource {
    name: String,
    root: PathBuf,
}

impl BinarySource {
    /// Source named `name` over the archive tree at `root`.
    pub fn new(name: &str, root: &Path) -> Self {
        Self {
            name: name.to_string(),
            root: root.to_path_buf(),
        }
    }
}

impl UpstreamSource for BinarySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn uses_refs(&self) -> bool {
        false
    }

    fn scan(&self, _reference: &str) -> Result<Vec<PackageRoot>, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError::Unreachable(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        let mut names: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|n| !layout::is_hidden(n))
            .collect();
        names.sort();

        let mut roots = Vec::new();
        for name in names {
            let key = match PackageKey::from_dir_name(&name) {
                Ok(key) => key,
                Err(e) => {
                    warn!(source = %self.name, dir = %name, "skipping: {e}");
                    continue;
                }
            };
            let dir = self.root.join(&name);
            let Some(newest) = walk::list_archives(&dir, &key)?.into_iter().next() else {
                continue;
            };

            let entry = format!("{}/{MANIFEST_FILE}", key.id);
            let manifest = match ArchiveReader::open(&newest.path).and_then(|mut r| r.read(&entry)) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(archive = %newest.path.display(), "failed to read manifest: {e}");
                    continue;
                }
            };

            roots.push(PackageRoot {
                name,
                platform: key.platform.clone(),
                location: LocationRef::Archive {
                    path: newest.path,
                    prefix: key.id.to_string(),
                },
                manifest,
            });
        }
        Ok(roots)
    }
}
