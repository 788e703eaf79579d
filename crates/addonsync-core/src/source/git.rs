//! Local git repositories, read through the `git` executable.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use super::{LocationRef, PackageRoot, SourceError, UpstreamSource};
use crate::io::extract;
use addonsync_schema::MANIFEST_FILE;

/// Packages are the top-level trees of a ref that contain `addon.xml`. An
/// empty ref means `HEAD`.
#[derive(Debug, Clone)]
pub struct GitSource {
    name: String,
    repo: PathBuf,
}

impl GitSource {
    /// Source named `name` over the repository at `repo`.
    pub fn new(name: &str, repo: &Path) -> Self {
        Self {
            name: name.to_string(),
            repo: repo.to_path_buf(),
        }
    }

    fn resolve_commit(&self, reference: &str) -> Result<String, SourceError> {
        if !self.repo.is_dir() {
            return Err(SourceError::Unreachable(format!(
                "{} does not exist",
                self.repo.display()
            )));
        }
        let reference = if reference.is_empty() { "HEAD" } else { reference };
        let spec = format!("{reference}^{{commit}}");
        match git(&self.repo, &["rev-parse", "--verify", "--quiet", &spec]) {
            Ok(out) => Ok(String::from_utf8_lossy(&out).trim().to_string()),
            Err(SourceError::Command { .. }) => Err(SourceError::Unreachable(format!(
                "no such ref '{reference}' in {}",
                self.repo.display()
            ))),
            Err(e) => Err(e),
        }
    }
}

impl UpstreamSource for GitSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan(&self, reference: &str) -> Result<Vec<PackageRoot>, SourceError> {
        let commit = self.resolve_commit(reference)?;
        let listing = git(&self.repo, &["ls-tree", "-z", &commit])?;

        let mut roots = Vec::new();
        for record in listing.split(|b| *b == 0).filter(|r| !r.is_empty()) {
            // "<mode> SP <type> SP <object> TAB <name>"
            let record = String::from_utf8_lossy(record);
            let Some((meta, name)) = record.split_once('\t') else {
                continue;
            };
            if meta.split(' ').nth(1) != Some("tree") {
                continue;
            }

            let blob = format!("{commit}:{name}/{MANIFEST_FILE}");
            let manifest = match git(&self.repo, &["show", &blob]) {
                Ok(bytes) => bytes,
                Err(SourceError::Command { .. }) => {
                    debug!(source = %self.name, dir = name, "no manifest, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };

            roots.push(PackageRoot {
                name: name.to_string(),
                platform: None,
                location: LocationRef::Git {
                    repo: self.repo.clone(),
                    commit: commit.clone(),
                    path: name.to_string(),
                },
                manifest,
            });
        }
        Ok(roots)
    }
}

/// Export `commit:path` into `dest` via `git archive`.
pub(crate) fn export_tree(
    repo: &Path,
    commit: &str,
    path: &str,
    dest: &Path,
) -> Result<(), SourceError> {
    let archive = tempfile::Builder::new()
        .prefix("addonsync-export-")
        .suffix(".zip")
        .tempfile()?;
    let output = archive.path().to_string_lossy().into_owned();
    let treeish = format!("{commit}:{path}");

    match git(repo, &["archive", "--format=zip", "-o", &output, &treeish]) {
        Ok(_) => {}
        Err(SourceError::Command { stderr, .. }) => {
            return Err(SourceError::Unreachable(format!("{treeish}: {stderr}")));
        }
        Err(e) => return Err(e),
    }

    extract::extract_zip(archive.path(), dest)?;
    Ok(())
}

fn git(repo: &Path, args: &[&str]) -> Result<Vec<u8>, SourceError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .stdin(Stdio::null())
        .output()?;

    if !output.status.success() {
        return Err(SourceError::Command {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}
