//! Turns one resolved artifact into a published archive plus companions.
//!
//! Work happens in a private temporary tree and a hidden staging directory
//! inside the entry directory. Only when everything is built are the previous
//! companions replaced and the archive moved in, archive last: its presence is
//! what marks the version as published.
//!
//! Companions always describe the newest archive in the entry. Packaging a
//! version older than that adds only the archive and its versioned changelog.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use addonsync_schema::{Companions, MANIFEST_FILE};
use thiserror::Error;
use tracing::debug;

use crate::io::archive::{self, ArchiveError};
use crate::layout;
use crate::resolver::ResolvedArtifact;
use crate::source::SourceError;
use crate::textures::{self, TextureCompiler, TextureError};
use crate::walk;

/// Why one artifact could not be published.
#[derive(Error, Debug)]
pub enum PackagingError {
    /// The upstream tree could not be materialized.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The materialized tree lacks `addon.xml`.
    #[error("materialized tree has no addon.xml")]
    MissingManifest,

    /// An `<assets>` path is absolute or climbs out of the tree.
    #[error("asset path '{0}' escapes the package tree")]
    UnsafeAssetPath(String),

    /// An `<assets>` path names a file that is not there.
    #[error("listed asset '{0}' does not exist")]
    MissingAsset(String),

    /// Texture compaction failed.
    #[error(transparent)]
    Textures(#[from] TextureError),

    /// The archive could not be written.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Filesystem failure in the staging area or entry directory.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// What [`package`] put into the entry directory.
#[derive(Debug, Clone)]
pub struct PackagedArtifact {
    /// Path of the new archive.
    pub archive: PathBuf,
    /// Archive size in bytes.
    pub size: u64,
    /// Companion paths relative to the entry directory.
    pub companions: Vec<PathBuf>,
}

/// Package `artifact` into `entry_dir`, creating it if needed.
///
/// On failure the temporary tree and staging directory are removed, and an
/// entry directory created by this call that still holds no archive is
/// removed too.
pub fn package(
    artifact: &ResolvedArtifact,
    entry_dir: &Path,
    compiler: &dyn TextureCompiler,
) -> Result<PackagedArtifact, PackagingError> {
    let created = !entry_dir.exists();
    fs::create_dir_all(entry_dir)?;

    let result = package_into(artifact, entry_dir, compiler);
    if result.is_err() && created && !holds_archive(entry_dir) {
        let _ = fs::remove_dir_all(entry_dir);
    }
    result
}

fn holds_archive(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|entries| {
        entries
            .filter_map(Result::ok)
            .any(|e| e.file_name().to_string_lossy().ends_with(".zip"))
    })
}

fn package_into(
    artifact: &ResolvedArtifact,
    entry_dir: &Path,
    compiler: &dyn TextureCompiler,
) -> Result<PackagedArtifact, PackagingError> {
    let work = tempfile::Builder::new().prefix("addonsync-").tempdir()?;
    let tree = work.path().join(artifact.key.id.as_str());
    artifact.location.materialize(&tree)?;
    if !tree.join(MANIFEST_FILE).is_file() {
        return Err(PackagingError::MissingManifest);
    }

    let screenshots = tree.join(layout::SCREENSHOTS_DIR);
    if screenshots.is_dir() {
        fs::remove_dir_all(&screenshots)?;
    }

    let staging = tempfile::Builder::new()
        .prefix(".addonsync-staging-")
        .tempdir_in(entry_dir)?;

    // Companions are taken from the tree as shipped, before texture compaction.
    let companions = stage_companions(artifact, &tree, staging.path())?;

    textures::prepare(&artifact.manifest, &tree, compiler)?;

    let archive_name = layout::archive_file_name(&artifact.key.id, &artifact.version);
    let staged_archive = staging.path().join(&archive_name);
    let entries = archive::write_zip(&tree, artifact.key.id.as_str(), &staged_archive)?;
    debug!(addon = %artifact.key, version = %artifact.version, entries, "archive written");

    let changelog_name = layout::changelog_file_name(&artifact.version);
    let newest = walk::list_archives(entry_dir, &artifact.key)?.into_iter().next();
    let current = newest.as_ref().is_none_or(|n| artifact.version >= n.version);
    if current {
        remove_old_companions(entry_dir)?;
    } else if let Some(newest) = &newest {
        debug!(
            addon = %artifact.key,
            version = %artifact.version,
            newest = %newest.version,
            "older than published; keeping companions"
        );
    }
    for entry in fs::read_dir(staging.path())? {
        let entry = entry?;
        let name = entry.file_name();
        if name == archive_name.as_str() || (!current && name != changelog_name.as_str()) {
            continue;
        }
        fs::rename(entry.path(), entry_dir.join(name))?;
    }
    let archive_path = entry_dir.join(&archive_name);
    fs::rename(&staged_archive, &archive_path)?;

    let companions = if current {
        companions
    } else {
        companions
            .into_iter()
            .filter(|p| p.as_os_str() == changelog_name.as_str())
            .collect()
    };
    let size = fs::metadata(&archive_path)?.len();
    Ok(PackagedArtifact {
        archive: archive_path,
        size,
        companions,
    })
}

/// Copy companion files from `tree` into `staging`, returning their relative
/// paths.
fn stage_companions(
    artifact: &ResolvedArtifact,
    tree: &Path,
    staging: &Path,
) -> Result<Vec<PathBuf>, PackagingError> {
    let mut staged = Vec::new();
    match artifact.manifest.companions() {
        Companions::Explicit(paths) => {
            for raw in paths {
                let relative = safe_relative(raw)?;
                let src = tree.join(&relative);
                if !src.is_file() {
                    return Err(PackagingError::MissingAsset(raw.clone()));
                }
                copy_into(&src, &staging.join(&relative))?;
                staged.push(relative);
            }
        }
        Companions::Conventional => {
            for name in ["icon.png", "fanart.jpg"] {
                let src = tree.join(name);
                if src.is_file() {
                    copy_into(&src, &staging.join(name))?;
                    staged.push(PathBuf::from(name));
                }
            }
        }
    }

    let changelog = tree.join(layout::CHANGELOG_FILE);
    if changelog.is_file() {
        let name = layout::changelog_file_name(&artifact.version);
        copy_into(&changelog, &staging.join(&name))?;
        staged.push(PathBuf::from(name));
    }
    staged.sort();
    staged.dedup();
    Ok(staged)
}

fn safe_relative(raw: &str) -> Result<PathBuf, PackagingError> {
    let path = Path::new(raw);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(PackagingError::UnsafeAssetPath(raw.to_string())),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(PackagingError::UnsafeAssetPath(raw.to_string()));
    }
    Ok(clean)
}

fn copy_into(src: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest)?;
    Ok(())
}

/// Delete the companions of the previously newest version.
fn remove_old_companions(entry_dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(entry_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if layout::survives_companion_cleanup(&name.to_string_lossy()) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
