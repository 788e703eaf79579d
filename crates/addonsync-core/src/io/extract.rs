//! Archive extraction module
//!
//! Unpacks zip archives (git exports and pre-built binary addons) into a
//! working directory.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;

/// Errors unpacking a zip.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The archive is unreadable or holds an unsafe entry name.
    #[error("Archive error: {0}")]
    Archive(String),
}

/// Information about an extracted file
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    /// Path relative to extraction root
    pub relative_path: PathBuf,
    /// Absolute path on disk
    pub absolute_path: PathBuf,
}

/// Extract a zip archive
pub fn extract_zip(
    archive_path: &Path,
    dest_dir: &Path,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    extract_zip_subtree(archive_path, None, dest_dir)
}

/// Extract a zip archive, optionally keeping only the entries under
/// `prefix/` and stripping that prefix.
///
/// Entries whose names would escape `dest_dir` are skipped.
pub fn extract_zip_subtree(
    archive_path: &Path,
    prefix: Option<&str>,
    dest_dir: &Path,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive =
        ZipArchive::new(BufReader::new(file)).map_err(|e| ExtractError::Archive(e.to_string()))?;

    fs::create_dir_all(dest_dir)?;
    let mut extracted_files = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let enclosed = match file.enclosed_name() {
            Some(path) => path.to_owned(),
            None => continue,
        };
        let relative_path = match prefix {
            Some(prefix) => match enclosed.strip_prefix(prefix) {
                Ok(rest) if rest.as_os_str().is_empty() => continue,
                Ok(rest) => rest.to_path_buf(),
                Err(_) => continue,
            },
            None => enclosed,
        };

        let absolute_path = dest_dir.join(&relative_path);
        if file.is_dir() {
            fs::create_dir_all(&absolute_path)?;
            continue;
        }

        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut file, &mut outfile)?;

        if let Some(mode) = file.unix_mode() {
            apply_mode(&absolute_path, mode)?;
        }

        extracted_files.push(ExtractedFile {
            relative_path,
            absolute_path,
        });
    }

    if prefix.is_some() && extracted_files.is_empty() {
        return Err(ExtractError::Archive(format!(
            "no entries under '{}/' in {}",
            prefix.unwrap_or_default(),
            archive_path.display()
        )));
    }

    Ok(extracted_files)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn apply_mode(_: &Path, _: u32) -> io::Result<()> {
    Ok(())
}
