//! Writing distributable archives and reading entries back out of them.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Errors writing or reading package archives.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The zip container is malformed.
    #[error("Zip error: {0}")]
    Zip(#[from] ZipError),

    /// The source tree could not be walked.
    #[error("Failed to walk {0}")]
    Walk(#[from] walkdir::Error),

    /// A named entry is absent.
    #[error("Archive has no entry '{0}'")]
    MissingEntry(String),
}

/// Write every file under `src_dir` into a deflate-compressed zip at `dest`,
/// each entry named `{prefix}/{relative path}`.
///
/// Entries are added in sorted path order. Returns the number of entries.
pub fn write_zip(src_dir: &Path, prefix: &str, dest: &Path) -> Result<usize, ArchiveError> {
    let mut writer = ZipWriter::new(BufWriter::new(File::create(dest)?));
    let base = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut count = 0;

    for entry in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let options = match unix_mode(&entry)? {
            Some(mode) => base.unix_permissions(mode),
            None => base,
        };
        writer.start_file(format!("{prefix}/{name}"), options)?;
        let mut file = File::open(entry.path())?;
        io::copy(&mut file, &mut writer)?;
        count += 1;
    }

    writer.finish()?.flush()?;
    Ok(count)
}

#[cfg(unix)]
fn unix_mode(entry: &walkdir::DirEntry) -> io::Result<Option<u32>> {
    use std::os::unix::fs::PermissionsExt;
    Ok(Some(entry.metadata().map_err(io::Error::from)?.permissions().mode() & 0o777))
}

#[cfg(not(unix))]
fn unix_mode(_: &walkdir::DirEntry) -> io::Result<Option<u32>> {
    Ok(None)
}

/// Read access to a published archive.
pub struct ArchiveReader {
    archive: ZipArchive<BufReader<File>>,
}

impl fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("entries", &self.archive.len())
            .finish()
    }
}

impl ArchiveReader {
    /// Open a zip archive.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
        Ok(Self { archive })
    }

    /// Whether an entry with exactly this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.archive.file_names().any(|n| n == name)
    }

    /// Read one entry fully into memory.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut file = match self.archive.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Err(ArchiveError::MissingEntry(name.to_string())),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// All entry names in archive order.
    pub fn names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_write_zip_prefixes_entries() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("resources/lib")).unwrap();
        fs::write(src.join("addon.xml"), b"<addon/>").unwrap();
        fs::write(src.join("resources/lib/main.py"), b"pass").unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();

        let dest = dir.path().join("out.zip");
        let count = write_zip(&src, "plugin.example", &dest).unwrap();
        assert_eq!(count, 2);

        let mut reader = ArchiveReader::open(&dest).unwrap();
        let mut names = reader.names();
        names.sort();
        assert_eq!(
            names,
            vec!["plugin.example/addon.xml", "plugin.example/resources/lib/main.py"]
        );
        assert!(reader.contains("plugin.example/addon.xml"));
        assert!(!reader.contains("addon.xml"));
        assert_eq!(reader.read("plugin.example/resources/lib/main.py").unwrap(), b"pass");
    }

    #[test]
    fn test_read_missing_entry() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), b"a").unwrap();
        let dest = dir.path().join("out.zip");
        write_zip(&src, "x", &dest).unwrap();

        let mut reader = ArchiveReader::open(&dest).unwrap();
        assert!(matches!(reader.read("x/b.txt"), Err(ArchiveError::MissingEntry(_))));
    }
}
