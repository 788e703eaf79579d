//! Index Builder: derive `addons.xml` and `addons.xml.gz` from the published
//! root alone.
//!
//! Each entry directory contributes the manifest embedded in its newest
//! archive, augmented with computed fields. Nothing from the resolver is
//! trusted here, so the index can be regenerated at any time.

/// Manifest rewriting for index entries.
pub mod augment;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use addonsync_schema::manifest::CONVENTIONAL_COMPANIONS;
use addonsync_schema::{MANIFEST_FILE, Manifest, PackageKey, Version};
use flate2::{Compression, GzBuilder};
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ChecksumKind;
use crate::io::archive::ArchiveReader;
use crate::layout;
use crate::walk::{self, PublishedArchive, PublishedEntry};

use augment::ComputedFields;

/// Gzip level of `addons.xml.gz`.
const GZIP_LEVEL: u32 = 9;

/// Errors writing the index files.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Reading the root or writing an index file failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// An index document could not be written or re-read.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// An attribute in a manifest was malformed.
    #[error("XML attribute error: {0}")]
    Attr(#[from] AttrError),
}

/// Index output settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Indent the document with two spaces.
    pub pretty: bool,
    /// Sidecar digest of the compressed index.
    pub checksum: ChecksumKind,
}

/// A package that made it into the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEntry {
    /// Entry directory key.
    pub key: PackageKey,
    /// Manifest version.
    pub version: Version,
    /// Archive path relative to the published root.
    pub path: String,
}

/// An entry directory whose newest archive could not be indexed.
#[derive(Debug, Clone)]
pub struct SkippedEntry {
    /// Entry directory key.
    pub key: PackageKey,
    /// The archive that was rejected.
    pub archive: PathBuf,
    /// Why it was rejected.
    pub reason: String,
}

/// What [`build_index`] wrote.
#[derive(Debug, Default)]
pub struct IndexReport {
    /// Indexed packages, in document order.
    pub entries: Vec<IndexedEntry>,
    /// Entries left out of the document.
    pub skipped: Vec<SkippedEntry>,
    /// Hex digest written to the sidecar, if enabled.
    pub checksum: Option<String>,
}

/// Regenerate the index files of a published root.
///
/// # Errors
///
/// Returns an error if the root cannot be read or the index files cannot be
/// written. Unreadable archives are reported in [`IndexReport::skipped`].
pub fn build_index(root: &Path, options: &IndexOptions) -> Result<IndexReport, IndexError> {
    let mut report = IndexReport::default();
    let compact = render(root, &mut report)?;
    let document = if options.pretty {
        prettify(&compact)?
    } else {
        compact
    };

    write_atomic(root, layout::INDEX_FILE, &document)?;
    let compressed = compress(&document)?;
    write_atomic(root, layout::COMPRESSED_INDEX_FILE, &compressed)?;
    report.checksum = write_checksum(root, &compressed, options.checksum)?;

    info!(
        root = %root.display(),
        entries = report.entries.len(),
        skipped = report.skipped.len(),
        "index written"
    );
    Ok(report)
}

/// Build the compact document: declaration, then one `<addon>` per entry
/// under `<addons>`, in key order.
fn render(root: &Path, report: &mut IndexReport) -> Result<Vec<u8>, IndexError> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.get_mut().write_all(b"\n")?;
    writer.write_event(Event::Start(BytesStart::new("addons")))?;

    for entry in walk::published_entries(root)? {
        let Some(newest) = entry.newest() else {
            debug!(addon = %entry.key, "no archives, not indexed");
            continue;
        };
        match render_entry(&entry, newest) {
            Ok(bytes) => {
                writer.get_mut().write_all(&bytes)?;
                report.entries.push(IndexedEntry {
                    key: entry.key.clone(),
                    version: newest.version.clone(),
                    path: relative_path(&entry, newest),
                });
            }
            Err(reason) => {
                warn!(addon = %entry.key, archive = %newest.path.display(), "excluded from index: {reason}");
                report.skipped.push(SkippedEntry {
                    key: entry.key.clone(),
                    archive: newest.path.clone(),
                    reason,
                });
            }
        }
    }

    writer.write_event(Event::End(BytesEnd::new("addons")))?;
    Ok(writer.into_inner())
}

/// Read, validate and augment the manifest embedded in `archive`.
fn render_entry(entry: &PublishedEntry, archive: &PublishedArchive) -> Result<Vec<u8>, String> {
    let id = entry.key.id.as_str();
    let mut reader = ArchiveReader::open(&archive.path).map_err(|e| e.to_string())?;
    let source = reader
        .read(&format!("{id}/{MANIFEST_FILE}"))
        .map_err(|e| e.to_string())?;
    let manifest = Manifest::parse(&source).map_err(|e| e.to_string())?;

    let missing = if manifest.assets.is_none() {
        CONVENTIONAL_COMPANIONS
            .iter()
            .filter(|name| !reader.contains(&format!("{id}/{name}")))
            .map(|name| format!("no{}", name.split('.').next().unwrap_or(name)))
            .collect()
    } else {
        Vec::new()
    };
    let size = fs::metadata(&archive.path).map_err(|e| e.to_string())?.len();
    let fields = ComputedFields {
        missing,
        size,
        path: relative_path(entry, archive),
    };

    let mut writer = Writer::new(Vec::new());
    augment::write_entry(&mut writer, &source, &manifest, &fields).map_err(|e| e.to_string())?;
    Ok(writer.into_inner())
}

fn relative_path(entry: &PublishedEntry, archive: &PublishedArchive) -> String {
    format!("{}/{}", entry.key.dir_name(), archive.file_name)
}

/// Re-emit a compact document with two-space indentation.
fn prettify(compact: &[u8]) -> Result<Vec<u8>, IndexError> {
    let mut reader = Reader::from_reader(compact);
    reader.config_mut().trim_text(true);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            event => writer.write_event(event)?,
        }
        buf.clear();
    }
    writer.get_mut().write_all(b"\n")?;
    Ok(writer.into_inner())
}

/// Gzip with a zero modification time so unchanged input yields identical
/// bytes.
fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzBuilder::new()
        .mtime(0)
        .write(Vec::new(), Compression::new(GZIP_LEVEL));
    encoder.write_all(data)?;
    encoder.finish()
}

/// Write `name` under `root` through a temporary file and a rename.
fn write_atomic(root: &Path, name: &str, data: &[u8]) -> io::Result<()> {
    let mut temp = NamedTempFile::new_in(root)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(root.join(name)).map_err(|e| e.error)?;
    Ok(())
}

/// Write the digest sidecar of the compressed index and remove the sidecars
/// of the other kinds.
fn write_checksum(root: &Path, compressed: &[u8], kind: ChecksumKind) -> io::Result<Option<String>> {
    for other in [ChecksumKind::Md5, ChecksumKind::Sha256] {
        if other == kind {
            continue;
        }
        if let Some(ext) = other.extension() {
            match fs::remove_file(sidecar_path(root, ext)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
    }

    let digest = match kind {
        ChecksumKind::Md5 => format!("{:x}", md5::compute(compressed)),
        ChecksumKind::Sha256 => hex::encode(Sha256::digest(compressed)),
        ChecksumKind::None => return Ok(None),
    };
    if let Some(ext) = kind.extension() {
        write_atomic(root, &sidecar_name(ext), digest.as_bytes())?;
    }
    Ok(Some(digest))
}

fn sidecar_name(ext: &str) -> String {
    format!("{}.{ext}", layout::COMPRESSED_INDEX_FILE)
}

fn sidecar_path(root: &Path, ext: &str) -> PathBuf {
    root.join(sidecar_name(ext))
}
