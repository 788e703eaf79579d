//! Published-root naming conventions.
//!
//! A published root holds one directory per package key plus the index files:
//!
//! ```text
//! <root>/addons.xml
//! <root>/addons.xml.gz
//! <root>/addons.xml.gz.md5
//! <root>/plugin.video.example/plugin.video.example-1.2.0.zip
//! <root>/plugin.video.example/icon.png
//! <root>/plugin.video.example/changelog-1.2.0.txt
//! <root>/inputstream.adaptive+android-aarch64/inputstream.adaptive-21.4.1.zip
//! ```

use std::path::{Path, PathBuf};

use addonsync_schema::{AddonId, Version};

/// Plain index file name.
pub const INDEX_FILE: &str = "addons.xml";
/// Compressed index file name.
pub const COMPRESSED_INDEX_FILE: &str = "addons.xml.gz";
/// Advisory lock file held while a target is being synchronized.
pub const LOCK_FILE: &str = ".addonsync.lock";
/// Extension of detached signature files (`<file>.sig`).
pub const SIGNATURE_EXTENSION: &str = "sig";
/// Extension of package archives.
pub const ARCHIVE_EXTENSION: &str = "zip";
/// Source-tree directory removed before archiving.
pub const SCREENSHOTS_DIR: &str = "_screenshots";
/// Conventional changelog inside a package tree.
pub const CHANGELOG_FILE: &str = "changelog.txt";

/// `{id}-{version}.zip`
pub fn archive_file_name(id: &AddonId, version: &Version) -> String {
    format!("{id}-{version}.{ARCHIVE_EXTENSION}")
}

/// `changelog-{version}.txt`
pub fn changelog_file_name(version: &Version) -> String {
    format!("changelog-{version}.txt")
}

/// Path of the detached signature for `path`.
pub fn signature_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(SIGNATURE_EXTENSION);
    PathBuf::from(name)
}

/// Whether a directory entry is hidden (dot-prefixed) and therefore never
/// treated as published content.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Version encoded in an archive file name.
///
/// The `{id}-` prefix is stripped when it matches so versions containing
/// dashes survive; otherwise the text after the last dash is used. Returns
/// `None` for non-archives and names without a version suffix.
pub fn archive_version(file_name: &str, id: &str) -> Option<Version> {
    let stem = file_name.strip_suffix(".zip")?;
    let raw = match stem.strip_prefix(id).and_then(|rest| rest.strip_prefix('-')) {
        Some(raw) => raw,
        None => stem.rsplit_once('-')?.1,
    };
    if raw.is_empty() {
        return None;
    }
    Some(Version::new(raw))
}

/// Whether `name` survives the companion cleanup that precedes a new version
/// being published into an entry directory.
///
/// Archives, their signatures, versioned changelogs and hidden entries are
/// kept; everything else belongs to the previous newest version.
pub fn survives_companion_cleanup(name: &str) -> bool {
    is_hidden(name)
        || name.ends_with(".zip")
        || name.ends_with(".zip.sig")
        || (name.starts_with("changelog-") && name.ends_with(".txt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_names() {
        let id = AddonId::new("plugin.example").unwrap();
        let version = Version::new("1.2.0");
        assert_eq!(archive_file_name(&id, &version), "plugin.example-1.2.0.zip");
        assert_eq!(changelog_file_name(&version), "changelog-1.2.0.txt");
    }

    #[test]
    fn test_archive_version() {
        assert_eq!(
            archive_version("plugin.example-1.2.0.zip", "plugin.example"),
            Some(Version::new("1.2.0"))
        );
        assert_eq!(
            archive_version("plugin.example-1.0.0-beta2.zip", "plugin.example"),
            Some(Version::new("1.0.0-beta2"))
        );
        assert_eq!(
            archive_version("other-2.0.zip", "plugin.example"),
            Some(Version::new("2.0"))
        );
        assert_eq!(archive_version("noversion.zip", "plugin.example"), None);
        assert_eq!(archive_version("plugin.example-.zip", "plugin.example"), None);
        assert_eq!(archive_version("icon.png", "plugin.example"), None);
    }

    #[test]
    fn test_signature_path() {
        let path = Path::new("/srv/repo/addons.xml.gz");
        assert_eq!(signature_path(path), PathBuf::from("/srv/repo/addons.xml.gz.sig"));
    }

    #[test]
    fn test_companion_cleanup_rules() {
        assert!(survives_companion_cleanup("plugin.example-1.0.zip"));
        assert!(survives_companion_cleanup("plugin.example-1.0.zip.sig"));
        assert!(survives_companion_cleanup("changelog-1.0.txt"));
        assert!(survives_companion_cleanup(".staging"));
        assert!(!survives_companion_cleanup("icon.png"));
        assert!(!survives_companion_cleanup("changelog.txt"));
        assert!(!survives_companion_cleanup("resources"));
    }
}
