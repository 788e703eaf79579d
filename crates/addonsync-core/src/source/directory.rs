//! Plain directories of package trees.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use addonsync_schema::MANIFEST_FILE;

use super::{LocationRef, PackageRoot, SourceError, UpstreamSource};
use crate::layout;

/// Each ref names a subdirectory of `root` (`.` or empty for `root` itself)
/// whose immediate children are package trees.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    name: String,
    root: PathBuf,
}

impl DirectorySource {
    /// Source named `name` over the directory `root`.
    pub fn new(name: &str, root: &Path) -> Self {
        Self {
            name: name.to_string(),
            root: root.to_path_buf(),
        }
    }

    fn base_for(&self, reference: &str) -> PathBuf {
        match reference.trim() {
            "" | "." => self.root.clone(),
            sub => self.root.join(sub),
        }
    }
}

impl UpstreamSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn scan(&self, reference: &str) -> Result<Vec<PackageRoot>, SourceError> {
        let base = self.base_for(reference);
        if !base.is_dir() {
            return Err(SourceError::Unreachable(format!(
                "{} is not a directory",
                base.display()
            )));
        }

        let mut dirs: Vec<(String, PathBuf)> = fs::read_dir(&base)?
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                (!layout::is_hidden(&name)).then(|| (name, e.path()))
            })
            .collect();
        dirs.sort();

        let mut roots = Vec::new();
        for (name, path) in dirs {
            let manifest = match fs::read(path.join(MANIFEST_FILE)) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            roots.push(PackageRoot {
                name,
                platform: None,
                location: LocationRef::Directory { path },
                manifest,
            });
        }
        Ok(roots)
    }
}

/// Copy the contents of `src` into `dest`.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> Result<(), SourceError> {
    if !src.is_dir() {
        return Err(SourceError::Unreachable(src.display().to_string()));
    }
    fs::create_dir_all(dest)?;
    fs_extra::dir::copy(
        src,
        dest,
        &fs_extra::dir::CopyOptions::new()
            .content_only(true)
            .overwrite(true),
    )
    .map_err(|e| io::Error::other(format!("copy {} failed: {e}", src.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_lists_package_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("nexus");
        fs::create_dir_all(base.join("plugin.b")).unwrap();
        fs::create_dir_all(base.join("plugin.a")).unwrap();
        fs::create_dir_all(base.join("not-a-package")).unwrap();
        fs::create_dir_all(base.join(".hidden")).unwrap();
        fs::write(base.join("plugin.a/addon.xml"), "<addon/>").unwrap();
        fs::write(base.join("plugin.b/addon.xml"), "<addon/>").unwrap();
        fs::write(base.join(".hidden/addon.xml"), "<addon/>").unwrap();

        let source = DirectorySource::new("local", dir.path());
        let roots = source.scan("nexus").unwrap();
        let names: Vec<&str> = roots.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["plugin.a", "plugin.b"]);
        assert_eq!(roots[0].manifest, b"<addon/>");
    }

    #[test]
    fn test_missing_ref_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new("local", dir.path());
        assert!(matches!(
            source.scan("missing"),
            Err(SourceError::Unreachable(_))
        ));
    }

    #[test]
    fn test_copy_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("resources")).unwrap();
        fs::write(src.join("addon.xml"), "<addon/>").unwrap();
        fs::write(src.join("resources/x.txt"), "x").unwrap();

        let dest = dir.path().join("dest");
        copy_tree(&src, &dest).unwrap();
        assert!(dest.join("addon.xml").is_file());
        assert!(dest.join("resources/x.txt").is_file());
    }
}
