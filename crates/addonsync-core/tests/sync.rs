//! End-to-end runs of the engine over directory sources.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use addonsync_core::io::archive::{ArchiveReader, write_zip};
use addonsync_core::textures::TextureError;
use addonsync_core::{SyncConfig, SyncEngine, SyncError, TextureCompiler};
use addonsync_schema::Version;
use tempfile::TempDir;
use zip::{CompressionMethod, ZipArchive};

/// Writes a placeholder bundle instead of running TexturePacker.
#[derive(Debug, Default, Clone)]
struct FakeCompiler {
    calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl TextureCompiler for FakeCompiler {
    fn compile(&self, input: &Path, output: &Path) -> Result<(), TextureError> {
        if !input.is_dir() {
            return Err(TextureError::MissingInput(input.to_path_buf()));
        }
        fs::write(output, b"XBT")?;
        self.calls.lock().unwrap().push(output.to_path_buf());
        Ok(())
    }
}

struct Fixture {
    output: TempDir,
    upstream: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            output: tempfile::tempdir().unwrap(),
            upstream: tempfile::tempdir().unwrap(),
        }
    }

    fn up(&self, rel: &str) -> PathBuf {
        self.upstream.path().join(rel)
    }

    fn root(&self) -> PathBuf {
        self.output.path().join("main")
    }

    /// Write `<upstream>/<rel>/addon.xml` plus extra files.
    fn addon(&self, rel: &str, xml: &str, files: &[(&str, &str)]) {
        let dir = self.up(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("addon.xml"), xml).unwrap();
        for (name, body) in files {
            let path = dir.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
    }

    fn engine(&self, target: &str) -> (SyncEngine, FakeCompiler) {
        let text = format!(
            r#"
output_dir = "{}"

[[sources]]
name = "one"
kind = "directory"
path = "{}"

[[sources]]
name = "two"
kind = "directory"
path = "{}"

{target}
"#,
            self.output.path().display(),
            self.up("one").display(),
            self.up("two").display(),
        );
        let config = SyncConfig::parse(&text).unwrap();
        let compiler = FakeCompiler::default();
        let engine = SyncEngine::new(config).with_compiler(Box::new(compiler.clone()));
        (engine, compiler)
    }
}

fn plain(id: &str, version: &str) -> String {
    format!(r#"<addon id="{id}" version="{version}"><extension point="xbmc.addon.metadata"/></addon>"#)
}

fn requiring(id: &str, version: &str, python: &str) -> String {
    format!(
        r#"<addon id="{id}" version="{version}"><requires><import addon="xbmc.python" version="{python}"/></requires></addon>"#
    )
}

fn assert_deflated(archive: &Path) {
    let mut zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
    assert!(!zip.is_empty());
    for i in 0..zip.len() {
        let entry = zip.by_index(i).unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Deflated, "{}", entry.name());
    }
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

const TWO_REFS: &str = r#"
[targets.main]
refs = ["v1", "v2"]
retention = 3
"#;

#[test]
fn test_highest_version_published_then_idempotent() {
    let fx = Fixture::new();
    fx.addon("one/v1/plugin.example", &plain("plugin.example", "1.0"), &[("icon.png", "png")]);
    fx.addon("one/v2/plugin.example", &plain("plugin.example", "1.1"), &[]);
    fx.addon("two/v1/plugin.example", &plain("plugin.example", "1.2"), &[("changelog.txt", "notes")]);
    let (engine, _) = fx.engine(TWO_REFS);

    let first = engine.run_target("main").unwrap();
    assert_eq!(first.added.len(), 1);
    assert_eq!(first.added[0].1, Version::new("1.2"));
    assert!(first.removed.is_empty());
    // `two` has no v2 subdirectory.
    assert_eq!(first.unreachable.len(), 1);

    let entry = fx.root().join("plugin.example");
    assert!(entry.join("plugin.example-1.2.zip").is_file());
    assert_deflated(&entry.join("plugin.example-1.2.zip"));
    assert!(entry.join("changelog-1.2.txt").is_file());
    assert!(!entry.join("icon.png").exists());
    let gz_first = fs::read(fx.root().join("addons.xml.gz")).unwrap();

    let second = engine.run_target("main").unwrap();
    assert!(second.added.is_empty());
    assert!(second.removed.is_empty());
    assert_eq!(second.unchanged, 1);
    let gz_second = fs::read(fx.root().join("addons.xml.gz")).unwrap();
    assert_eq!(gz_first, gz_second);

    let index = fs::read_to_string(fx.root().join("addons.xml")).unwrap();
    assert_eq!(index.matches("<addon ").count(), 1);
    assert!(index.contains("<path>plugin.example/plugin.example-1.2.zip</path>"));
    assert!(index.contains("<noicon>true</noicon>"));
    assert!(!index.contains("<nochangelog>"));
}

#[test]
fn test_retention_keeps_newest_three() {
    let fx = Fixture::new();
    let (engine, _) = fx.engine(
        r#"
[targets.main]
sources = ["one"]
retention = 3
"#,
    );
    for minor in 0..5 {
        let version = format!("1.{minor}");
        fx.addon("one/plugin.example", &plain("plugin.example", &version), &[("changelog.txt", "c")]);
        let report = engine.run_target("main").unwrap();
        assert_eq!(report.added, vec![(report.added[0].0.clone(), Version::new(&version))]);
    }

    let entry = fx.root().join("plugin.example");
    let mut zips: Vec<String> = fs::read_dir(&entry)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".zip"))
        .collect();
    zips.sort();
    assert_eq!(
        zips,
        vec!["plugin.example-1.2.zip", "plugin.example-1.3.zip", "plugin.example-1.4.zip"]
    );
    assert!(!entry.join("changelog-1.0.txt").exists());
    assert!(entry.join("changelog-1.4.txt").is_file());
}

#[test]
fn test_dependency_gate_filters_candidates() {
    let fx = Fixture::new();
    fx.addon("one/plugin.old", &requiring("plugin.old", "1.0", "2.0.0"), &[]);
    fx.addon("one/plugin.new", &requiring("plugin.new", "1.0", "3.0.0"), &[]);
    let (engine, _) = fx.engine(
        r#"
[targets.main]
sources = ["one"]

[targets.main.min_versions]
"xbmc.python" = "3.0.0"
"#,
    );

    let report = engine.run_target("main").unwrap();
    assert_eq!(report.gated, 1);
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.added[0].0.to_string(), "plugin.new");
    assert!(!fx.root().join("plugin.old").exists());
}

#[test]
fn test_explicit_assets_and_removal() {
    let fx = Fixture::new();
    let xml = r#"<addon id="plugin.assets" version="2.0">
  <extension point="kodi.addon.metadata">
    <assets>
      <icon>resources/icon.png</icon>
      <screenshot>resources/shot1.jpg</screenshot>
    </assets>
  </extension>
</addon>"#;
    fx.addon(
        "one/plugin.assets",
        xml,
        &[
            ("resources/icon.png", "png"),
            ("resources/shot1.jpg", "jpg"),
            ("icon.png", "ignored"),
            ("fanart.jpg", "ignored"),
        ],
    );
    fx.addon("one/plugin.gone", &plain("plugin.gone", "0.1"), &[]);
    let (engine, _) = fx.engine("[targets.main]\nsources = [\"one\"]\n");

    engine.run_target("main").unwrap();
    let entry = fx.root().join("plugin.assets");
    assert!(entry.join("resources/icon.png").is_file());
    assert!(entry.join("resources/shot1.jpg").is_file());
    assert!(!entry.join("icon.png").exists());
    assert!(!entry.join("fanart.jpg").exists());
    let index = fs::read_to_string(fx.root().join("addons.xml")).unwrap();
    let assets_entry = &index[index.find(r#"id="plugin.assets""#).unwrap()..];
    let assets_entry = &assets_entry[..assets_entry.find("</addon>").unwrap()];
    assert!(!assets_entry.contains("<noicon>"));

    fs::remove_dir_all(fx.up("one/plugin.gone")).unwrap();
    let report = engine.run_target("main").unwrap();
    assert_eq!(report.removed.len(), 1);
    assert!(!fx.root().join("plugin.gone").exists());
    assert!(!fs::read_to_string(fx.root().join("addons.xml")).unwrap().contains("plugin.gone"));
}

#[test]
fn test_packaging_failure_does_not_stop_run() {
    let fx = Fixture::new();
    let broken = r#"<addon id="plugin.broken" version="1.0"><extension point="kodi.addon.metadata"><assets><icon>missing.png</icon></assets></extension></addon>"#;
    fx.addon("one/plugin.broken", broken, &[]);
    fx.addon("one/plugin.fine", &plain("plugin.fine", "1.0"), &[]);
    let (engine, _) = fx.engine("[targets.main]\nsources = [\"one\"]\n");

    let report = engine.run_target("main").unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].key.to_string(), "plugin.broken");
    assert_eq!(report.added.len(), 1);
    assert!(!fx.root().join("plugin.broken").exists());

    // Still not published, so the next run retries it.
    let again = engine.run_target("main").unwrap();
    assert_eq!(again.failures.len(), 1);
}

#[test]
fn test_skin_textures_compiled() {
    let fx = Fixture::new();
    let skin = r#"<addon id="skin.demo" version="1.0"><extension point="xbmc.gui.skin"/><extension point="xbmc.addon.metadata"/></addon>"#;
    fx.addon(
        "one/skin.demo",
        skin,
        &[
            ("media/bg.png", "png"),
            ("themes/dark/bg.png", "png"),
            ("xml/Home.xml", "<window/>"),
            ("_screenshots/1.png", "png"),
        ],
    );
    let (engine, compiler) = fx.engine("[targets.main]\nsources = [\"one\"]\n");
    engine.run_target("main").unwrap();

    assert_eq!(compiler.calls.lock().unwrap().len(), 2);
    let reader = ArchiveReader::open(&fx.root().join("skin.demo/skin.demo-1.0.zip")).unwrap();
    assert!(reader.contains("skin.demo/media/Textures.xbt"));
    assert!(reader.contains("skin.demo/media/dark.xbt"));
    assert!(reader.contains("skin.demo/xml/Home.xml"));
    assert!(!reader.contains("skin.demo/media/bg.png"));
    assert!(!reader.names().iter().any(|n| n.contains("_screenshots")));
}

#[test]
fn test_corrupt_published_archive_excluded_from_index() {
    let fx = Fixture::new();
    fx.addon("one/plugin.fine", &plain("plugin.fine", "1.0"), &[]);
    let (engine, _) = fx.engine("[targets.main]\nsources = [\"one\"]\n");
    engine.run_target("main").unwrap();

    let bad = fx.root().join("plugin.bad");
    fs::create_dir_all(&bad).unwrap();
    fs::write(bad.join("plugin.bad-1.0.zip"), b"not a zip").unwrap();

    let report = engine.reindex_target("main").unwrap();
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.skipped.len(), 1);
}

#[test]
fn test_concurrent_run_is_rejected() {
    let fx = Fixture::new();
    let (engine, _) = fx.engine("[targets.main]\nsources = [\"one\"]\n");
    fs::create_dir_all(fx.root()).unwrap();
    let _held = addonsync_core::lock::RootLock::acquire(&fx.root()).unwrap();

    let err = engine.run_target("main").unwrap_err();
    assert!(matches!(err, SyncError::Locked(_)));
}

#[test]
fn test_downgrade_outside_retention_is_not_republished() {
    let fx = Fixture::new();
    let (engine, _) = fx.engine("[targets.main]\nsources = [\"one\"]\nretention = 1\n");
    fx.addon("one/plugin.x", &plain("plugin.x", "1.2"), &[("icon.png", "icon-1.2")]);
    engine.run_target("main").unwrap();

    fx.addon("one/plugin.x", &plain("plugin.x", "1.1"), &[("icon.png", "icon-1.1")]);
    let entry = fx.root().join("plugin.x");
    for _ in 0..3 {
        let report = engine.run_target("main").unwrap();
        assert!(report.added.is_empty());
        assert!(report.pruned.is_empty());
        assert_eq!(report.superseded.len(), 1);
        assert_eq!(report.superseded[0].1, Version::new("1.1"));
        assert_eq!(file_names(&entry), vec!["icon.png", "plugin.x-1.2.zip"]);
        assert_eq!(fs::read_to_string(entry.join("icon.png")).unwrap(), "icon-1.2");
    }
}

#[test]
fn test_downgrade_within_retention_keeps_newest_companions() {
    let fx = Fixture::new();
    let (engine, _) = fx.engine("[targets.main]\nsources = [\"one\"]\nretention = 3\n");
    fx.addon("one/plugin.x", &plain("plugin.x", "1.2"), &[("icon.png", "icon-1.2")]);
    engine.run_target("main").unwrap();

    fx.addon("one/plugin.x", &plain("plugin.x", "1.1"), &[("icon.png", "icon-1.1")]);
    let first = engine.run_target("main").unwrap();
    assert_eq!(first.added.len(), 1);
    assert!(first.pruned.is_empty());

    let entry = fx.root().join("plugin.x");
    assert_eq!(
        file_names(&entry),
        vec!["icon.png", "plugin.x-1.1.zip", "plugin.x-1.2.zip"]
    );
    assert_eq!(fs::read_to_string(entry.join("icon.png")).unwrap(), "icon-1.2");
    let index = fs::read_to_string(fx.root().join("addons.xml")).unwrap();
    assert!(index.contains("<path>plugin.x/plugin.x-1.2.zip</path>"));

    let second = engine.run_target("main").unwrap();
    assert!(second.added.is_empty());
    assert_eq!(second.unchanged, 1);
}

#[test]
fn test_binary_archives_published_per_platform() {
    let fx = Fixture::new();
    let binaries = fx.up("binaries");
    for (platform, version) in [("linux-x86_64", "2.1.0"), ("android-aarch64", "2.0.5")] {
        let tree = tempfile::tempdir().unwrap();
        fs::write(
            tree.path().join("addon.xml"),
            plain("inputstream.demo", version),
        )
        .unwrap();
        fs::create_dir_all(tree.path().join("lib")).unwrap();
        fs::write(tree.path().join("lib/inputstream.so"), vec![0u8; 4096]).unwrap();
        let dir = binaries.join(format!("inputstream.demo+{platform}"));
        fs::create_dir_all(&dir).unwrap();
        write_zip(
            tree.path(),
            "inputstream.demo",
            &dir.join(format!("inputstream.demo-{version}.zip")),
        )
        .unwrap();
    }

    let text = format!(
        r#"
output_dir = "{}"

[[sources]]
name = "bin"
kind = "binary"
path = "{}"

[targets.main]
"#,
        fx.output.path().display(),
        binaries.display(),
    );
    let engine = SyncEngine::new(SyncConfig::parse(&text).unwrap())
        .with_compiler(Box::new(FakeCompiler::default()));

    let report = engine.run_target("main").unwrap();
    let mut added: Vec<String> = report.added.iter().map(|(k, v)| format!("{k} {v}")).collect();
    added.sort();
    assert_eq!(
        added,
        vec![
            "inputstream.demo+android-aarch64 2.0.5",
            "inputstream.demo+linux-x86_64 2.1.0"
        ]
    );

    let linux = fx
        .root()
        .join("inputstream.demo+linux-x86_64/inputstream.demo-2.1.0.zip");
    assert!(linux.is_file());
    assert_deflated(&linux);
    let reader = ArchiveReader::open(&linux).unwrap();
    assert!(reader.contains("inputstream.demo/lib/inputstream.so"));

    let index = fs::read_to_string(fx.root().join("addons.xml")).unwrap();
    assert_eq!(index.matches(r#"id="inputstream.demo""#).count(), 2);
    assert!(index.contains(
        "<path>inputstream.demo+linux-x86_64/inputstream.demo-2.1.0.zip</path>"
    ));
    assert!(index.contains(
        "<path>inputstream.demo+android-aarch64/inputstream.demo-2.0.5.zip</path>"
    ));
}
