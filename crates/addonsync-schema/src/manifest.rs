//! The `addon.xml` manifest model and its reader.
//!
//! Only the parts the synchronization engine acts on are extracted: identity,
//! version, declared imports, extension points that change packaging, and the
//! optional explicit asset list of the metadata extension.

use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::types::{AddonId, Dependency, IdentityError};
use crate::version::Version;

/// Current metadata extension point.
pub const METADATA_POINT: &str = "kodi.addon.metadata";
/// Legacy metadata extension point, consulted when the current one is absent.
pub const LEGACY_METADATA_POINT: &str = "xbmc.addon.metadata";
/// Extension point marking a themeable UI skin.
pub const SKIN_POINT: &str = "xbmc.gui.skin";
/// Minimum version recorded for an import that does not declare one.
pub const DEFAULT_IMPORT_VERSION: &str = "0.0.0";

/// Conventional companion files used when no explicit asset list exists.
pub const CONVENTIONAL_COMPANIONS: [&str; 3] = ["icon.png", "fanart.jpg", "changelog.txt"];

/// Returns true for either metadata extension point identifier.
pub fn is_metadata_point(point: &str) -> bool {
    point == METADATA_POINT || point == LEGACY_METADATA_POINT
}

/// Errors raised while reading a manifest.
///
/// Every variant means "skip this candidate"; none of them is fatal to a run.
#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    /// The document is not well-formed XML.
    #[error("malformed manifest: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The document has no root element.
    #[error("malformed manifest: no root element")]
    MissingRoot,

    /// The root element is not `<addon>`, or a second root follows it.
    #[error("malformed manifest: unexpected root element <{0}>")]
    UnexpectedRoot(String),

    /// A required attribute is absent or empty.
    #[error("malformed manifest: missing required attribute '{0}'")]
    MissingAttribute(&'static str),

    /// The identity is not usable as a package key.
    #[error("malformed manifest: {0}")]
    InvalidId(#[from] IdentityError),

    /// The document ended with unclosed elements.
    #[error("malformed manifest: document truncated inside <{0}>")]
    Truncated(String),

    /// The manifest file could not be read.
    #[error("failed to read manifest {path}: {source}")]
    Io {
        /// Path of the manifest file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// How a package's companion files are chosen.
///
/// Selected once per package; the two variants are never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Companions<'a> {
    /// Exactly the paths listed in the metadata `<assets>` element.
    Explicit(&'a [String]),
    /// `icon.png`, `fanart.jpg` and `changelog.txt`, each if present.
    Conventional,
}

/// A parsed `addon.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// The `id` attribute of `<addon>`.
    pub id: AddonId,
    /// The `version` attribute of `<addon>`, parsed permissively.
    pub version: Version,
    /// The `name` attribute, if any.
    pub name: Option<String>,
    /// `<requires><import .../></requires>` entries in document order.
    pub requires: Vec<Dependency>,
    /// Every `point` attribute of top-level `<extension>` elements.
    pub extension_points: Vec<String>,
    /// The package declares the skin extension point.
    pub is_skin: bool,
    /// Some extension carries `compile="true"`.
    pub compile_textures: bool,
    /// Explicit asset paths from the metadata extension, if it has `<assets>`.
    pub assets: Option<Vec<String>>,
}

impl Manifest {
    /// Parse a manifest document.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] if the XML does not parse, the root is not
    /// `<addon>`, or `id`/`version` are missing.
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut stack: Vec<String> = Vec::new();
        let mut builder = Builder::default();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let name = local_name(&e);
                    builder.open(&stack, &name, &e)?;
                    stack.push(name);
                }
                Event::Empty(e) => {
                    let name = local_name(&e);
                    builder.open(&stack, &name, &e)?;
                    builder.close(&stack, &name);
                }
                Event::End(_) => {
                    if let Some(name) = stack.pop() {
                        builder.close(&stack, &name);
                    }
                }
                Event::Text(t) => {
                    if builder.collecting_asset(&stack) {
                        let text = t.unescape()?;
                        builder.push_asset(&text);
                    }
                }
                Event::CData(c) => {
                    if builder.collecting_asset(&stack) {
                        builder.push_asset(&String::from_utf8_lossy(&c));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if let Some(open) = stack.pop() {
            return Err(ManifestError::Truncated(open));
        }
        builder.finish()
    }

    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the file cannot be read, otherwise as
    /// [`Manifest::parse`].
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let bytes = fs::read(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes)
    }

    /// Companion resolution for this package.
    pub fn companions(&self) -> Companions<'_> {
        match &self.assets {
            Some(paths) => Companions::Explicit(paths),
            None => Companions::Conventional,
        }
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Result<Option<String>, ManifestError> {
    match e.try_get_attribute(key).map_err(quick_xml::Error::from)? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

#[derive(Default)]
struct Builder {
    root_seen: bool,
    id: Option<String>,
    version: Option<String>,
    name: Option<String>,
    requires: Vec<Dependency>,
    extension_points: Vec<String>,
    is_skin: bool,
    compile_textures: bool,
    open_point: Option<String>,
    collecting: Option<Vec<String>>,
    current_assets: Option<Vec<String>>,
    legacy_assets: Option<Vec<String>>,
}

impl Builder {
    fn open(&mut self, stack: &[String], name: &str, e: &BytesStart<'_>) -> Result<(), ManifestError> {
        match stack {
            [] => {
                if self.root_seen || name != "addon" {
                    return Err(ManifestError::UnexpectedRoot(name.to_string()));
                }
                self.root_seen = true;
                self.id = attribute(e, "id")?;
                self.version = attribute(e, "version")?;
                self.name = attribute(e, "name")?;
            }
            [root] if root == "addon" && name == "extension" => {
                let point = attribute(e, "point")?.unwrap_or_default();
                if attribute(e, "compile")?.as_deref() == Some("true") {
                    self.compile_textures = true;
                }
                if point == SKIN_POINT {
                    self.is_skin = true;
                }
                if !point.is_empty() {
                    self.extension_points.push(point.clone());
                }
                self.open_point = Some(point);
            }
            [root, parent] if root == "addon" && parent == "requires" && name == "import" => {
                let addon = attribute(e, "addon")?
                    .filter(|s| !s.is_empty())
                    .ok_or(ManifestError::MissingAttribute("import/addon"))?;
                let version = attribute(e, "version")?
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_IMPORT_VERSION.to_string());
                let optional = attribute(e, "optional")?.as_deref() == Some("true");
                self.requires.push(Dependency {
                    id: AddonId::new(&addon)?,
                    min_version: Version::new(&version),
                    optional,
                });
            }
            [root, parent] if root == "addon" && parent == "extension" && name == "assets" => {
                if self.open_point.as_deref().is_some_and(is_metadata_point) {
                    self.collecting = Some(Vec::new());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, stack: &[String], name: &str) {
        match (stack.len(), name) {
            (1, "extension") => self.open_point = None,
            (2, "assets") => {
                let Some(list) = self.collecting.take() else {
                    return;
                };
                let slot = if self.open_point.as_deref() == Some(METADATA_POINT) {
                    &mut self.current_assets
                } else {
                    &mut self.legacy_assets
                };
                if slot.is_none() {
                    *slot = Some(list);
                }
            }
            _ => {}
        }
    }

    fn collecting_asset(&self, stack: &[String]) -> bool {
        self.collecting.is_some() && stack.len() == 4 && stack[2] == "assets"
    }

    fn push_asset(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if let Some(list) = self.collecting.as_mut() {
            list.push(text.to_string());
        }
    }

    fn finish(self) -> Result<Manifest, ManifestError> {
        if !self.root_seen {
            return Err(ManifestError::MissingRoot);
        }
        let id = self
            .id
            .filter(|s| !s.is_empty())
            .ok_or(ManifestError::MissingAttribute("id"))?;
        let version = self
            .version
            .filter(|s| !s.trim().is_empty())
            .ok_or(ManifestError::MissingAttribute("version"))?;

        Ok(Manifest {
            id: AddonId::new(&id)?,
            version: Version::new(&version),
            name: self.name,
            requires: self.requires,
            extension_points: self.extension_points,
            is_skin: self.is_skin,
            compile_textures: self.compile_textures,
            assets: self.current_assets.or(self.legacy_assets),
        })
    }
}
