//! Run configuration.
//!
//! Loaded once per invocation from TOML and passed down by reference; nothing
//! in the engine mutates it.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use addonsync_schema::{AddonId, Version};
use serde::Deserialize;
use thiserror::Error;

use crate::layout;

/// Default number of archives kept per package.
pub const DEFAULT_RETENTION: NonZeroUsize = match NonZeroUsize::new(3) {
    Some(n) => n,
    None => unreachable!(),
};

/// Errors loading or validating a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The configuration file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but its values are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Content-hash sidecar written next to `addons.xml.gz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    /// `addons.xml.gz.md5`
    #[default]
    Md5,
    /// `addons.xml.gz.sha256`
    Sha256,
    /// No sidecar.
    None,
}

impl ChecksumKind {
    /// Sidecar file extension, `None` when disabled.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Self::Md5 => Some("md5"),
            Self::Sha256 => Some("sha256"),
            Self::None => None,
        }
    }
}

impl std::str::FromStr for ChecksumKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "none" => Ok(Self::None),
            other => Err(format!("unknown checksum '{other}' (expected md5, sha256 or none)")),
        }
    }
}

/// How an upstream location is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A local git repository, scanned per ref.
    Git,
    /// A plain directory; refs name subdirectories.
    Directory,
    /// Pre-built archives under `id[+platform]/` directories.
    Binary,
}

/// One `[[sources]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Unique name, referenced from targets.
    pub name: String,
    /// Source flavor.
    pub kind: SourceKind,
    /// Location, relative paths resolved against the config file.
    pub path: PathBuf,
}

/// A named publication configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Refs scanned in every ref-aware source, in order.
    #[serde(default)]
    pub refs: Vec<String>,
    /// Restrict the target to these sources. Empty means all.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Archives kept per package.
    #[serde(default = "default_retention")]
    pub retention: NonZeroUsize,
    /// Dependency gate: identity -> minimum version a dependent must import.
    #[serde(default)]
    pub min_versions: BTreeMap<AddonId, Version>,
}

fn default_retention() -> NonZeroUsize {
    DEFAULT_RETENTION
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    /// Parent directory of every target's published root.
    output_dir: PathBuf,
    /// Texture compiler program, looked up on `PATH` when not a path.
    #[serde(default = "default_texture_packer")]
    texture_packer: String,
    #[serde(default)]
    checksum: ChecksumKind,
    /// Pretty-print `addons.xml`.
    #[serde(default)]
    pretty_index: bool,
    /// Delete target directories under `output_dir` that are no longer configured.
    #[serde(default)]
    remove_stale_targets: bool,
    #[serde(default)]
    sources: Vec<SourceConfig>,
    /// Targets in file order.
    #[serde(default)]
    targets: toml::map::Map<String, toml::Value>,
}

fn default_texture_packer() -> String {
    "TexturePacker".to_string()
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Parent of every target's published root.
    pub output_dir: PathBuf,
    /// Texture compiler program.
    pub texture_packer: String,
    /// Index sidecar kind.
    pub checksum: ChecksumKind,
    /// Indent `addons.xml`.
    pub pretty_index: bool,
    /// Delete unconfigured directories under `output_dir` before a full run.
    pub remove_stale_targets: bool,
    /// Sources in file order.
    pub sources: Vec<SourceConfig>,
    /// `(name, target)` in file order.
    pub targets: Vec<(String, TargetConfig)>,
}

impl SyncConfig {
    /// Load and validate a TOML configuration file.
    ///
    /// Relative paths are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        Ok(config)
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text is not valid TOML or fails
    /// validation.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;

        let mut targets = Vec::with_capacity(raw.targets.len());
        for (name, value) in raw.targets {
            let target: TargetConfig = value.try_into()?;
            targets.push((name, target));
        }

        let config = Self {
            output_dir: raw.output_dir,
            texture_packer: raw.texture_packer,
            checksum: raw.checksum,
            pretty_index: raw.pretty_index,
            remove_stale_targets: raw.remove_stale_targets,
            sources: raw.sources,
            targets,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid("no targets configured".into()));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
        }

        for (name, target) in &self.targets {
            if name.is_empty()
                || layout::is_hidden(name)
                || name.contains(['/', '\\'])
            {
                return Err(ConfigError::Invalid(format!("invalid target name '{name}'")));
            }
            for source in &target.sources {
                if !names.contains(source.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "target '{name}' references unknown source '{source}'"
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve_relative(&mut self, base: &Path) {
        if self.output_dir.is_relative() {
            self.output_dir = base.join(&self.output_dir);
        }
        for source in &mut self.sources {
            if source.path.is_relative() {
                source.path = base.join(&source.path);
            }
        }
    }

    /// Published root of a target.
    pub fn target_root(&self, name: &str) -> PathBuf {
        self.output_dir.join(name)
    }

    /// Sources a target scans, in configuration order.
    pub fn sources_for<'a>(&'a self, target: &'a TargetConfig) -> impl Iterator<Item = &'a SourceConfig> + 'a {
        self.sources
            .iter()
            .filter(move |s| target.sources.is_empty() || target.sources.contains(&s.name))
    }
}
