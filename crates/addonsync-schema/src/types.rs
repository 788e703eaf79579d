//! Package identities: addon ids, platforms and the keys naming entry directories.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::version::Version;

/// Separator between identity and platform in published directory names.
pub const PLATFORM_SEPARATOR: char = '+';

/// Errors raised when an identity or platform token is unusable.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The token is empty.
    #[error("empty {0}")]
    Empty(&'static str),

    /// The token cannot be used as a single path component.
    #[error("invalid {kind} '{value}': must be a single path component without '+'")]
    Invalid {
        /// Which kind of token was rejected (`addon id` or `platform`).
        kind: &'static str,
        /// The rejected value.
        value: String,
    },
}

fn check_token(kind: &'static str, value: &str) -> Result<(), IdentityError> {
    if value.is_empty() {
        return Err(IdentityError::Empty(kind));
    }
    let unsafe_char = |c: char| matches!(c, '/' | '\\' | PLATFORM_SEPARATOR) || c.is_control();
    if value == "." || value == ".." || value.contains(unsafe_char) {
        return Err(IdentityError::Invalid {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Addon identity (e.g. `plugin.video.example`).
///
/// Case-sensitive and stable across versions. Identities double as directory
/// names and archive path prefixes, so they are validated to be a single safe
/// path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddonId(String);

impl AddonId {
    /// Validate and wrap an identity.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if `id` is empty or not a safe path component.
    pub fn new(id: &str) -> Result<Self, IdentityError> {
        check_token("addon id", id)?;
        Ok(Self(id.to_string()))
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AddonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AddonId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AddonId {
    type Error = IdentityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        check_token("addon id", &s)?;
        Ok(Self(s))
    }
}

impl From<AddonId> for String {
    fn from(id: AddonId) -> Self {
        id.0
    }
}

/// Platform tag for platform-specific binary addons (e.g. `android-aarch64`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform(String);

impl Platform {
    /// Validate and wrap a platform tag.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if `tag` is empty or not a safe path component.
    pub fn new(tag: &str) -> Result<Self, IdentityError> {
        check_token("platform", tag)?;
        Ok(Self(tag.to_string()))
    }

    /// The platform tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Platform {
    type Error = IdentityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        check_token("platform", &s)?;
        Ok(Self(s))
    }
}

impl From<Platform> for String {
    fn from(p: Platform) -> Self {
        p.0
    }
}

/// Uniqueness key of a published package: identity plus optional platform.
///
/// Rendered as `id` or `id+platform`; this is also the name of the package's
/// directory in a published root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageKey {
    /// Addon identity.
    pub id: AddonId,
    /// Platform tag, present only for platform-specific packages.
    pub platform: Option<Platform>,
}

impl PackageKey {
    /// Key for a platform-independent package.
    pub fn new(id: AddonId) -> Self {
        Self { id, platform: None }
    }

    /// Key for a platform-specific package.
    pub fn with_platform(id: AddonId, platform: Platform) -> Self {
        Self {
            id,
            platform: Some(platform),
        }
    }

    /// Parse a published directory name (`id` or `id+platform`).
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if either half is not a valid token.
    pub fn from_dir_name(name: &str) -> Result<Self, IdentityError> {
        match name.split_once(PLATFORM_SEPARATOR) {
            Some((id, platform)) => Ok(Self::with_platform(
                AddonId::new(id)?,
                Platform::new(platform)?,
            )),
            None => Ok(Self::new(AddonId::new(name)?)),
        }
    }

    /// Directory name of this package inside a published root.
    pub fn dir_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.platform {
            Some(platform) => write!(f, "{}{PLATFORM_SEPARATOR}{platform}", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// A declared dependency (`<requires><import addon=".." version=".."/>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Identity of the required addon.
    pub id: AddonId,
    /// Minimum version the dependent was built against (`0.0.0` when absent).
    pub min_version: Version,
    /// Whether the import is marked `optional="true"`.
    pub optional: bool,
}
