//! Shared types and wire formats for addonsync.
//!
//! Everything here is free of repository side effects: version ordering,
//! package identities and the `addon.xml` manifest model.

pub mod manifest;
pub mod types;
pub mod version;

// Re-exports
pub use manifest::{Companions, Manifest, ManifestError};
pub use types::*;
pub use version::{Version, VersionError};

/// File name of the manifest at the root of every package tree.
pub const MANIFEST_FILE: &str = "addon.xml";
