//! Repository synchronization engine.
//!
//! For each configured target: scan upstream sources, resolve one version
//! per package, diff against the published root, package what is new, remove
//! what is gone, prune old archives and regenerate the index.

pub mod config;
pub mod error;
pub mod indexer;
pub mod io;
pub mod layout;
pub mod lock;
pub mod packager;
pub mod pipeline;
pub mod planner;
pub mod pruner;
pub mod reporter;
pub mod resolver;
pub mod scanner;
pub mod signing;
pub mod source;
pub mod textures;
pub mod walk;

pub use config::{ChecksumKind, SyncConfig, TargetConfig};
pub use error::SyncError;
pub use indexer::{IndexOptions, IndexReport, build_index};
pub use pipeline::{RunReport, SyncEngine, TargetReport};
pub use reporter::{NullReporter, Reporter};
pub use textures::{TextureCompiler, TexturePacker};
