//! Reporter trait for dependency injection
//!
//! This trait allows the engine to report progress and outcomes without
//! being coupled to a specific console or service front end.

use addonsync_schema::{PackageKey, Version};

/// Receives engine events as they happen.
pub trait Reporter: Send + Sync {
    /// A target's pipeline has started.
    fn target_started(&self, target: &str);

    /// A package version was packaged and published.
    fn added(&self, key: &PackageKey, version: &Version);

    /// A package directory was removed because nothing upstream resolves to it.
    fn removed(&self, key: &PackageKey);

    /// An archive fell outside the retention window and was deleted.
    fn pruned(&self, key: &PackageKey, version: &Version);

    /// Packaging a package version failed; the run continues.
    fn failed(&self, key: &PackageKey, version: &Version, reason: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Final counts for one target.
    fn summary(&self, target: &str, added: usize, removed: usize, failed: usize);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn target_started(&self, target: &str) {
        (**self).target_started(target);
    }
    fn added(&self, key: &PackageKey, version: &Version) {
        (**self).added(key, version);
    }
    fn removed(&self, key: &PackageKey) {
        (**self).removed(key);
    }
    fn pruned(&self, key: &PackageKey, version: &Version) {
        (**self).pruned(key, version);
    }
    fn failed(&self, key: &PackageKey, version: &Version, reason: &str) {
        (**self).failed(key, version, reason);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, target: &str, added: usize, removed: usize, failed: usize) {
        (**self).summary(target, added, removed, failed);
    }
}

/// A no-op reporter for silent operations (e.g., library use, testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn target_started(&self, _: &str) {}
    fn added(&self, _: &PackageKey, _: &Version) {}
    fn removed(&self, _: &PackageKey) {}
    fn pruned(&self, _: &PackageKey, _: &Version) {}
    fn failed(&self, _: &PackageKey, _: &Version, _: &str) {}
    fn warning(&self, _: &str) {}
    fn summary(&self, _: &str, _: usize, _: usize, _: usize) {}
}
