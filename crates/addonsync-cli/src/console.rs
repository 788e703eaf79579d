//! Terminal output for engine events.

use addonsync_core::Reporter;
use addonsync_schema::{PackageKey, Version};

/// Prints one short line per event; warnings and failures go to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn target_started(&self, target: &str) {
        println!("{target}");
    }

    fn added(&self, key: &PackageKey, version: &Version) {
        println!("  + {key} {version}");
    }

    fn removed(&self, key: &PackageKey) {
        println!("  - {key}");
    }

    fn pruned(&self, key: &PackageKey, version: &Version) {
        println!("  pruned {key} {version}");
    }

    fn failed(&self, key: &PackageKey, version: &Version, reason: &str) {
        eprintln!("  failed {key} {version}: {reason}");
    }

    fn warning(&self, msg: &str) {
        eprintln!("  warning: {msg}");
    }

    fn summary(&self, target: &str, added: usize, removed: usize, failed: usize) {
        println!("  {target}: {added} added, {removed} removed, {failed} failed");
    }
}
