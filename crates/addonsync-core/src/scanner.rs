//! Candidate enumeration across configured sources.
//!
//! Scanning is best-effort: an unreachable source/ref pair or an unreadable
//! manifest is logged and skipped, never fatal.

use addonsync_schema::{Dependency, Manifest, PackageKey, Version};
use tracing::{debug, warn};

use crate::source::{LocationRef, UpstreamSource};

/// One package snapshot found by a scan.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Identity (from the manifest) plus platform (from the source layout).
    pub key: PackageKey,
    /// Manifest version.
    pub version: Version,
    /// How to materialize this exact snapshot.
    pub location: LocationRef,
    /// The parsed `addon.xml`.
    pub manifest: Manifest,
    /// Name of the source the candidate came from.
    pub source: String,
}

impl Candidate {
    /// Declared `requires/import` entries.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.manifest.requires
    }
}

/// Everything a scan produced, including what it had to skip.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Candidates in encounter order: sources in configuration order, refs in
    /// target order, package directories in name order.
    pub candidates: Vec<Candidate>,
    /// `source@ref: reason` for every pair that could not be scanned.
    pub unreachable: Vec<String>,
    /// `location: reason` for every package root whose manifest was rejected.
    pub malformed: Vec<String>,
}

/// Scan every source at every ref.
///
/// Ref-independent sources are scanned once regardless of `refs`; when `refs`
/// is empty, ref-aware sources are scanned at their default ref.
pub fn scan(sources: &[&dyn UpstreamSource], refs: &[String]) -> ScanOutcome {
    let default_refs = [String::new()];
    let refs = if refs.is_empty() { &default_refs[..] } else { refs };

    let mut outcome = ScanOutcome::default();
    for source in sources {
        let pass: &[String] = if source.uses_refs() { refs } else { &default_refs };
        for reference in pass {
            scan_one(*source, reference, &mut outcome);
        }
    }
    outcome
}

fn scan_one(source: &dyn UpstreamSource, reference: &str, outcome: &mut ScanOutcome) {
    let roots = match source.scan(reference) {
        Ok(roots) => roots,
        Err(e) => {
            warn!(source = source.name(), reference, "skipping source: {e}");
            outcome
                .unreachable
                .push(format!("{}@{reference}: {e}", source.name()));
            return;
        }
    };

    for root in roots {
        let manifest = match Manifest::parse(&root.manifest) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(location = %root.location, "skipping candidate: {e}");
                outcome.malformed.push(format!("{}: {e}", root.location));
                continue;
            }
        };

        let key = PackageKey {
            id: manifest.id.clone(),
            platform: root.platform.clone(),
        };
        if root.name != key.dir_name() {
            warn!(
                location = %root.location,
                addon = %key,
                "directory name '{}' differs from manifest id", root.name
            );
        }

        debug!(addon = %key, version = %manifest.version, location = %root.location, "found candidate");
        outcome.candidates.push(Candidate {
            key,
            version: manifest.version.clone(),
            location: root.location,
            manifest,
            source: source.name().to_string(),
        });
    }
}
