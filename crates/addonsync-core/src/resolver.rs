//! Version resolution: one artifact per package key.
//!
//! Candidates first pass the target's dependency gate; survivors are grouped
//! by key and the highest version of each group wins. When several candidates
//! share the winning version the first one encountered is kept and the tie is
//! logged, the choice between them being otherwise unspecified.

use std::collections::BTreeMap;

use addonsync_schema::{AddonId, Dependency, Manifest, PackageKey, Version};
use tracing::{debug, warn};

use crate::scanner::Candidate;
use crate::source::LocationRef;

/// Target-level table of minimum versions dependents must be built against.
///
/// A dependency that is not in the table is unconstrained.
#[derive(Debug, Clone, Default)]
pub struct DependencyGate {
    min_versions: BTreeMap<AddonId, Version>,
}

/// Why a candidate did not pass the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRejection {
    /// The gated dependency.
    pub dependency: AddonId,
    /// Version the candidate imports.
    pub declared: Version,
    /// Version the target requires.
    pub required: Version,
}

impl DependencyGate {
    /// Gate over a table of dependency minimums.
    pub fn new(min_versions: BTreeMap<AddonId, Version>) -> Self {
        Self { min_versions }
    }

    /// Check every declared dependency against the table.
    ///
    /// # Errors
    ///
    /// Returns the first dependency whose declared version is below the
    /// target's minimum.
    pub fn check(&self, dependencies: &[Dependency]) -> Result<(), GateRejection> {
        for dep in dependencies {
            if let Some(required) = self.min_versions.get(&dep.id) {
                if dep.min_version < *required {
                    return Err(GateRejection {
                        dependency: dep.id.clone(),
                        declared: dep.min_version.clone(),
                        required: required.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The single selected version of a package key for one target.
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    /// Entry directory key.
    pub key: PackageKey,
    /// Winning version.
    pub version: Version,
    /// Where the winning snapshot lives upstream.
    pub location: LocationRef,
    /// Its parsed manifest.
    pub manifest: Manifest,
    /// Name of the source it came from.
    pub source: String,
}

impl From<Candidate> for ResolvedArtifact {
    fn from(c: Candidate) -> Self {
        Self {
            key: c.key,
            version: c.version,
            location: c.location,
            manifest: c.manifest,
            source: c.source,
        }
    }
}

/// Several candidates shared the winning version of a key.
#[derive(Debug, Clone)]
pub struct Tie {
    /// Contested key.
    pub key: PackageKey,
    /// The shared version.
    pub version: Version,
    /// The candidate that was kept.
    pub chosen: LocationRef,
    /// The equal-version candidates that were dropped.
    pub others: Vec<LocationRef>,
}

/// Result of resolving one target's candidates.
#[derive(Debug, Default)]
pub struct Resolution {
    /// At most one artifact per key, sorted by key.
    pub resolved: Vec<ResolvedArtifact>,
    /// Candidates filtered out by the dependency gate.
    pub gated: Vec<(PackageKey, Version, GateRejection)>,
    /// Keys whose winning version had more than one candidate.
    pub ties: Vec<Tie>,
}

/// Resolve candidates (in encounter order) against a gate.
pub fn resolve(candidates: Vec<Candidate>, gate: &DependencyGate) -> Resolution {
    let mut resolution = Resolution::default();
    let mut groups: BTreeMap<PackageKey, Vec<Candidate>> = BTreeMap::new();

    for candidate in candidates {
        if let Err(rejection) = gate.check(candidate.dependencies()) {
            debug!(
                addon = %candidate.key,
                version = %candidate.version,
                dependency = %rejection.dependency,
                declared = %rejection.declared,
                required = %rejection.required,
                "dependency gate unmet, skipping"
            );
            resolution
                .gated
                .push((candidate.key, candidate.version, rejection));
            continue;
        }
        groups.entry(candidate.key.clone()).or_default().push(candidate);
    }

    for (key, group) in groups {
        let mut best = 0;
        for (i, candidate) in group.iter().enumerate().skip(1) {
            if candidate.version > group[best].version {
                best = i;
            }
        }

        let others: Vec<LocationRef> = group
            .iter()
            .enumerate()
            .filter(|(i, c)| *i != best && c.version == group[best].version)
            .map(|(_, c)| c.location.clone())
            .collect();

        let mut group = group;
        let winner = group.swap_remove(best);
        if !others.is_empty() {
            warn!(
                addon = %key,
                version = %winner.version,
                chosen = %winner.location,
                others = ?others.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "duplicate artifact with equal version, picking the first encountered"
            );
            resolution.ties.push(Tie {
                key: key.clone(),
                version: winner.version.clone(),
                chosen: winner.location.clone(),
                others,
            });
        }
        resolution.resolved.push(winner.into());
    }

    resolution
}
