//! The per-target pipeline:
//! scan, resolve, plan, package and remove, prune, index.
//!
//! Targets run sequentially and independently. A failure that aborts one
//! target is recorded and the next target still runs.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use addonsync_schema::{PackageKey, Version};
use tracing::{error, info, warn};

use crate::config::{SyncConfig, TargetConfig};
use crate::error::SyncError;
use crate::indexer::{self, IndexOptions, IndexReport};
use crate::layout;
use crate::lock::RootLock;
use crate::packager;
use crate::planner::SyncPlan;
use crate::pruner::{self, PrunedArchive};
use crate::reporter::{NullReporter, Reporter};
use crate::resolver::{self, DependencyGate};
use crate::scanner;
use crate::source::{self, UpstreamSource};
use crate::textures::{TextureCompiler, TexturePacker};
use crate::walk;

/// An artifact that could not be packaged during a run.
#[derive(Debug, Clone)]
pub struct PackagingFailure {
    /// Key of the artifact.
    pub key: PackageKey,
    /// Version that failed.
    pub version: Version,
    /// Rendered [`packager::PackagingError`].
    pub reason: String,
}

/// What one target run did.
#[derive(Debug, Default)]
pub struct TargetReport {
    /// Target name.
    pub target: String,
    /// Newly published versions.
    pub added: Vec<(PackageKey, Version)>,
    /// Resolved versions left unpublished because they are older than every
    /// retained archive of their entry.
    pub superseded: Vec<(PackageKey, Version)>,
    /// Entry directories removed because nothing resolves to them any more.
    pub removed: Vec<PackageKey>,
    /// Resolved keys whose archive was already published.
    pub unchanged: usize,
    /// Archives deleted by the retention policy.
    pub pruned: Vec<PrunedArchive>,
    /// Artifacts that could not be packaged.
    pub failures: Vec<PackagingFailure>,
    /// Source/ref pairs that could not be scanned.
    pub unreachable: Vec<String>,
    /// Candidates skipped for a bad manifest.
    pub malformed: Vec<String>,
    /// Candidates filtered out by the dependency gate.
    pub gated: usize,
    /// The regenerated index.
    pub index: IndexReport,
}

/// Outcome of running several targets.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Targets that completed, in configuration order.
    pub targets: Vec<TargetReport>,
    /// Targets that were aborted, with the reason.
    pub aborted: Vec<(String, SyncError)>,
    /// Unconfigured target directories deleted before the run.
    pub stale_removed: Vec<PathBuf>,
}

impl RunReport {
    /// No target was aborted.
    pub fn is_success(&self) -> bool {
        self.aborted.is_empty()
    }
}

/// Drives targets of one configuration.
pub struct SyncEngine {
    config: SyncConfig,
    compiler: Box<dyn TextureCompiler>,
    reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("compiler", &self.compiler)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Engine using the configured texture packer and no reporting.
    pub fn new(config: SyncConfig) -> Self {
        let compiler = Box::new(TexturePacker::new(&config.texture_packer));
        Self {
            config,
            compiler,
            reporter: Arc::new(NullReporter),
        }
    }

    /// Replace the texture compiler.
    #[must_use]
    pub fn with_compiler(mut self, compiler: Box<dyn TextureCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Replace the event reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The configuration this engine runs.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn index_options(&self) -> IndexOptions {
        IndexOptions {
            pretty: self.config.pretty_index,
            checksum: self.config.checksum,
        }
    }

    fn target(&self, name: &str) -> Result<&TargetConfig, SyncError> {
        self.config
            .targets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
            .ok_or_else(|| SyncError::UnknownTarget(name.to_string()))
    }

    /// Run every configured target in order.
    ///
    /// Stale target directories are removed first when configured; a failure
    /// doing so is reported as a warning and does not stop the run.
    pub fn run_all(&self) -> RunReport {
        let mut report = RunReport::default();
        if self.config.remove_stale_targets {
            match self.remove_stale_targets() {
                Ok(removed) => report.stale_removed = removed,
                Err(e) => {
                    warn!("stale target cleanup failed: {e}");
                    self.reporter.warning(&format!("stale target cleanup failed: {e}"));
                }
            }
        }

        for (name, _) in &self.config.targets {
            match self.run_target(name) {
                Ok(target) => report.targets.push(target),
                Err(e) => {
                    error!(target = %name, "target aborted: {e}");
                    report.aborted.push((name.clone(), e));
                }
            }
        }
        report
    }

    /// Synchronize one target.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the target is unknown, its published root
    /// cannot be read or written, another run holds its lock, or its index
    /// cannot be written. Per-artifact failures are in the report instead.
    pub fn run_target(&self, name: &str) -> Result<TargetReport, SyncError> {
        let target = self.target(name)?;
        let root = self.config.target_root(name);
        fs::create_dir_all(&root).map_err(|e| SyncError::root(&root, e))?;
        let _lock = RootLock::acquire(&root)?;

        self.reporter.target_started(name);
        info!(target = %name, root = %root.display(), "synchronizing");
        let mut report = TargetReport {
            target: name.to_string(),
            ..TargetReport::default()
        };

        let sources: Vec<Box<dyn UpstreamSource>> = self
            .config
            .sources_for(target)
            .map(source::from_config)
            .collect();
        let sources: Vec<&dyn UpstreamSource> = sources.iter().map(AsRef::as_ref).collect();
        let scanned = scanner::scan(&sources, &target.refs);
        for problem in scanned.unreachable.iter().chain(&scanned.malformed) {
            self.reporter.warning(problem);
        }
        report.unreachable = scanned.unreachable;
        report.malformed = scanned.malformed;

        let gate = DependencyGate::new(target.min_versions.clone());
        let resolution = resolver::resolve(scanned.candidates, &gate);
        report.gated = resolution.gated.len();

        let published = walk::published_entries(&root).map_err(|e| SyncError::root(&root, e))?;
        let plan = SyncPlan::compute(&resolution.resolved, &published, target.retention);
        info!(
            target = %name,
            added = plan.added.len(),
            removed = plan.removed.len(),
            unchanged = plan.unchanged.len(),
            superseded = plan.superseded.len(),
            "plan computed"
        );
        report.unchanged = plan.unchanged.len();
        for artifact in &plan.superseded {
            warn!(
                addon = %artifact.key,
                version = %artifact.version,
                "older than every retained archive; not published"
            );
            self.reporter.warning(&format!(
                "{} {} is older than every retained archive; not published",
                artifact.key, artifact.version
            ));
            report.superseded.push((artifact.key.clone(), artifact.version.clone()));
        }

        for artifact in &plan.added {
            let entry_dir = root.join(artifact.key.dir_name());
            match packager::package(artifact, &entry_dir, self.compiler.as_ref()) {
                Ok(packaged) => {
                    info!(
                        addon = %artifact.key,
                        version = %artifact.version,
                        size = packaged.size,
                        "published"
                    );
                    self.reporter.added(&artifact.key, &artifact.version);
                    report.added.push((artifact.key.clone(), artifact.version.clone()));
                }
                Err(e) => {
                    error!(addon = %artifact.key, version = %artifact.version, "packaging failed: {e}");
                    let reason = e.to_string();
                    self.reporter.failed(&artifact.key, &artifact.version, &reason);
                    report.failures.push(PackagingFailure {
                        key: artifact.key.clone(),
                        version: artifact.version.clone(),
                        reason,
                    });
                }
            }
        }

        for removal in &plan.removed {
            info!(addon = %removal.key, "removing entry");
            fs::remove_dir_all(&removal.dir).map_err(|e| SyncError::root(&removal.dir, e))?;
            self.reporter.removed(&removal.key);
            report.removed.push(removal.key.clone());
        }

        report.pruned = pruner::prune(&root, target.retention).map_err(|e| SyncError::root(&root, e))?;
        for pruned in &report.pruned {
            self.reporter.pruned(&pruned.key, &pruned.version);
        }

        report.index = indexer::build_index(&root, &self.index_options())?;
        for skipped in &report.index.skipped {
            self.reporter
                .warning(&format!("{} not indexed: {}", skipped.key, skipped.reason));
        }

        self.reporter
            .summary(name, report.added.len(), report.removed.len(), report.failures.len());
        Ok(report)
    }

    /// Regenerate the index of one target without synchronizing it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the target is unknown, its root does not
    /// exist, it is locked, or the index cannot be written.
    pub fn reindex_target(&self, name: &str) -> Result<IndexReport, SyncError> {
        self.target(name)?;
        let root = self.config.target_root(name);
        if !root.is_dir() {
            return Err(SyncError::root(
                &root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            ));
        }
        let _lock = RootLock::acquire(&root)?;
        Ok(indexer::build_index(&root, &self.index_options())?)
    }

    /// Regenerate every target's index, in configuration order.
    pub fn reindex_all(&self) -> Vec<(String, Result<IndexReport, SyncError>)> {
        self.config
            .targets
            .iter()
            .map(|(name, _)| (name.clone(), self.reindex_target(name)))
            .collect()
    }

    /// Delete non-hidden directories under `output_dir` that are not
    /// configured targets.
    ///
    /// # Errors
    ///
    /// Returns an error if `output_dir` cannot be read or a directory cannot
    /// be removed.
    pub fn remove_stale_targets(&self) -> Result<Vec<PathBuf>, SyncError> {
        let output = &self.config.output_dir;
        if !output.is_dir() {
            return Ok(Vec::new());
        }
        let mut removed = Vec::new();
        for entry in fs::read_dir(output).map_err(|e| SyncError::root(output, e))? {
            let entry = entry.map_err(|e| SyncError::root(output, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
            if !is_dir || layout::is_hidden(&name) || self.config.targets.iter().any(|(t, _)| *t == name) {
                continue;
            }
            let path = entry.path();
            warn!(dir = %path.display(), "removing unconfigured target");
            remove_tree(&path)?;
            removed.push(path);
        }
        removed.sort();
        Ok(removed)
    }
}

fn remove_tree(path: &Path) -> Result<(), SyncError> {
    fs::remove_dir_all(path).map_err(|e| SyncError::root(path, e))
}
