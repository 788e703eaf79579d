//! addonsync - addon repository synchronization CLI

mod console;

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use addonsync_core::signing::{self, SIGNING_KEY_ENV};
use addonsync_core::{ChecksumKind, IndexOptions, RunReport, SyncConfig, SyncEngine, pruner};

use console::ConsoleReporter;

#[derive(Parser)]
#[command(name = "addonsync", version = env!("ADDONSYNC_VERSION"))]
#[command(about = "Keep an addon repository in sync with its upstream sources", long_about = None)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize every target, or one
    Sync {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Only this target
        #[arg(short, long)]
        target: Option<String>,
    },
    /// Regenerate the index of every configured target
    Reindex {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Regenerate the index of one published root
    Index {
        root: PathBuf,
        /// Indent addons.xml
        #[arg(long)]
        pretty: bool,
        /// Digest sidecar: md5, sha256 or none
        #[arg(long, default_value = "md5")]
        checksum: ChecksumKind,
    },
    /// Keep only the newest archives of every package in a published root
    Prune {
        root: PathBuf,
        /// Archives to keep per package
        #[arg(long, default_value = "3")]
        keep: NonZeroUsize,
    },
    /// Generate a new Ed25519 signing keypair
    Keygen,
    /// Sign new archives and the index of a published root
    Sign {
        root: PathBuf,
        /// Base64 secret key
        #[arg(long, env = SIGNING_KEY_ENV, hide_env_values = true)]
        key: String,
    },
    /// Verify every signature in a published root
    Verify {
        root: PathBuf,
        /// Base64 public key
        #[arg(long)]
        public_key: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    debug!(version = env!("ADDONSYNC_VERSION"), "starting");
    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Sync { config, target } => sync(&config, target.as_deref()),
        Commands::Reindex { config } => reindex(&config),
        Commands::Index {
            root,
            pretty,
            checksum,
        } => {
            let report = addonsync_core::build_index(&root, &IndexOptions { pretty, checksum })
                .with_context(|| format!("failed to index {}", root.display()))?;
            println!(
                "indexed {} packages ({} skipped)",
                report.entries.len(),
                report.skipped.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Prune { root, keep } => {
            let pruned = pruner::prune(&root, keep)
                .with_context(|| format!("failed to prune {}", root.display()))?;
            for p in &pruned {
                println!("  pruned {} {}", p.key, p.version);
            }
            println!("pruned {} archives", pruned.len());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Keygen => {
            let pair = signing::generate_keypair();
            println!("secret key (store as {SIGNING_KEY_ENV}):");
            println!("{}", pair.secret);
            println!("public key:");
            println!("{}", pair.public);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Sign { root, key } => {
            let key = signing::signing_key_from_base64(&key).context("invalid signing key")?;
            let signed = signing::sign_repository(&root, &key)?;
            for path in &signed {
                println!("  signed {}", display_relative(&root, path));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify { root, public_key } => {
            let key = signing::verifying_key_from_base64(&public_key).context("invalid public key")?;
            let results = signing::verify_repository(&root, &key)?;
            let mut invalid = 0;
            for result in &results {
                match &result.problem {
                    None => println!("  ok      {}", display_relative(&root, &result.path)),
                    Some(problem) => {
                        invalid += 1;
                        println!("  invalid {}: {problem}", display_relative(&root, &result.path));
                    }
                }
            }
            println!("{} signatures, {invalid} invalid", results.len());
            Ok(if invalid == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn sync(config_path: &Path, target: Option<&str>) -> Result<ExitCode> {
    let engine = engine(config_path)?;
    let report = match target {
        Some(name) => {
            let mut report = RunReport::default();
            match engine.run_target(name) {
                Ok(t) => report.targets.push(t),
                Err(e) => report.aborted.push((name.to_string(), e)),
            }
            report
        }
        None => engine.run_all(),
    };

    for path in &report.stale_removed {
        println!("removed stale target {}", path.display());
    }
    for (name, err) in &report.aborted {
        eprintln!("{name}: aborted: {err}");
    }
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn reindex(config_path: &Path) -> Result<ExitCode> {
    let engine = engine(config_path)?;
    let mut failed = false;
    for (name, result) in engine.reindex_all() {
        match result {
            Ok(report) => println!("{name}: {} packages indexed", report.entries.len()),
            Err(e) => {
                failed = true;
                eprintln!("{name}: aborted: {e}");
            }
        }
    }
    if failed {
        bail!("one or more targets could not be reindexed");
    }
    Ok(ExitCode::SUCCESS)
}

fn engine(config_path: &Path) -> Result<SyncEngine> {
    let config = SyncConfig::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    debug!(
        config = %config_path.display(),
        sources = config.sources.len(),
        targets = config.targets.len(),
        "configuration loaded"
    );
    Ok(SyncEngine::new(config).with_reporter(Arc::new(ConsoleReporter)))
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}
