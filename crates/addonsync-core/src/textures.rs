//! Texture bundle compilation for skins and `compile="true"` packages.
//!
//! Compiling is a compaction step: once the bundles exist, every other file in
//! the affected directories is deleted.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use addonsync_schema::Manifest;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Bundle file extension.
pub const BUNDLE_EXTENSION: &str = "xbt";
/// Bundle produced from a primary asset directory.
pub const PRIMARY_BUNDLE: &str = "Textures.xbt";

/// Errors compacting textures.
#[derive(Error, Debug)]
pub enum TextureError {
    /// The compiler program could not be located.
    #[error("texture compiler '{0}' not found on PATH")]
    NotFound(String),

    /// The asset directory to compile is missing.
    #[error("texture input {0} is not a directory")]
    MissingInput(PathBuf),

    /// The compiler ran and failed.
    #[error("texture compiler exited with {status} on {input}")]
    Failed {
        /// Asset directory being compiled.
        input: PathBuf,
        /// Exit status of the compiler.
        status: ExitStatus,
    },

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The package tree could not be walked.
    #[error("Failed to walk {0}")]
    Walk(#[from] walkdir::Error),
}

/// Compiles every raster asset under `input` into one bundle at `output`.
pub trait TextureCompiler: fmt::Debug {
    /// Write the bundle for `input` to `output`.
    ///
    /// # Errors
    ///
    /// Returns [`TextureError`] if the bundle cannot be produced.
    fn compile(&self, input: &Path, output: &Path) -> Result<(), TextureError>;
}

/// The external `TexturePacker` executable.
#[derive(Debug, Clone)]
pub struct TexturePacker {
    program: String,
}

impl TexturePacker {
    /// Packer invoking `program`, a name on `PATH` or a path.
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    fn executable(&self) -> Result<PathBuf, TextureError> {
        if self.program.contains(std::path::MAIN_SEPARATOR) || self.program.contains('/') {
            return Ok(PathBuf::from(&self.program));
        }
        which::which(&self.program).map_err(|_| TextureError::NotFound(self.program.clone()))
    }
}

impl TextureCompiler for TexturePacker {
    fn compile(&self, input: &Path, output: &Path) -> Result<(), TextureError> {
        if !input.is_dir() {
            return Err(TextureError::MissingInput(input.to_path_buf()));
        }
        let program = self.executable()?;
        debug!(input = %input.display(), output = %output.display(), "running texture compiler");

        let status = Command::new(program)
            .arg("-dupecheck")
            .arg("-input")
            .arg(input)
            .arg("-output")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;

        if !status.success() {
            return Err(TextureError::Failed {
                input: input.to_path_buf(),
                status,
            });
        }
        Ok(())
    }
}

/// Compile and compact the texture directories a manifest asks for.
///
/// Skins get `media/Textures.xbt` plus `media/<theme>.xbt` per `themes/`
/// subdirectory, then `media/` and `themes/` keep only bundles. Packages
/// flagged `compile="true"` get the same treatment for `resources/`.
pub fn prepare(
    manifest: &Manifest,
    tree: &Path,
    compiler: &dyn TextureCompiler,
) -> Result<(), TextureError> {
    if manifest.is_skin {
        let media = tree.join("media");
        let themes = tree.join("themes");
        compiler.compile(&media, &media.join(PRIMARY_BUNDLE))?;

        if themes.is_dir() {
            let mut names: Vec<String> = fs::read_dir(&themes)?
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            for name in names {
                let bundle = media.join(format!("{name}.{BUNDLE_EXTENSION}"));
                compiler.compile(&themes.join(&name), &bundle)?;
            }
        }

        strip_non_bundles(&media)?;
        strip_non_bundles(&themes)?;
    }

    if manifest.compile_textures {
        let resources = tree.join("resources");
        compiler.compile(&resources, &resources.join(PRIMARY_BUNDLE))?;
        strip_non_bundles(&resources)?;
    }
    Ok(())
}

/// Delete every non-bundle file below `dir`, then every directory left empty.
/// A missing `dir` is ignored.
pub fn strip_non_bundles(dir: &Path) -> Result<(), TextureError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in WalkDir::new(dir).min_depth(1).contents_first(true) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            if fs::read_dir(path)?.next().is_none() {
                fs::remove_dir(path)?;
            }
        } else if path.extension().is_none_or(|ext| ext != BUNDLE_EXTENSION) {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}
