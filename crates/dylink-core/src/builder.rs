//! End-to-end shared library builds.

use std::path::{Path, PathBuf};

use crate::artifacts;
use crate::compile::compile_objects;
use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::link::link_library;
use crate::recipe::{self, Recipe};

/// Builds a shared library from a recipe.
///
/// ```no_run
/// use dylink_core::{BuildConfig, SharedLibraryBuilder, TemplateRecipe};
///
/// let recipe = TemplateRecipe::from_json_file("build/recipe.json")?;
/// let builder = SharedLibraryBuilder::new(BuildConfig::default().with_threads(4));
/// let library = builder.build(&recipe, "build")?;
/// println!("{}", library.display());
/// # Ok::<(), dylink_core::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct SharedLibraryBuilder {
    config: BuildConfig,
}

impl SharedLibraryBuilder {
    /// Create a builder with the given configuration.
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Compile, link and clean up, returning the library's absolute path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The recipe is unusable or `dir` does not exist
    /// - A worker shell cannot be spawned
    /// - Any compile or link command fails, or a shell dies mid-queue
    /// - `verify_load` is set and the library cannot be loaded
    pub fn build<R: Recipe + ?Sized>(&self, recipe: &R, dir: impl AsRef<Path>) -> Result<PathBuf> {
        recipe::validate(recipe)?;

        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::MissingDirectory(dir.to_path_buf()));
        }
        let dir = std::path::absolute(dir)?;
        let worker_count = self.config.worker_count();

        if self.config.verbose {
            tracing::info!(
                "Compiling {} source files in directory {} into object files (*{}) using {} workers...",
                recipe.sources().len(),
                dir.display(),
                recipe.object_ext(),
                worker_count
            );
        }
        let objects = compile_objects(recipe, &dir, worker_count, &self.config)?;

        let library = artifacts::library_path(&dir, recipe)?;
        if self.config.verbose {
            tracing::info!("Generating dynamic shared library {}...", library.display());
        }
        link_library(recipe, &dir, &objects, &self.config)?;

        artifacts::remove_status_files(&dir, worker_count)?;

        if self.config.verify_load {
            verify_library(&library)?;
        }

        if self.config.verbose {
            tracing::info!("Shared library built: {}", library.display());
        }
        Ok(library)
    }
}

/// Build `recipe` in `dirpath` with `config`.
pub fn create_shared<R: Recipe + ?Sized>(
    dirpath: impl AsRef<Path>,
    recipe: &R,
    config: &BuildConfig,
) -> Result<PathBuf> {
    SharedLibraryBuilder::new(config.clone()).build(recipe, dirpath)
}

/// Open the library once and close it again.
fn verify_library(path: &Path) -> Result<()> {
    // SAFETY: loading runs the library's initializers. The library was just
    // produced by the caller's own toolchain from the caller's sources.
    let library = unsafe { libloading::Library::new(path)? };
    library.close()?;
    tracing::debug!("Verified {} loads", path.display());
    Ok(())
}
