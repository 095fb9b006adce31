//! Build command implementation for dylink CLI.
//!
//! Loads a recipe file and builds its shared library.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dylink_core::{BuildConfig, Recipe, SharedLibraryBuilder, TemplateRecipe};

use crate::colors::{self, Tone, paint};

/// Command-line options for `dylink build`.
pub struct BuildOptions {
    pub dir: Option<PathBuf>,
    pub threads: Option<usize>,
    pub timeout: Option<u64>,
    pub verify: bool,
    pub verbose: bool,
}

impl BuildOptions {
    fn config(&self) -> BuildConfig {
        let mut config = BuildConfig::default()
            .with_verbose(self.verbose)
            .with_verify_load(self.verify);
        if let Some(threads) = self.threads {
            config = config.with_threads(threads);
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        config
    }
}

/// Build the library described by the recipe at `recipe_path`.
pub fn execute(recipe_path: &Path, options: &BuildOptions) -> anyhow::Result<()> {
    if !recipe_path.exists() {
        anyhow::bail!("Recipe not found: {}", recipe_path.display());
    }

    let start = Instant::now();
    let recipe = TemplateRecipe::from_json_file(recipe_path)?;

    // Sources are relative to the recipe unless a directory is given
    let dir = match &options.dir {
        Some(dir) => dir.clone(),
        None => recipe_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf(),
    };

    let config = options.config();
    let workers = config.worker_count();

    println!(
        "\n{} - Building {}\n",
        paint(Tone::Title, "dylink"),
        paint(Tone::Worker, recipe.library_file_name())
    );

    print!(
        "  {} ... ",
        paint(
            Tone::Step,
            format!(
                "◆ Compiling {} sources on {} workers",
                recipe.sources().len(),
                workers
            )
        )
    );
    colors::flush_stdout();

    let library = match SharedLibraryBuilder::new(config).build(&recipe, &dir) {
        Ok(library) => library,
        Err(e) => {
            println!();
            return Err(e.into());
        }
    };

    println!("{}", paint(Tone::Done, "✓"));

    println!();
    println!("{} {}", paint(Tone::Done, "Built:"), library.display());
    println!(
        "{} {:.2}s",
        paint(Tone::Muted, "Time:"),
        start.elapsed().as_secs_f64()
    );

    Ok(())
}
