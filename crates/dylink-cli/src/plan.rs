//! Plan command implementation for dylink CLI.
//!
//! Prints the worker assignment a build would use.

use std::path::Path;

use dylink_core::{BuildConfig, Recipe, TemplateRecipe, WorkerTask};

use crate::colors::{Tone, paint};

/// Show which sources each worker would compile.
pub fn execute(recipe_path: &Path, threads: Option<usize>) -> anyhow::Result<()> {
    if !recipe_path.exists() {
        anyhow::bail!("Recipe not found: {}", recipe_path.display());
    }

    let recipe = TemplateRecipe::from_json_file(recipe_path)?;
    let config = BuildConfig {
        threads,
        ..Default::default()
    };
    let workers = config.worker_count();

    println!(
        "{} on {} workers (shell: {})",
        paint(Tone::Title, recipe.library_file_name()),
        workers,
        recipe.shell()
    );

    for task in WorkerTask::from_sources(&recipe, workers) {
        println!(
            "\n{} ({} sources)",
            paint(Tone::Worker, format!("worker #{}", task.worker)),
            task.commands.len()
        );
        for command in &task.commands {
            println!("  {command}");
        }
    }

    let objects = recipe.objects();
    println!(
        "\n{} {}",
        paint(Tone::Worker, "link:"),
        recipe.library_command(&objects, recipe.target())
    );

    Ok(())
}
