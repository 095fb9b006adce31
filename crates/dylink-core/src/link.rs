//! Link stage: package the objects into the shared library.

use std::path::{Path, PathBuf};

use crate::compile::check_worker;
use crate::config::BuildConfig;
use crate::error::{Result, Stage};
use crate::session::{SessionSpec, ShellSession};
use crate::recipe::Recipe;

/// Worker id used by the single link session.
pub const LINK_WORKER: usize = 0;

/// Run the recipe's library command over `objects` in one session.
///
/// Fails like the compile stage does, with worker id 0.
pub fn link_library<R: Recipe + ?Sized>(
    recipe: &R,
    dir: &Path,
    objects: &[PathBuf],
    config: &BuildConfig,
) -> Result<()> {
    let spec = SessionSpec::for_recipe(recipe, dir, config);
    let command = recipe.library_command(objects, recipe.target());

    let mut session = ShellSession::start(LINK_WORKER, &spec)?;
    session.submit(&command);
    let result = session.finish();

    check_worker(dir, LINK_WORKER, Stage::Link, result)
}
