//! Per-worker files kept in the build directory.
//!
//! ```text
//! <dir>/
//! ├── retcode_cpu<N>.txt   # exit codes written by worker N, removed on success
//! ├── log_cpu<N>.txt       # output of failed worker N, kept for inspection
//! ├── *.o                  # objects from the compile stage
//! └── <target><ext>        # the shared library
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::recipe::Recipe;

/// Status file of a worker.
pub fn status_file(dir: &Path, worker: usize) -> PathBuf {
    dir.join(format!("retcode_cpu{worker}.txt"))
}

/// Log file of a worker.
pub fn log_file(dir: &Path, worker: usize) -> PathBuf {
    dir.join(format!("log_cpu{worker}.txt"))
}

/// Save a failed worker's combined output, returning the log path.
pub fn write_worker_log(dir: &Path, worker: usize, output: &str) -> Result<PathBuf> {
    let path = log_file(dir, worker);
    fs::write(&path, format!("{output}\n"))?;
    Ok(path)
}

/// Remove a file, treating "already gone" as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Delete the status files of workers `0..worker_count`.
pub fn remove_status_files(dir: &Path, worker_count: usize) -> Result<()> {
    for worker in 0..worker_count {
        remove_if_exists(&status_file(dir, worker))?;
    }
    Ok(())
}

/// Absolute path of the library a recipe produces in `dir`.
pub fn library_path(dir: &Path, recipe: &(impl Recipe + ?Sized)) -> Result<PathBuf> {
    Ok(std::path::absolute(dir)?.join(recipe.library_file_name()))
}
