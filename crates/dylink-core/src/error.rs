//! Error types for dylink-core.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for dylink-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Build phase a worker session belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Source files compiled into objects.
    Compile,
    /// Objects packaged into the shared library.
    Link,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Compile => f.write_str("compile"),
            Stage::Link => f.write_str("link"),
        }
    }
}

/// Errors that can occur in dylink-core.
#[derive(Debug, Error)]
pub enum Error {
    /// A worker shell could not be started.
    #[error("failed to spawn shell '{shell}' for worker #{worker}: {source}")]
    Spawn {
        worker: usize,
        shell: String,
        #[source]
        source: std::io::Error,
    },

    /// A command in a worker's queue exited with a non-zero status.
    #[error(
        "error occurred in worker #{worker} during {stage}: command {command} exited with status {code}\n{output}"
    )]
    CommandFailed {
        worker: usize,
        stage: Stage,
        /// Index of the failing command in the worker's queue.
        command: usize,
        code: i32,
        /// Log file holding the worker's output.
        log: PathBuf,
        output: String,
    },

    /// The status file did not account for every submitted command.
    #[error(
        "worker #{worker} terminated unexpectedly: {recorded} exit codes recorded for {expected} commands\n{output}"
    )]
    ProtocolViolation {
        worker: usize,
        expected: usize,
        recorded: usize,
        output: String,
    },

    /// A worker was still running when the configured timeout expired.
    #[error("worker #{worker} did not finish within {after:?} and was killed\n{output}")]
    Timeout {
        worker: usize,
        after: Duration,
        output: String,
    },

    /// The recipe cannot be used for a build.
    #[error("invalid recipe: {0}")]
    InvalidRecipe(String),

    /// The build directory does not exist.
    #[error("build directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    /// A recipe file could not be parsed.
    #[error("recipe format error: {0}")]
    RecipeFormat(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The produced library could not be loaded.
    #[error("failed to load library: {0}")]
    LibraryLoad(#[from] libloading::Error),
}

impl Error {
    /// Worker id the error is attributed to, if any.
    pub fn worker(&self) -> Option<usize> {
        match self {
            Error::Spawn { worker, .. }
            | Error::CommandFailed { worker, .. }
            | Error::ProtocolViolation { worker, .. }
            | Error::Timeout { worker, .. } => Some(*worker),
            _ => None,
        }
    }

    /// Combined output captured from the worker before it failed.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Error::CommandFailed { output, .. }
            | Error::ProtocolViolation { output, .. }
            | Error::Timeout { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Whether this is a failure inside a worker session, as opposed to a
    /// problem with the inputs or the host.
    pub fn is_build_failure(&self) -> bool {
        matches!(
            self,
            Error::CommandFailed { .. } | Error::ProtocolViolation { .. } | Error::Timeout { .. }
        )
    }

    /// Render the error followed by a recovery hint where one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::CommandFailed { log, .. } => {
                Some(format!("full worker output saved to {}", log.display()))
            }
            Error::ProtocolViolation { worker, .. } => Some(format!(
                "a command in worker #{worker} may have exited the shell; see log_cpu{worker}.txt"
            )),
            Error::Timeout { .. } => {
                Some("raise the timeout or check the toolchain for hangs".to_string())
            }
            Error::Spawn { .. } => Some("check the recipe's shell setting".to_string()),
            Error::MissingDirectory(_) => {
                Some("create the directory and write the sources first".to_string())
            }
            _ => None,
        };

        match hint {
            Some(hint) => format!("{self}\nhint: {hint}"),
            None => self.to_string(),
        }
    }
}
