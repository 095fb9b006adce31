//! Build configuration.

use std::time::Duration;

use crate::platform::{self, ShellFlavor};

/// Configuration for a shared library build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Upper bound on worker shells; all available cores when `None`
    pub threads: Option<usize>,

    /// Narrate progress at info level
    pub verbose: bool,

    /// Kill a worker that runs longer than this
    pub timeout: Option<Duration>,

    /// Load the finished library once to check it is usable
    pub verify_load: bool,

    /// Status-capture syntax used by every worker shell
    pub flavor: ShellFlavor,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            threads: None,
            verbose: false,
            timeout: None,
            verify_load: false,
            flavor: ShellFlavor::host(),
        }
    }
}

impl BuildConfig {
    /// Limit the number of worker shells.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Enable or disable progress narration.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Bound how long any single worker may run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Load the built library before returning it.
    pub fn with_verify_load(mut self, verify: bool) -> Self {
        self.verify_load = verify;
        self
    }

    /// Number of worker shells for the compile stage on this host.
    pub fn worker_count(&self) -> usize {
        resolve_worker_count(self.threads, platform::available_cores())
    }
}

/// Derive the worker count from a requested bound and the available cores.
///
/// `min(requested, available)` when a non-zero bound is requested,
/// otherwise `available`. Never less than 1.
pub fn resolve_worker_count(requested: Option<usize>, available: usize) -> usize {
    let available = available.max(1);
    match requested {
        Some(n) if n > 0 => n.min(available),
        _ => available,
    }
}
