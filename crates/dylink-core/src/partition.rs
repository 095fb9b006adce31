//! Round-robin distribution of work across worker shells.

use crate::recipe::{Recipe, SourceFile};

/// The queue of commands one worker shell runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTask {
    /// Worker id, `0..worker_count`
    pub worker: usize,

    /// Commands in submission order
    pub commands: Vec<String>,
}

impl WorkerTask {
    /// One compile task per worker, each source mapped through the recipe's
    /// object command.
    pub fn from_sources(recipe: &(impl Recipe + ?Sized), worker_count: usize) -> Vec<Self> {
        partition(recipe.sources(), worker_count)
            .into_iter()
            .enumerate()
            .map(|(worker, sources)| Self {
                worker,
                commands: sources
                    .into_iter()
                    .map(|source: &SourceFile| recipe.object_command(source))
                    .collect(),
            })
            .collect()
    }
}

/// Assign item `i` to bucket `i % worker_count`.
///
/// Always returns exactly `worker_count` buckets (at least one); buckets keep
/// the items' relative order.
pub fn partition<T>(items: impl IntoIterator<Item = T>, worker_count: usize) -> Vec<Vec<T>> {
    let worker_count = worker_count.max(1);
    let mut buckets: Vec<Vec<T>> = (0..worker_count).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        buckets[i % worker_count].push(item);
    }
    buckets
}
