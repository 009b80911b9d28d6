//! Fan-out helpers shared by every crawl level.
//!
//! Two join primitives with different failure semantics:
//! - [`gather`] is best-effort: failures are logged and dropped, successes returned.
//! - [`try_gather`] is strict: the first failure is returned and the remaining
//!   futures are dropped.
//!
//! Use the strict form where a missing result would corrupt a later decision
//! (dedup lookups), and the best-effort form where siblings are independent.

use futures::future::{join_all, try_join_all};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::error;

/// Runs all futures concurrently and keeps only the successful results.
pub async fn gather<I, T, E>(tasks: I) -> Vec<T>
where
    I: IntoIterator,
    I::Item: Future<Output = Result<T, E>>,
    E: Display,
{
    join_all(tasks)
        .await
        .into_iter()
        .filter_map(|result| match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!(error = %e, "Task failed");
                None
            }
        })
        .collect()
}

/// Runs all futures concurrently; the first failure aborts the batch.
pub async fn try_gather<I, T, E>(tasks: I) -> Result<Vec<T>, E>
where
    I: IntoIterator,
    I::Item: Future<Output = Result<T, E>>,
{
    try_join_all(tasks).await
}

/// Bounds the number of archives downloaded and unpacked at the same time.
#[derive(Debug, Clone)]
pub struct DownloadLimiter {
    semaphore: Arc<Semaphore>,
}

impl DownloadLimiter {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
        }
    }

    /// The permit must be held for as long as the archive's temp files exist.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.semaphore.clone().acquire_owned().await
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
