//! Concurrent per-category queries with all-or-nothing results.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use catalog_core::{CatalogError, CatalogResult, CategoryId};

/// Runs one query per category id and concatenates the results.
///
/// - Duplicate ids are queried twice and their rows appear twice
/// - Result order is completion order, not input order
/// - The first failure observed fails the call and aborts the remaining queries
/// - Cancelling the token aborts every outstanding query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryFanOut {
    max_concurrency: Option<usize>,
}

impl CategoryFanOut {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// At most `limit` queries in flight (a limit of 0 is treated as 1).
    pub fn bounded(limit: usize) -> Self {
        Self {
            max_concurrency: Some(limit.max(1)),
        }
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    pub async fn run<T, F, Fut>(
        &self,
        category_ids: &[CategoryId],
        cancel: &CancellationToken,
        query: F,
    ) -> CatalogResult<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(CategoryId) -> Fut,
        Fut: Future<Output = CatalogResult<Vec<T>>> + Send + 'static,
    {
        let limiter = self.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();
        for &id in category_ids {
            let branch = query(id);
            let limiter = limiter.clone();
            tasks.spawn(async move {
                let _permit = match limiter {
                    Some(sem) => Some(sem.acquire_owned().await.map_err(|_| CatalogError::Cancelled)?),
                    None => None,
                };
                branch.await
            });
        }

        let mut merged = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    debug!(outstanding = tasks.len(), "category fan-out cancelled");
                    return Err(CatalogError::Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(rows))) => merged.extend(rows),
                    Some(Ok(Err(e))) => {
                        tasks.abort_all();
                        return Err(e);
                    }
                    Some(Err(join_err)) => {
                        tasks.abort_all();
                        return Err(CatalogError::upstream("fan-out", join_err.to_string()));
                    }
                },
            }
        }
        Ok(merged)
    }
}
