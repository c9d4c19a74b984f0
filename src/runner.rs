use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::error::{CatalogError, Result};

/// Bounded fan-out over independent blocking units of work.
///
/// Each task runs on the blocking pool; at most `workers` run at once and
/// results come back in input order. A width of 0 or 1 is sequential.
#[derive(Debug, Clone, Copy)]
pub struct Runner {
    workers: usize,
}

impl Runner {
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }

    pub fn workers(&self) -> usize {
        self.workers.max(1)
    }

    /// Run every task and return each outcome, in input order.
    pub async fn run_all<T, F>(&self, tasks: Vec<F>) -> Vec<Result<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        stream::iter(tasks)
            .map(|task| async move {
                match tokio::task::spawn_blocking(task).await {
                    Ok(res) => res,
                    Err(e) => Err(CatalogError::Worker(e.to_string())),
                }
            })
            .buffered(self.workers())
            .collect()
            .await
    }

    /// Run every task and keep the successful results, in input order.
    ///
    /// All tasks drain before returning. With `raise_on_error` the first error
    /// is returned; otherwise failed entries are dropped. Fatal errors are
    /// always returned.
    pub async fn run<T, F>(&self, tasks: Vec<F>, raise_on_error: bool) -> Result<Vec<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let results = self.run_all(tasks).await;
        let mut out = Vec::with_capacity(results.len());
        let mut first_err: Option<CatalogError> = None;
        for res in results {
            match res {
                Ok(v) => out.push(v),
                Err(e) if raise_on_error || e.is_fatal() => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(e) => warn!(error = %e, "task failed; skipping"),
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }
}
