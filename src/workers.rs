use std::future::Future;

use tokio::task::JoinSet;

use crate::error::HarnessError;

/// A set of spawned workers that is always joined in full.
///
/// Unlike `try_join`, a failing worker does not cancel its siblings: [`join`]
/// waits for every worker and then reports the first error observed.
///
/// [`join`]: WorkerGroup::join
pub(crate) struct WorkerGroup<T> {
    set: JoinSet<Result<T, HarnessError>>,
}

impl<T: Send + 'static> WorkerGroup<T> {
    pub(crate) fn new() -> Self {
        Self {
            set: JoinSet::new(),
        }
    }

    pub(crate) fn spawn<F>(&mut self, worker: F)
    where
        F: Future<Output = Result<T, HarnessError>> + Send + 'static,
    {
        self.set.spawn(worker);
    }

    pub(crate) fn len(&self) -> usize {
        self.set.len()
    }

    /// Wait for all workers. Returns every result on success, otherwise the
    /// error of the first worker that completed with one.
    pub(crate) async fn join(mut self) -> Result<Vec<T>, HarnessError> {
        let mut results = Vec::with_capacity(self.set.len());
        let mut first_error = None;
        while let Some(joined) = self.set.join_next().await {
            let outcome = joined
                .map_err(|e| HarnessError::WorkerJoin(e.to_string()))
                .and_then(|r| r);
            match outcome {
                Ok(value) => results.push(value),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}
