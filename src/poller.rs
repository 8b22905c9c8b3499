use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::error::HarnessError;
use crate::oracle::Oracle;
use crate::settings::Timing;

/// Outcome of a successful [`ConvergencePoller::await_equal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Converged {
    /// Oracle calls made, including the one that reported equality.
    pub polls: u32,
    pub elapsed: Duration,
}

/// Polls an [`Oracle`] until it reports equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergencePoller {
    pub deadline: Duration,
    pub backoff: Duration,
}

impl ConvergencePoller {
    pub fn new(deadline: Duration, backoff: Duration) -> Self {
        Self { deadline, backoff }
    }

    pub fn from_timing(timing: &Timing) -> Self {
        Self::new(timing.convergence_deadline(), timing.poll_backoff())
    }

    /// Call the oracle until it says equal.
    ///
    /// An oracle error ends the wait at once. A "not equal" answer after
    /// `deadline` has elapsed yields [`HarnessError::ConvergenceTimeout`];
    /// otherwise the poller sleeps `backoff` and asks again.
    pub async fn await_equal(&self, oracle: &dyn Oracle) -> Result<Converged, HarnessError> {
        let start = Instant::now();
        let mut polls = 0u32;
        loop {
            polls += 1;
            if oracle.equal().await? {
                let elapsed = start.elapsed();
                info!(polls, elapsed_ms = elapsed.as_millis() as u64, "data equal");
                return Ok(Converged { polls, elapsed });
            }

            let elapsed = start.elapsed();
            if elapsed > self.deadline {
                return Err(HarnessError::ConvergenceTimeout { elapsed });
            }

            debug!(polls, elapsed_ms = elapsed.as_millis() as u64, "data not equal yet");
            sleep(self.backoff).await;
        }
    }
}
