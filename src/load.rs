//! Keyed table fill over a shared countdown.
//!
//! `P` workers share one `AtomicI64` initialised to `N`. A worker claims a
//! row by decrementing it; the value it decremented to is both the row's
//! identity and the payload, and a negative value means the table is full.
//! `fetch_sub` hands out every value in `0..N` exactly once, so the table ends
//! up with unique keys `1..=N` (or `-N..=-1`) without any lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::HarnessError;
use crate::fixture::Statement;
use crate::workers::WorkerGroup;

/// Which half of the key space an endpoint writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySign {
    /// Keys in `1..=N`.
    Positive,
    /// Keys in `-N..=-1`.
    Negative,
}

impl KeySign {
    /// Map a 1-based key into this half of the key space.
    pub fn apply(self, key: i64) -> i64 {
        match self {
            KeySign::Positive => key,
            KeySign::Negative => -key,
        }
    }
}

/// Shape of one fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub rows: i64,
    pub concurrency: usize,
    pub sign: KeySign,
}

impl Workload {
    pub fn new(rows: i64, concurrency: usize, sign: KeySign) -> Self {
        Self {
            rows,
            concurrency,
            sign,
        }
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.rows < 0 {
            return Err(HarnessError::Config(format!(
                "row count must not be negative, got {}",
                self.rows
            )));
        }
        if self.concurrency == 0 {
            return Err(HarnessError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Claim the next countdown value, or `None` once the budget is spent.
pub(crate) fn claim(remaining: &AtomicI64) -> Option<i64> {
    let v = remaining.fetch_sub(1, Ordering::SeqCst) - 1;
    (v >= 0).then_some(v)
}

/// Insert `workload.rows` rows into the fixture table using
/// `workload.concurrency` workers.
///
/// Every worker runs to completion; the first worker error is returned.
pub async fn fill(endpoint: Arc<dyn Endpoint>, workload: Workload) -> Result<(), HarnessError> {
    workload.validate()?;

    let remaining = Arc::new(AtomicI64::new(workload.rows));
    let mut workers = WorkerGroup::new();
    for worker in 0..workload.concurrency {
        let endpoint = Arc::clone(&endpoint);
        let remaining = Arc::clone(&remaining);
        workers.spawn(load_worker(endpoint, remaining, workload.sign, worker));
    }

    let inserted: u64 = workers.join().await?.into_iter().sum();
    info!(
        endpoint = %endpoint.name(),
        number = workload.rows,
        inserted,
        "finish load data"
    );
    Ok(())
}

async fn load_worker(
    endpoint: Arc<dyn Endpoint>,
    remaining: Arc<AtomicI64>,
    sign: KeySign,
    worker: usize,
) -> Result<u64, HarnessError> {
    let mut inserted = 0u64;
    while let Some(v) = claim(&remaining) {
        let uk = sign.apply(v + 1);
        endpoint
            .execute(&Statement::InsertKeyed { uk, v })
            .await
            .map_err(|e| HarnessError::endpoint(endpoint.name(), format!("insert uk {uk}"), e))?;
        inserted += 1;
    }
    debug!(endpoint = %endpoint.name(), worker, inserted, "load worker done");
    Ok(inserted)
}
