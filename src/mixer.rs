//! Bounded random DML within one endpoint's half of the key space.

use std::ops::AddAssign;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::endpoint::Endpoint;
use crate::error::HarnessError;
use crate::fixture::Statement;
use crate::load::{Workload, claim};
use crate::workers::WorkerGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixOp {
    Upsert,
    Update,
    Delete,
}

/// One call's worth of random operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixWorkload {
    /// Key range and worker count. `rows` bounds the keys touched.
    pub workload: Workload,
    /// Operations to run on this endpoint. Not shared with the peer endpoint.
    pub budget: i64,
    /// Seeds the per-worker RNGs; worker `i` uses `seed + i`.
    pub seed: Option<u64>,
}

impl MixWorkload {
    pub fn validate(&self) -> Result<(), HarnessError> {
        self.workload.validate()?;
        if self.budget > 0 && self.workload.rows == 0 {
            return Err(HarnessError::Config(
                "random operations need a non-empty key range".to_string(),
            ));
        }
        Ok(())
    }
}

/// Operation counts from one [`mix`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixReport {
    pub upserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl MixReport {
    pub fn total(&self) -> u64 {
        self.upserts + self.updates + self.deletes
    }

    fn record(&mut self, op: MixOp) {
        match op {
            MixOp::Upsert => self.upserts += 1,
            MixOp::Update => self.updates += 1,
            MixOp::Delete => self.deletes += 1,
        }
    }
}

impl AddAssign for MixReport {
    fn add_assign(&mut self, rhs: Self) {
        self.upserts += rhs.upserts;
        self.updates += rhs.updates;
        self.deletes += rhs.deletes;
    }
}

/// Pick the next operation: uniform key in the signed range, uniform op.
pub fn next_op<R: Rng>(rng: &mut R, workload: &Workload) -> (MixOp, Statement) {
    let uk = workload.sign.apply(rng.random_range(1..=workload.rows));
    let v = rng.random_range(0..i64::MAX);
    match rng.random_range(0..3) {
        0 => (MixOp::Upsert, Statement::Upsert { uk, v }),
        1 => (MixOp::Update, Statement::UpdateValue { uk, v }),
        _ => (MixOp::Delete, Statement::DeleteKey { uk }),
    }
}

/// Run up to `mix.budget` random operations against `endpoint`.
///
/// Workers may hit the same key concurrently; each statement is atomic on
/// the server and nothing else is coordinated.
pub async fn mix(endpoint: Arc<dyn Endpoint>, mix: MixWorkload) -> Result<MixReport, HarnessError> {
    mix.validate()?;

    let remaining = Arc::new(AtomicI64::new(mix.budget));
    let mut workers = WorkerGroup::new();
    for worker in 0..mix.workload.concurrency {
        let rng = match mix.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker as u64)),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        workers.spawn(mix_worker(
            Arc::clone(&endpoint),
            Arc::clone(&remaining),
            mix.workload,
            rng,
        ));
    }

    let mut report = MixReport::default();
    for r in workers.join().await? {
        report += r;
    }
    info!(
        endpoint = %endpoint.name(),
        upserts = report.upserts,
        updates = report.updates,
        deletes = report.deletes,
        "finish random operations"
    );
    Ok(report)
}

async fn mix_worker(
    endpoint: Arc<dyn Endpoint>,
    remaining: Arc<AtomicI64>,
    workload: Workload,
    mut rng: StdRng,
) -> Result<MixReport, HarnessError> {
    let mut report = MixReport::default();
    while claim(&remaining).is_some() {
        let (op, statement) = next_op(&mut rng, &workload);
        endpoint.execute(&statement).await.map_err(|e| {
            HarnessError::endpoint(endpoint.name(), format!("{op:?} ({})", statement.sql()), e)
        })?;
        report.record(op);
    }
    Ok(report)
}

/// Run [`mix`] on both endpoints at once and wait for both.
///
/// Neither side is cancelled when the other fails; `a`'s error wins when both
/// fail.
pub async fn mix_pair(
    a: Arc<dyn Endpoint>,
    a_mix: MixWorkload,
    b: Arc<dyn Endpoint>,
    b_mix: MixWorkload,
) -> Result<(MixReport, MixReport), HarnessError> {
    let (ra, rb) = tokio::join!(mix(a, a_mix), mix(b, b_mix));
    Ok((ra?, rb?))
}
