//! Writers racing a schema change.
//!
//! A [`RaceWindow`] keeps inserting into the fixture table from every
//! endpoint while the caller alters the raced column on the primary. Two
//! failure classes are expected while the schema is in flux and are counted
//! instead of reported:
//!
//! - an insert omitting a freshly added NOT NULL column ([`SqlErrorKind::MissingDefault`])
//! - an insert naming the column before it exists or after it is dropped
//!   ([`SqlErrorKind::UnknownColumn`])
//!
//! The stop flag answers "should workers stop", the worker group answers
//! "have they stopped"; [`RaceWindow::drain`] joins the group after setting
//! the flag.

use std::ops::AddAssign;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::endpoint::{Endpoint, SqlErrorKind};
use crate::error::HarnessError;
use crate::fixture::Statement;
use crate::settings::Timing;
use crate::workers::WorkerGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacePhase {
    Running,
    Stopping,
    Drained,
}

/// Statement counts from one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RaceReport {
    /// Loop iterations started (two statements each).
    pub iterations: u64,
    pub missing_default: u64,
    pub unknown_column: u64,
}

impl AddAssign for RaceReport {
    fn add_assign(&mut self, rhs: Self) {
        self.iterations += rhs.iterations;
        self.missing_default += rhs.missing_default;
        self.unknown_column += rhs.unknown_column;
    }
}

pub struct RaceWindow {
    phase: RacePhase,
    stop: Arc<AtomicBool>,
    workers: Option<WorkerGroup<RaceReport>>,
}

impl RaceWindow {
    /// Spawn `concurrency` writers per endpoint, inserting into `column`.
    pub fn start(endpoints: &[Arc<dyn Endpoint>], concurrency: usize, column: &str) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let column: Arc<str> = Arc::from(column);
        let mut workers = WorkerGroup::new();
        for _ in 0..concurrency {
            for endpoint in endpoints {
                workers.spawn(race_writer(
                    Arc::clone(endpoint),
                    Arc::clone(&column),
                    Arc::clone(&stop),
                ));
            }
        }
        debug!(workers = workers.len(), column = %column, "race window started");
        Self {
            phase: RacePhase::Running,
            stop,
            workers: Some(workers),
        }
    }

    pub fn phase(&self) -> RacePhase {
        self.phase
    }

    /// Ask every writer to exit after its current iteration.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.phase == RacePhase::Running {
            self.phase = RacePhase::Stopping;
        }
    }

    /// Stop (if not already) and wait for every writer to exit.
    ///
    /// Returns the first error that was not one of the tolerated race
    /// classes. Once this returns no writer issues further statements.
    /// Draining twice yields an empty report.
    pub async fn drain(&mut self) -> Result<RaceReport, HarnessError> {
        self.stop();
        let Some(workers) = self.workers.take() else {
            return Ok(RaceReport::default());
        };
        let joined = workers.join().await;
        self.phase = RacePhase::Drained;

        let mut report = RaceReport::default();
        for r in joined? {
            report += r;
        }
        debug!(
            iterations = report.iterations,
            missing_default = report.missing_default,
            unknown_column = report.unknown_column,
            "race window drained"
        );
        Ok(report)
    }
}

impl Drop for RaceWindow {
    fn drop(&mut self) {
        // Dropping the worker group aborts any writer still running.
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn random_value() -> i64 {
    rand::rng().random_range(0..i32::MAX as i64)
}

async fn race_writer(
    endpoint: Arc<dyn Endpoint>,
    column: Arc<str>,
    stop: Arc<AtomicBool>,
) -> Result<RaceReport, HarnessError> {
    let mut report = RaceReport::default();
    while !stop.load(Ordering::SeqCst) {
        report.iterations += 1;

        let baseline = Statement::InsertPayload { v: random_value() };
        match endpoint.execute(&baseline).await {
            Ok(()) => {}
            Err(e) if e.kind == SqlErrorKind::MissingDefault => report.missing_default += 1,
            Err(e) => {
                return Err(HarnessError::endpoint(endpoint.name(), baseline.sql(), e));
            }
        }

        let with_column = Statement::InsertWithColumn {
            column: column.to_string(),
            v: random_value(),
            c: random_value(),
        };
        match endpoint.execute(&with_column).await {
            Ok(()) => {}
            Err(e) if e.kind == SqlErrorKind::UnknownColumn => report.unknown_column += 1,
            Err(e) => {
                return Err(HarnessError::endpoint(endpoint.name(), with_column.sql(), e));
            }
        }
    }
    Ok(report)
}

/// Start writers on `endpoints`, apply `ddl` to `primary` between two settle
/// delays, then drain.
///
/// Only the primary receives the DDL; the other endpoints pick it up through
/// replication. If the DDL fails the writers are still drained before the
/// DDL error is returned; a writer error from that drain is only logged.
pub async fn run_race(
    primary: &Arc<dyn Endpoint>,
    endpoints: &[Arc<dyn Endpoint>],
    concurrency: usize,
    column: &str,
    ddl: &Statement,
    timing: &Timing,
) -> Result<RaceReport, HarnessError> {
    let mut window = RaceWindow::start(endpoints, concurrency, column);
    sleep(timing.race_settle()).await;

    let sql = ddl.sql();
    if let Err(e) = primary.execute(ddl).await {
        if let Err(writer_err) = window.drain().await {
            warn!(error = %writer_err, sql = %sql, "race writer failed while ddl failed");
        }
        return Err(HarnessError::endpoint(primary.name(), sql, e));
    }
    info!(sql = %sql, "run ddl success");

    sleep(timing.race_settle()).await;
    window.drain().await
}
