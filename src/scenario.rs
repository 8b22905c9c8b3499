//! The three top-level scenarios.
//!
//! - `offset`: one endpoint; every generated id lies on the configured
//!   auto-increment stride.
//! - `dml`: two endpoints; keyed fills and random DML on both sides converge.
//! - `ddl`: two endpoints; writers racing add/widen/drop column converge.
//!
//! In the two-endpoint scenarios all DDL runs on the primary and reaches the
//! secondary through replication.

use std::sync::Arc;

use rand::Rng;
use tokio::time::sleep;
use tracing::info;

use crate::coordinator::{self, ParamScope};
use crate::endpoint::{Connector, Endpoint};
use crate::error::HarnessError;
use crate::fixture::{AutoIncrementParams, ColumnSpec, ColumnType, ScalarQuery, Statement};
use crate::load::{self, KeySign, Workload};
use crate::mixer::{self, MixWorkload};
use crate::oracle::Oracle;
use crate::poller::ConvergencePoller;
use crate::race;
use crate::settings::{EndpointConfig, Timing};

#[derive(Debug, Clone)]
pub struct OffsetConfig {
    pub endpoint: EndpointConfig,
    pub rows: i64,
    pub concurrency: usize,
    pub params: AutoIncrementParams,
    pub scope: ParamScope,
    pub timing: Timing,
}

#[derive(Debug, Clone)]
pub struct DmlConfig {
    pub primary: EndpointConfig,
    pub secondary: EndpointConfig,
    pub rows: i64,
    pub concurrency: usize,
    pub scope: ParamScope,
    /// Random operations per endpoint.
    pub op_budget: i64,
    /// Repeat the scenario until it fails.
    pub loop_forever: bool,
    pub seed: Option<u64>,
    pub timing: Timing,
}

#[derive(Debug, Clone)]
pub struct DdlConfig {
    pub primary: EndpointConfig,
    pub secondary: EndpointConfig,
    pub concurrency: usize,
    pub scope: ParamScope,
    /// One add/widen/drop round per entry.
    pub column_types: Vec<ColumnType>,
    pub timing: Timing,
}

/// Column types raced by default: one with a default, one NOT NULL without.
pub fn default_column_types() -> Vec<ColumnType> {
    vec![ColumnType::int_with_default(1), ColumnType::int_not_null()]
}

async fn setup_fixture(endpoint: &dyn Endpoint) -> Result<(), HarnessError> {
    for statement in [Statement::DropFixture, Statement::CreateFixture] {
        endpoint
            .execute(&statement)
            .await
            .map_err(|e| HarnessError::endpoint(endpoint.name(), statement.sql(), e))?;
    }
    Ok(())
}

async fn cleanup_fixture(endpoint: &dyn Endpoint) -> Result<(), HarnessError> {
    let statement = Statement::DropFixture;
    endpoint
        .execute(&statement)
        .await
        .map_err(|e| HarnessError::endpoint(endpoint.name(), statement.sql(), e))
}

/// Fill the fixture table on one endpoint and check every id lies on the
/// configured stride.
pub async fn run_offset<C: Connector>(connector: &C, cfg: &OffsetConfig) -> Result<(), HarnessError> {
    info!(
        endpoint = %cfg.endpoint.address(),
        rows = cfg.rows,
        concurrency = cfg.concurrency,
        increment = cfg.params.increment,
        offset = cfg.params.offset,
        scope = ?cfg.scope,
        "config"
    );
    let workload = Workload::new(cfg.rows, cfg.concurrency, KeySign::Positive);
    workload.validate()?;

    let config =
        coordinator::configure(connector, &cfg.endpoint, cfg.params, cfg.scope, &cfg.timing)
            .await?;
    let endpoint = coordinator::open(connector, &config.with_max_connections(cfg.concurrency))
        .await?;
    let endpoint: Arc<dyn Endpoint> = endpoint;

    let result = offset_round(&endpoint, workload, cfg.params).await;
    endpoint.close().await;
    result?;

    info!("test success");
    Ok(())
}

async fn offset_round(
    endpoint: &Arc<dyn Endpoint>,
    workload: Workload,
    params: AutoIncrementParams,
) -> Result<(), HarnessError> {
    setup_fixture(endpoint.as_ref()).await?;
    load::fill(Arc::clone(endpoint), workload).await?;

    let query = ScalarQuery::CountOnStride(params);
    let on_stride = endpoint
        .query_scalar(&query)
        .await
        .map_err(|e| HarnessError::endpoint(endpoint.name(), query.sql(), e))?;
    if on_stride != workload.rows {
        return Err(HarnessError::Verification {
            expected: workload.rows,
            actual: on_stride,
            query: query.sql(),
        });
    }

    cleanup_fixture(endpoint.as_ref()).await
}

/// Run the DML scenario once, or until the first failure when
/// `cfg.loop_forever` is set.
pub async fn run_dml<C: Connector>(connector: &C, cfg: &DmlConfig) -> Result<(), HarnessError> {
    let mut round = 0u64;
    loop {
        round += 1;
        run_dml_once(connector, cfg).await?;
        info!(round, "test success");
        if !cfg.loop_forever {
            return Ok(());
        }
    }
}

pub async fn run_dml_once<C: Connector>(connector: &C, cfg: &DmlConfig) -> Result<(), HarnessError> {
    info!(
        primary = %cfg.primary.address(),
        secondary = %cfg.secondary.address(),
        rows = cfg.rows,
        concurrency = cfg.concurrency,
        scope = ?cfg.scope,
        op_budget = cfg.op_budget,
        "config"
    );
    let primary_mix = MixWorkload {
        workload: Workload::new(cfg.rows, cfg.concurrency, KeySign::Positive),
        budget: cfg.op_budget,
        seed: cfg.seed,
    };
    let secondary_mix = MixWorkload {
        workload: Workload::new(cfg.rows, cfg.concurrency, KeySign::Negative),
        budget: cfg.op_budget,
        seed: cfg.seed.map(|s| s.wrapping_add(cfg.concurrency as u64)),
    };
    primary_mix.validate()?;
    secondary_mix.validate()?;

    let (a, b) = coordinator::configure_pair(
        connector,
        &cfg.primary,
        &cfg.secondary,
        cfg.scope,
        cfg.concurrency,
        &cfg.timing,
    )
    .await?;
    let oracle = connector.oracle(&a, &b);
    let poller = ConvergencePoller::from_timing(&cfg.timing);
    let a: Arc<dyn Endpoint> = a;
    let b: Arc<dyn Endpoint> = b;

    let result = async {
        setup_fixture(a.as_ref()).await?;
        // A drop/create from an earlier run may still be in flight to the
        // secondary; comparing now could see a table that is about to vanish.
        sleep(cfg.timing.table_settle()).await;
        poller.await_equal(oracle.as_ref()).await?;

        load::fill(Arc::clone(&a), primary_mix.workload).await?;
        load::fill(Arc::clone(&b), secondary_mix.workload).await?;
        poller.await_equal(oracle.as_ref()).await?;

        mixer::mix_pair(Arc::clone(&a), primary_mix, Arc::clone(&b), secondary_mix).await?;
        poller.await_equal(oracle.as_ref()).await?;
        Ok::<_, HarnessError>(())
    }
    .await;

    a.close().await;
    b.close().await;
    result
}

/// Race add, widen and drop column against writers on both endpoints, once
/// per configured column type.
pub async fn run_ddl<C: Connector>(connector: &C, cfg: &DdlConfig) -> Result<(), HarnessError> {
    info!(
        primary = %cfg.primary.address(),
        secondary = %cfg.secondary.address(),
        concurrency = cfg.concurrency,
        scope = ?cfg.scope,
        "config"
    );
    if cfg.concurrency == 0 {
        return Err(HarnessError::Config(
            "concurrency must be at least 1".to_string(),
        ));
    }

    let (a, b) = coordinator::configure_pair(
        connector,
        &cfg.primary,
        &cfg.secondary,
        cfg.scope,
        cfg.concurrency,
        &cfg.timing,
    )
    .await?;
    let oracle = connector.oracle(&a, &b);
    let poller = ConvergencePoller::from_timing(&cfg.timing);
    let a: Arc<dyn Endpoint> = a;
    let b: Arc<dyn Endpoint> = b;

    let result = async {
        for ty in &cfg.column_types {
            let column = ColumnSpec::new(format!("c{}", rand::rng().random_range(0..1000)), *ty);
            ddl_round(&a, &b, oracle.as_ref(), &poller, &column, cfg).await?;
        }
        Ok::<_, HarnessError>(())
    }
    .await;

    a.close().await;
    b.close().await;
    result?;

    info!("test add/change(int -> bigint)/drop column success");
    Ok(())
}

async fn ddl_round(
    a: &Arc<dyn Endpoint>,
    b: &Arc<dyn Endpoint>,
    oracle: &dyn Oracle,
    poller: &ConvergencePoller,
    column: &ColumnSpec,
    cfg: &DdlConfig,
) -> Result<(), HarnessError> {
    setup_fixture(a.as_ref()).await?;
    poller.await_equal(oracle).await?;

    let endpoints = [Arc::clone(a), Arc::clone(b)];
    let phases = [
        (
            "add column",
            Statement::AddColumn {
                column: column.clone(),
            },
        ),
        (
            "change column",
            Statement::ModifyColumn {
                column: column.widened(),
            },
        ),
        (
            "drop column",
            Statement::DropColumn {
                column: column.name.clone(),
            },
        ),
    ];
    for (phase, ddl) in phases {
        let report = race::run_race(
            a,
            &endpoints,
            cfg.concurrency,
            &column.name,
            &ddl,
            &cfg.timing,
        )
        .await?;
        poller.await_equal(oracle).await?;
        info!(
            phase,
            column = %column.name,
            iterations = report.iterations,
            missing_default = report.missing_default,
            unknown_column = report.unknown_column,
            "pass check data equal"
        );
    }
    Ok(())
}
