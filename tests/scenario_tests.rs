
use replcheck::coordinator::ParamScope;
use replcheck::error::HarnessError;
use replcheck::fixture::{AutoIncrementParams, ColumnType, StatementKind};
use replcheck::memory::MemoryConnector;
use replcheck::scenario::{self, DdlConfig, DmlConfig, OffsetConfig};

use test_helpers::*;

fn offset_config(params: AutoIncrementParams, scope: ParamScope) -> OffsetConfig {
    OffsetConfig {
        endpoint: primary_config(),
        rows: 500,
        concurrency: 8,
        params,
        scope,
        timing: fast_timing(),
    }
}

fn dml_config() -> DmlConfig {
    DmlConfig {
        primary: primary_config(),
        secondary: secondary_config(),
        rows: 200,
        concurrency: 4,
        scope: ParamScope::Session,
        op_budget: 300,
        loop_forever: false,
        seed: Some(7),
        timing: fast_timing(),
    }
}

fn ddl_config() -> DdlConfig {
    DdlConfig {
        primary: primary_config(),
        secondary: secondary_config(),
        concurrency: 2,
        scope: ParamScope::Session,
        column_types: scenario::default_column_types(),
        timing: fast_timing(),
    }
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn offset_session_scope_passes_and_cleans_up() {
    let connector = MemoryConnector::new();
    let cfg = offset_config(AutoIncrementParams::new(3, 2), ParamScope::Session);

    scenario::run_offset(&connector, &cfg).await.expect("offset");

    let server = connector.server(PRIMARY_ADDR);
    assert!(server.snapshot().is_none(), "fixture table should be dropped");
    assert_eq!(server.globals(), AutoIncrementParams::new(1, 1));
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn offset_global_scope_changes_server_defaults() {
    let connector = MemoryConnector::new();
    let params = AutoIncrementParams::new(7, 5);
    let cfg = offset_config(params, ParamScope::Global);

    scenario::run_offset(&connector, &cfg).await.expect("offset");

    assert_eq!(connector.server(PRIMARY_ADDR).globals(), params);
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn offset_fails_when_globals_do_not_stick() {
    let connector = MemoryConnector::new();
    connector.server(PRIMARY_ADDR).ignore_global_writes();
    let cfg = offset_config(AutoIncrementParams::new(2, 1), ParamScope::Global);

    let err = scenario::run_offset(&connector, &cfg)
        .await
        .expect_err("offset should fail");
    assert!(matches!(err, HarnessError::ConfigMismatch { .. }), "{err:?}");
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn dml_converges_on_linked_endpoints() {
    let connector = MemoryConnector::new();
    let server = connector.link(PRIMARY_ADDR, SECONDARY_ADDR);

    scenario::run_dml(&connector, &dml_config()).await.expect("dml");

    let snapshot = server.snapshot().expect("table exists");
    let keys = snapshot.unique_keys();
    assert!(keys.iter().all(|k| *k != 0 && (-200..=200).contains(k)));
    // Each side allocates on its own stride.
    for (id, row) in &snapshot.rows {
        let uk = row.uk.expect("keyed row");
        assert_eq!(id % 2 == 1, uk > 0, "id {id} uk {uk}");
    }
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 8, timeout_ms = 30_000)]
async fn dml_converges_at_full_size() {
    let connector = MemoryConnector::new();
    let server = connector.link(PRIMARY_ADDR, SECONDARY_ADDR);
    let cfg = DmlConfig {
        rows: 1_000,
        concurrency: 8,
        op_budget: 1_000,
        seed: None,
        ..dml_config()
    };

    scenario::run_dml(&connector, &cfg).await.expect("dml");

    let snapshot = server.snapshot().expect("table exists");
    let keys = snapshot.unique_keys();
    assert!(keys.iter().any(|k| *k > 0) && keys.iter().any(|k| *k < 0));
    assert!(keys.iter().all(|k| *k != 0 && (-1_000..=1_000).contains(k)));
    // Every statement from either side stayed on that side's stride.
    for (id, row) in &snapshot.rows {
        let uk = row.uk.expect("keyed row");
        assert_eq!(id % 2 == 1, uk > 0, "id {id} uk {uk}");
    }
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn dml_times_out_without_replication() {
    let connector = MemoryConnector::new();

    let err = scenario::run_dml(&connector, &dml_config())
        .await
        .expect_err("unlinked endpoints never converge");
    assert!(matches!(err, HarnessError::ConvergenceTimeout { .. }), "{err:?}");
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 20_000)]
async fn dml_loop_runs_until_first_failure() {
    let connector = MemoryConnector::new();
    let server = connector.link(PRIMARY_ADDR, SECONDARY_ADDR);
    // Each round drops and creates the fixture once; the third round fails.
    server.fail_after(StatementKind::Setup, 4);
    let cfg = DmlConfig {
        loop_forever: true,
        op_budget: 50,
        rows: 20,
        ..dml_config()
    };

    let err = scenario::run_dml(&connector, &cfg)
        .await
        .expect_err("loop ends on failure");
    match err {
        HarnessError::Endpoint { context, .. } => {
            assert_eq!(context, "drop table if exists auto1");
        }
        other => panic!("unexpected error {other:?}"),
    }
    // Two full rounds plus the failed one, two endpoints per round.
    assert_eq!(server.connection_count(), 6);
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 20_000)]
async fn ddl_round_trip_converges_on_linked_endpoints() {
    let connector = MemoryConnector::new();
    let server = connector.link(PRIMARY_ADDR, SECONDARY_ADDR);

    scenario::run_ddl(&connector, &ddl_config()).await.expect("ddl");

    let snapshot = server.snapshot().expect("table exists");
    assert!(snapshot.extra.is_none(), "raced column should be dropped");
    assert!(!snapshot.rows.is_empty());
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 20_000)]
async fn ddl_with_not_null_column_only() {
    let connector = MemoryConnector::new();
    connector.link(PRIMARY_ADDR, SECONDARY_ADDR);
    let cfg = DdlConfig {
        column_types: vec![ColumnType::int_not_null()],
        ..ddl_config()
    };

    scenario::run_ddl(&connector, &cfg).await.expect("ddl");
}

#[replcheck::test]
async fn ddl_rejects_zero_concurrency() {
    let connector = MemoryConnector::new();
    let cfg = DdlConfig {
        concurrency: 0,
        ..ddl_config()
    };

    let err = scenario::run_ddl(&connector, &cfg)
        .await
        .expect_err("invalid config");
    assert!(matches!(err, HarnessError::Config(_)));
    assert_eq!(connector.server(PRIMARY_ADDR).connection_count(), 0);
}
