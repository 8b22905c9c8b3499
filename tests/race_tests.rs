
use std::sync::Arc;
use std::time::Duration;

use replcheck::endpoint::{Connector, Endpoint};
use replcheck::error::HarnessError;
use replcheck::fixture::{AutoIncrementParams, ColumnSpec, ColumnType, Statement, StatementKind};
use replcheck::memory::MemoryConnector;
use replcheck::race::{self, RacePhase, RaceWindow};

use test_helpers::*;

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn window_moves_through_phases() {
    let connector = MemoryConnector::new();
    let endpoint =
        open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(1, 1))
            .await;

    let mut window = RaceWindow::start(&[as_dyn(&endpoint)], 2, "c1");
    assert_eq!(window.phase(), RacePhase::Running);
    tokio::time::sleep(Duration::from_millis(20)).await;

    window.stop();
    assert_eq!(window.phase(), RacePhase::Stopping);

    let report = window.drain().await.expect("drain");
    assert_eq!(window.phase(), RacePhase::Drained);
    assert!(report.iterations > 0);
    // The column was never added, so every named insert misses it.
    assert_eq!(report.unknown_column, report.iterations);
    assert_eq!(report.missing_default, 0);

    let again = window.drain().await.expect("second drain");
    assert_eq!(again.iterations, 0);
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn nothing_is_written_after_drain() {
    let connector = MemoryConnector::new();
    let endpoint =
        open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(1, 1))
            .await;

    let mut window = RaceWindow::start(&[as_dyn(&endpoint)], 4, "c1");
    tokio::time::sleep(Duration::from_millis(20)).await;
    window.drain().await.expect("drain");

    let after_drain = endpoint.server().statement_count();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(endpoint.server().statement_count(), after_drain);
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn not_null_add_is_tolerated_on_both_endpoints() {
    let connector = MemoryConnector::new();
    let server = connector.link(PRIMARY_ADDR, SECONDARY_ADDR);
    let a = open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(2, 1))
        .await;
    let b = connector
        .open(&secondary_config().with_session_params(Some(AutoIncrementParams::new(2, 2))))
        .await
        .expect("open secondary");
    let primary: Arc<dyn Endpoint> = as_dyn(&a);
    let endpoints = [as_dyn(&a), as_dyn(&b)];

    let column = ColumnSpec::new("c7", ColumnType::int_not_null());
    let report = race::run_race(
        &primary,
        &endpoints,
        2,
        &column.name,
        &Statement::AddColumn {
            column: column.clone(),
        },
        &fast_timing(),
    )
    .await
    .expect("race");

    // Before the add, named inserts fail; after it, omitting inserts fail.
    assert!(report.unknown_column > 0, "{report:?}");
    assert!(report.missing_default > 0, "{report:?}");
    assert_eq!(server.snapshot().unwrap().extra, Some(column));
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn drop_column_race_leaves_no_column() {
    let connector = MemoryConnector::new();
    let a = open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(1, 1))
        .await;
    let column = ColumnSpec::new("c3", ColumnType::int_with_default(1));
    a.execute(&Statement::AddColumn {
        column: column.clone(),
    })
    .await
    .expect("add column");
    let primary = as_dyn(&a);

    let report = race::run_race(
        &primary,
        &[as_dyn(&a)],
        3,
        &column.name,
        &Statement::DropColumn {
            column: column.name.clone(),
        },
        &fast_timing(),
    )
    .await
    .expect("race");

    assert!(report.unknown_column > 0);
    assert_eq!(report.missing_default, 0);
    let snapshot = a.server().snapshot().unwrap();
    assert!(snapshot.extra.is_none());
    assert!(snapshot.rows.values().all(|r| r.extra.is_none()));
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn untolerated_writer_error_surfaces() {
    let connector = MemoryConnector::new();
    let a = open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(1, 1))
        .await;
    a.server().fail_after(StatementKind::RaceInsert, 5);
    let primary = as_dyn(&a);

    let err = race::run_race(
        &primary,
        &[as_dyn(&a)],
        2,
        "c1",
        &Statement::AddColumn {
            column: ColumnSpec::new("c1", ColumnType::int_with_default(1)),
        },
        &fast_timing(),
    )
    .await
    .expect_err("race should fail");

    assert!(matches!(err, HarnessError::Endpoint { .. }), "{err:?}");
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn failed_ddl_drains_writers_first() {
    let connector = MemoryConnector::new();
    let a = open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(1, 1))
        .await;
    let primary = as_dyn(&a);

    // Modifying a column that does not exist fails.
    let err = race::run_race(
        &primary,
        &[as_dyn(&a)],
        2,
        "c1",
        &Statement::ModifyColumn {
            column: ColumnSpec::new("c1", ColumnType::int_with_default(1).widened()),
        },
        &fast_timing(),
    )
    .await
    .expect_err("ddl should fail");

    match err {
        HarnessError::Endpoint { context, .. } => {
            assert_eq!(context, "alter table auto1 modify column c1 bigint default 1");
        }
        other => panic!("unexpected error {other:?}"),
    }
    let after = a.server().statement_count();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.server().statement_count(), after);
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn failed_ddl_wins_over_writer_errors() {
    let connector = MemoryConnector::new();
    let a = open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(1, 1)).await;
    a.server().fail_after(StatementKind::RaceInsert, 3);
    let primary = as_dyn(&a);

    let err = race::run_race(
        &primary,
        &[as_dyn(&a)],
        2,
        "c1",
        &Statement::DropColumn {
            column: "c1".to_string(),
        },
        &fast_timing(),
    )
    .await
    .expect_err("ddl should fail");

    match err {
        HarnessError::Endpoint { context, .. } => {
            assert_eq!(context, "alter table auto1 drop column c1");
        }
        other => panic!("unexpected error {other:?}"),
    }
}
