
use replcheck::error::HarnessError;
use replcheck::fixture::{AutoIncrementParams, StatementKind};
use replcheck::load::{self, KeySign, Workload};
use replcheck::memory::MemoryConnector;
use replcheck::mixer::{self, MixWorkload};

use test_helpers::*;

fn mix_of(rows: i64, concurrency: usize, sign: KeySign, budget: i64) -> MixWorkload {
    MixWorkload {
        workload: Workload::new(rows, concurrency, sign),
        budget,
        seed: Some(42),
    }
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn mix_runs_exactly_the_budget() {
    let connector = MemoryConnector::new();
    let endpoint =
        open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(2, 1))
            .await;
    load::fill(as_dyn(&endpoint), Workload::new(50, 4, KeySign::Positive))
        .await
        .expect("fill");
    let before = endpoint.server().statement_count();

    let report = mixer::mix(as_dyn(&endpoint), mix_of(50, 6, KeySign::Positive, 1_000))
        .await
        .expect("mix");

    assert_eq!(report.total(), 1_000);
    assert_eq!(endpoint.server().statement_count() - before, 1_000);
    let keys = endpoint.server().snapshot().unwrap().unique_keys();
    assert!(keys.iter().all(|k| (1..=50).contains(k)), "keys {keys:?}");
}

#[replcheck::test]
async fn negative_mix_stays_in_negative_half() {
    let connector = MemoryConnector::new();
    let endpoint =
        open_with_fixture(&connector, &secondary_config(), AutoIncrementParams::new(2, 2)).await;
    load::fill(as_dyn(&endpoint), Workload::new(20, 2, KeySign::Negative))
        .await
        .expect("fill");

    mixer::mix(as_dyn(&endpoint), mix_of(20, 3, KeySign::Negative, 300))
        .await
        .expect("mix");

    let snapshot = endpoint.server().snapshot().unwrap();
    assert!(snapshot.unique_keys().iter().all(|k| (-20..=-1).contains(k)));
    // Upserts keep allocating on the endpoint's own stride.
    assert!(snapshot.rows.keys().all(|id| id % 2 == 0));
}

#[replcheck::test]
async fn zero_budget_issues_no_statements() {
    let connector = MemoryConnector::new();
    let endpoint =
        open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(1, 1)).await;
    let before = endpoint.server().statement_count();

    let report = mixer::mix(as_dyn(&endpoint), mix_of(10, 4, KeySign::Positive, 0))
        .await
        .expect("mix");

    assert_eq!(report.total(), 0);
    assert_eq!(endpoint.server().statement_count(), before);
}

#[replcheck::test]
async fn empty_key_range_with_budget_is_rejected() {
    let connector = MemoryConnector::new();
    let endpoint =
        open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(1, 1)).await;

    let err = mixer::mix(as_dyn(&endpoint), mix_of(0, 4, KeySign::Positive, 10))
        .await
        .expect_err("mix should fail");
    assert!(matches!(err, HarnessError::Config(_)));
}

#[replcheck::test]
async fn failing_statement_aborts_the_mix() {
    let connector = MemoryConnector::new();
    let endpoint =
        open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(1, 1)).await;
    endpoint.server().fail_after(StatementKind::Delete, 0);

    let err = mixer::mix(as_dyn(&endpoint), mix_of(10, 2, KeySign::Positive, 500))
        .await
        .expect_err("mix should fail");
    assert!(matches!(err, HarnessError::Endpoint { .. }));
}

#[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
async fn pair_budgets_are_per_endpoint() {
    let connector = MemoryConnector::new();
    let a = open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(2, 1))
        .await;
    let b = open_with_fixture(&connector, &secondary_config(), AutoIncrementParams::new(2, 2))
        .await;
    let a_before = a.server().statement_count();
    let b_before = b.server().statement_count();

    let (ra, rb) = mixer::mix_pair(
        as_dyn(&a),
        mix_of(30, 4, KeySign::Positive, 200),
        as_dyn(&b),
        mix_of(30, 4, KeySign::Negative, 120),
    )
    .await
    .expect("mix pair");

    assert_eq!(ra.total(), 200);
    assert_eq!(rb.total(), 120);
    assert_eq!(a.server().statement_count() - a_before, 200);
    assert_eq!(b.server().statement_count() - b_before, 120);
}

#[replcheck::test]
async fn pair_failure_still_finishes_the_other_side() {
    let connector = MemoryConnector::new();
    let a = open_with_fixture(&connector, &primary_config(), AutoIncrementParams::new(2, 1)).await;
    let b =
        open_with_fixture(&connector, &secondary_config(), AutoIncrementParams::new(2, 2)).await;
    a.server().fail_after(StatementKind::Update, 0);
    let b_before = b.server().statement_count();

    let err = mixer::mix_pair(
        as_dyn(&a),
        mix_of(10, 2, KeySign::Positive, 100),
        as_dyn(&b),
        mix_of(10, 2, KeySign::Negative, 100),
    )
    .await
    .expect_err("pair should fail");

    match err {
        HarnessError::Endpoint { endpoint, .. } => assert_eq!(endpoint, "db1"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(b.server().statement_count() - b_before, 100);
}
