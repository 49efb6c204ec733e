use std::time::Duration;

use loadcheck::backend::memory::MemoryBackend;
use loadcheck::backend::{ProcedureKind, ResponseStatus};
use loadcheck::error::ErrorKind;
use loadcheck::harness::Harness;
use loadcheck::test_utils::backend_wrapper::TestBackendWrapper;
use loadcheck::test_utils::config::test_harness_config;
use loadcheck::test_utils::fault::{FaultConfig, FaultInjectingBackend, FaultType};
use loadcheck::workers::policy::{FailureAction, build_failure_policy};
use loadcheck_config::shared::{HarnessConfig, Partitioning};
use loadcheck_telemetry::init_test_tracing;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test(flavor = "multi_thread")]
async fn copy_and_direct_paths_reconcile_every_row() {
    init_test_tracing();

    let backend = TestBackendWrapper::wrap(MemoryBackend::new());
    let config = test_harness_config(&[("loadmp", Partitioning::MultiPartition)], 50);
    let mut harness = Harness::new(config, backend.clone());
    harness.start().await.unwrap();

    let copy_deletes = backend.wait_for_table_responses("loadmp", ProcedureKind::Delete, 30);
    let direct_deletes = backend.wait_for_table_responses("loadmp", ProcedureKind::DeleteOnly, 101);
    copy_deletes.notified().await;
    direct_deletes.notified().await;

    let state = harness.pair_state("loadmp").unwrap();
    harness.shutdown();
    timeout(TEST_TIMEOUT, harness.wait())
        .await
        .unwrap()
        .unwrap();

    // Every callback has fired once the pair exited.
    let stats = state.stats();
    assert_eq!(stats.copy_routed + stats.direct_routed, stats.rows_submitted);
    assert_eq!(stats.reconciled, stats.copy_delete_done);
    assert!(stats.direct_deleted >= 101);

    let memory = backend.inner();
    assert_eq!(memory.copy_row_count("loadmp").await as u64, 0);
    assert_eq!(
        memory.row_count("loadmp").await as u64,
        stats.rows_submitted - stats.direct_deleted - stats.copy_delete_done
    );

    assert!(
        backend
            .responses_of(ProcedureKind::Delete)
            .iter()
            .all(|response| response.scalar == Some(2))
    );
    assert!(
        backend
            .responses_of(ProcedureKind::DeleteOnly)
            .iter()
            .all(|response| response.scalar == Some(1))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn row_count_mismatch_stops_only_the_affected_pair() {
    init_test_tracing();

    let faulty = FaultInjectingBackend::wrap(
        MemoryBackend::new(),
        vec![
            FaultConfig::new(ProcedureKind::Delete, FaultType::AffectedRows(1)).for_table("alpha"),
        ],
    );
    let backend = TestBackendWrapper::wrap(faulty);
    let config = test_harness_config(
        &[
            ("alpha", Partitioning::MultiPartition),
            ("beta", Partitioning::SinglePartition),
        ],
        20,
    );
    let mut harness = Harness::new(config, backend.clone());
    harness.start().await.unwrap();

    let alpha = harness.pair_state("alpha").unwrap();
    let beta = harness.pair_state("beta").unwrap();

    timeout(TEST_TIMEOUT, alpha.stopped()).await.unwrap();
    let failure = alpha.failure().unwrap();
    assert_eq!(failure.kind(), ErrorKind::RowCountMismatch);
    assert_eq!(build_failure_policy(&failure).action(), FailureAction::StopPair);

    // The other pair keeps producing rows.
    assert!(beta.is_running());
    let submitted = beta.stats().rows_submitted as usize;
    backend
        .wait_for_table_responses("beta", ProcedureKind::Load, submitted + 100)
        .notified()
        .await;
    assert!(beta.is_running());
    assert!(beta.failure().is_none());

    harness.shutdown();
    let err = timeout(TEST_TIMEOUT, harness.wait())
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::RowCountMismatch]);
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_insert_failure_aborts_the_run() {
    init_test_tracing();

    let faulty = FaultInjectingBackend::wrap(
        MemoryBackend::new(),
        vec![
            FaultConfig::new(
                ProcedureKind::Load,
                FaultType::Status(ResponseStatus::GracefulFailure),
            )
            .for_table("alpha")
            .after(50),
        ],
    );
    let config = test_harness_config(
        &[
            ("alpha", Partitioning::SinglePartition),
            ("beta", Partitioning::MultiPartition),
        ],
        20,
    );
    let mut harness = Harness::new(config, faulty);
    harness.start().await.unwrap();
    let beta = harness.pair_state("beta").unwrap();

    // No shutdown request: the fatal failure alone ends the run.
    let err = timeout(TEST_TIMEOUT, harness.wait())
        .await
        .unwrap()
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::GracefulApplicationFailure);
    assert_eq!(
        build_failure_policy(&err).action(),
        FailureAction::AbortProcess
    );
    assert!(!beta.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn ungraceful_insert_failure_degrades_the_pair() {
    init_test_tracing();

    let faulty = FaultInjectingBackend::wrap(
        MemoryBackend::new(),
        vec![
            FaultConfig::new(
                ProcedureKind::Load,
                FaultType::Status(ResponseStatus::ConnectionLost),
            )
            .after(30),
        ],
    );
    let config = test_harness_config(&[("loadp", Partitioning::SinglePartition)], 20);
    let mut harness = Harness::new(config, faulty);
    harness.start().await.unwrap();

    // The only pair stops by itself, so waiting needs no shutdown request.
    let err = timeout(TEST_TIMEOUT, harness.wait())
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UngracefulApplicationFailure);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_inserts_release_their_permits() {
    init_test_tracing();

    let faulty = FaultInjectingBackend::wrap(
        MemoryBackend::new(),
        vec![FaultConfig::new(ProcedureKind::Load, FaultType::Reject).after(10)],
    );
    let backend = TestBackendWrapper::wrap(faulty);
    let mut config = test_harness_config(&[("loadmp", Partitioning::MultiPartition)], 10);
    // Far fewer permits than rejected rows: a leaked permit would stall the driver.
    config.admission_permits = 5;

    let mut harness = Harness::new(config, backend.clone());
    harness.start().await.unwrap();
    let state = harness.pair_state("loadmp").unwrap();

    timeout(TEST_TIMEOUT, async {
        while state.stats().rows_rejected < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(state.stats().rows_submitted, 10);
    assert!(state.is_running());

    harness.shutdown();
    timeout(TEST_TIMEOUT, harness.wait())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_configuration_is_rejected() {
    let mut harness = Harness::new(HarnessConfig::new(vec![]), MemoryBackend::new());

    let err = harness.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

#[tokio::test(flavor = "multi_thread")]
async fn harness_cannot_start_twice() {
    let config = test_harness_config(&[("loadp", Partitioning::SinglePartition)], 5);
    let mut harness = Harness::new(config, MemoryBackend::new());
    harness.start().await.unwrap();

    let err = harness.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    harness.shutdown();
    timeout(TEST_TIMEOUT, harness.wait())
        .await
        .unwrap()
        .unwrap();
}
