use std::time::Duration;

use loadcheck::backend::ProcedureKind;
use loadcheck::backend::memory::MemoryBackend;
use loadcheck::error::ErrorKind;
use loadcheck::failpoints::RECONCILIATION__BEFORE_COPY;
use loadcheck::harness::Harness;
use loadcheck::test_utils::backend_wrapper::TestBackendWrapper;
use loadcheck::test_utils::config::test_harness_config;
use loadcheck::test_utils::failpoints::FailpointScenario;
use loadcheck_config::shared::Partitioning;
use loadcheck_telemetry::init_test_tracing;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test(flavor = "multi_thread")]
async fn worker_error_leaves_the_driver_running() {
    init_test_tracing();
    let _scenario = FailpointScenario::setup(&[(RECONCILIATION__BEFORE_COPY, "return")]);

    let backend = TestBackendWrapper::wrap(MemoryBackend::new());
    let config = test_harness_config(&[("loadp", Partitioning::SinglePartition)], 10);
    let mut harness = Harness::new(config, backend.clone());
    harness.start().await.unwrap();
    let state = harness.pair_state("loadp").unwrap();

    // The worker exits on the first batch it drains.
    timeout(TEST_TIMEOUT, state.reconciliation().exited())
        .await
        .unwrap();

    // The driver keeps submitting rows on its own.
    let submitted = state.stats().rows_submitted as usize;
    let more_loads = backend.wait_for_responses(ProcedureKind::Load, submitted + 30);
    more_loads.notified().await;
    assert!(state.is_running());

    harness.shutdown();
    let err = timeout(TEST_TIMEOUT, harness.wait())
        .await
        .unwrap()
        .unwrap_err();

    assert_eq!(err.kinds(), vec![ErrorKind::FailpointTriggered]);
    assert!(state.failure().is_none());
    assert!(backend.calls_of(ProcedureKind::Copy).is_empty());
    assert!(backend.calls_of(ProcedureKind::Delete).is_empty());
}
