use std::time::Duration;

use loadcheck::backend::memory::MemoryBackend;
use loadcheck::error::ErrorKind;
use loadcheck::failpoints::LOAD_DRIVER__BEFORE_ROW_COUNT;
use loadcheck::harness::Harness;
use loadcheck::test_utils::config::test_harness_config;
use loadcheck::test_utils::failpoints::FailpointScenario;
use loadcheck_config::shared::Partitioning;
use loadcheck_telemetry::init_test_tracing;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test(flavor = "multi_thread")]
async fn driver_error_stops_only_its_task() {
    init_test_tracing();
    let _scenario = FailpointScenario::setup(&[(LOAD_DRIVER__BEFORE_ROW_COUNT, "return")]);

    let config = test_harness_config(&[("loadp", Partitioning::SinglePartition)], 10);
    let mut harness = Harness::new(config, MemoryBackend::new());
    harness.start().await.unwrap();
    let state = harness.pair_state("loadp").unwrap();

    // The driver exits after its first batch without any shutdown request.
    let err = timeout(TEST_TIMEOUT, harness.wait())
        .await
        .unwrap()
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FailpointTriggered);
    assert_eq!(state.stats().rows_submitted, 10);
    // Not a fatal failure: the pair was not degraded through its flag.
    assert!(state.failure().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_driver_error_aborts_every_pair() {
    init_test_tracing();
    let _scenario =
        FailpointScenario::setup(&[(LOAD_DRIVER__BEFORE_ROW_COUNT, "1*return(graceful)->off")]);

    let config = test_harness_config(
        &[
            ("alpha", Partitioning::SinglePartition),
            ("beta", Partitioning::MultiPartition),
        ],
        10,
    );
    let mut harness = Harness::new(config, MemoryBackend::new());
    harness.start().await.unwrap();
    let alpha = harness.pair_state("alpha").unwrap();
    let beta = harness.pair_state("beta").unwrap();

    let err = timeout(TEST_TIMEOUT, harness.wait())
        .await
        .unwrap()
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::GracefulApplicationFailure);
    assert!(!alpha.is_running());
    assert!(!beta.is_running());
}
