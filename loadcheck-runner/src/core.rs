use loadcheck::backend::Backend;
use loadcheck::backend::memory::MemoryBackend;
use loadcheck::backend::postgres::PostgresBackend;
use loadcheck::harness::Harness;
use loadcheck::workers::policy::{FailureAction, build_failure_policy};
use loadcheck_config::shared::{BackendConfig, HarnessConfig, RunnerConfig};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

/// Exit code used when a fatal failure aborts the run.
const FATAL_EXIT_CODE: i32 = -1;

/// Builds the configured backend and runs the harness on it.
pub async fn start_runner_with_config(runner_config: RunnerConfig) -> anyhow::Result<()> {
    info!("starting load-check runner");

    log_config(&runner_config);

    // One arm per backend keeps the harness statically dispatched.
    match &runner_config.backend {
        BackendConfig::Memory(memory_config) => {
            let backend = MemoryBackend::with_config(memory_config);
            run_harness(runner_config.harness, backend).await
        }
        BackendConfig::Postgres {
            connection,
            max_outstanding_calls,
        } => {
            let backend = PostgresBackend::new(connection, *max_outstanding_calls);
            backend
                .prepare_tables(
                    runner_config
                        .harness
                        .tables
                        .iter()
                        .map(|table| table.name.as_str()),
                )
                .await?;

            run_harness(runner_config.harness, backend).await
        }
    }
}

fn log_config(config: &RunnerConfig) {
    let harness = &config.harness;
    for table in &harness.tables {
        info!(
            table = %table.name,
            partitioning = ?table.partitioning,
            partition_column_index = table.partition_column_index,
            "monitored table"
        );
    }

    info!(
        admission_permits = harness.admission_permits,
        batch_size = harness.driver.batch_size,
        throttle_ms = harness.driver.throttle_ms,
        idle_interval_ms = harness.reconciliation.idle_interval_ms,
        seed = ?harness.seed,
        metrics_port = ?config.metrics.as_ref().map(|metrics| metrics.port),
        "harness config"
    );
}

/// Runs the harness until every pair exits, a signal requests a shutdown or a fatal failure is
/// recorded. Fatal failures terminate the process.
#[tracing::instrument(skip_all)]
async fn run_harness<B>(config: HarnessConfig, backend: B) -> anyhow::Result<()>
where
    B: Backend + Clone + Send + Sync + 'static,
{
    let mut harness = Harness::new(config, backend);
    harness.start().await?;

    let coordinator = harness.coordinator();
    let shutdown_handle = tokio::spawn(async move {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("sigint (ctrl+c) received, shutting down harness");
                    }
                    _ = sigterm.recv() => {
                        info!("sigterm received, shutting down harness");
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to register sigterm handler, only ctrl+c stops the harness");
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "failed to listen for ctrl+c");
                    return;
                }
                info!("sigint (ctrl+c) received, shutting down harness");
            }
        }

        coordinator.shutdown();
    });

    let result = harness.wait().await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    if let Err(err) = &result {
        let policy = build_failure_policy(err);
        if policy.action() == FailureAction::AbortProcess {
            error!(
                error = %err,
                solution = policy.solution().unwrap_or_default(),
                "fatal failure, terminating the process"
            );
            std::process::exit(FATAL_EXIT_CODE);
        }
    }

    result?;

    info!("load-check runner stopped");

    Ok(())
}
