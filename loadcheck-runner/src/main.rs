//! Load-check runner binary.
//!
//! Loads the configuration, initializes telemetry and runs the harness against the configured
//! backend until it is interrupted or a fatal failure is observed.

use loadcheck_config::environment::Environment;
use loadcheck_config::shared::RunnerConfig;
use loadcheck_telemetry::init_tracing;
use loadcheck_telemetry::metrics::init_metrics;

use crate::config::load_runner_config;
use crate::core::start_runner_with_config;

mod config;
mod core;

fn main() -> anyhow::Result<()> {
    let runner_config = load_runner_config()?;

    let environment = Environment::load()?;
    init_tracing(env!("CARGO_BIN_NAME"), environment)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(runner_config))
}

async fn async_main(runner_config: RunnerConfig) -> anyhow::Result<()> {
    // The exporter spawns its listener on the current runtime.
    if let Some(metrics_config) = &runner_config.metrics {
        init_metrics(metrics_config)?;
    }

    start_runner_with_config(runner_config).await
}
