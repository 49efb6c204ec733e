//! Orchestration of driver/worker pairs.

use loadcheck_config::shared::HarnessConfig;
use tracing::{error, info};

use crate::backend::Backend;
use crate::bail;
use crate::concurrency::admission::AdmissionGate;
use crate::concurrency::shutdown::ShutdownCoordinator;
use crate::error::{ErrorKind, LoadCheckResult};
use crate::types::RowGenerator;
use crate::workers::base::Worker;
use crate::workers::load_driver::{LoadDriver, LoadDriverState};
use crate::workers::pool::PairPool;

/// Runs one load driver and one reconciliation worker per configured table.
///
/// Every pair shares the same [`AdmissionGate`] and [`ShutdownCoordinator`]. A degraded pair stops
/// on its own; a fatal failure stops every pair and is returned by [`Harness::wait`].
#[derive(Debug)]
pub struct Harness<B> {
    config: HarnessConfig,
    backend: B,
    coordinator: ShutdownCoordinator,
    pool: PairPool,
    started: bool,
}

impl<B> Harness<B>
where
    B: Backend + Clone + Send + Sync + 'static,
{
    pub fn new(config: HarnessConfig, backend: B) -> Self {
        Self {
            config,
            backend,
            coordinator: ShutdownCoordinator::new(),
            pool: PairPool::new(),
            started: false,
        }
    }

    /// Returns the coordinator shared by every pair, e.g. to request a shutdown from a signal
    /// handler.
    pub fn coordinator(&self) -> ShutdownCoordinator {
        self.coordinator.clone()
    }

    /// Validates the configuration and starts every pair.
    pub async fn start(&mut self) -> LoadCheckResult<()> {
        if self.started {
            bail!(ErrorKind::InvalidState, "The harness was already started");
        }
        self.config.validate()?;

        info!(
            backend = B::name(),
            tables = self.config.tables.len(),
            admission_permits = self.config.admission_permits,
            seed = ?self.config.seed,
            "starting harness"
        );

        let gate = AdmissionGate::new(self.config.admission_permits);
        for (index, table) in self.config.tables.iter().enumerate() {
            let driver = LoadDriver::new(
                self.backend.clone(),
                table.clone(),
                self.config.driver.clone(),
                self.config.reconciliation.clone(),
                gate.clone(),
                self.coordinator.clone(),
                RowGenerator::for_pair(self.config.seed, index),
            );

            let handle = driver.start().await?;
            self.pool.spawn(handle).await;
        }
        self.started = true;

        Ok(())
    }

    /// Returns the state of the pair monitoring `table`.
    pub fn pair_state(&self, table: &str) -> Option<LoadDriverState> {
        self.pool.state(table)
    }

    /// Asks every pair to stop at its next checkpoint.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }

    /// Waits until every pair exits or a fatal failure is recorded.
    ///
    /// A fatal failure is returned as soon as it is recorded, without waiting for the pairs to
    /// exit. Otherwise the failures of every degraded pair are returned together.
    pub async fn wait(self) -> LoadCheckResult<()> {
        let result = tokio::select! {
            fatal = self.coordinator.aborted() => Err(fatal),
            result = self.pool.wait_all() => result,
        };

        if let Some(fatal) = self.coordinator.fatal_error() {
            error!(error = %fatal, "harness aborted");
            return Err(fatal);
        }

        if let Err(err) = &result {
            error!(error = %err, "harness finished with failed pairs");
        } else {
            info!("harness finished");
        }

        result
    }
}
