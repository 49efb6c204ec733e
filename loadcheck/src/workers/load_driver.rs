use std::sync::Arc;

use loadcheck_config::shared::{DriverConfig, ReconciliationConfig, TableConfig};
use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::backend::{Backend, ProcedureCall, ScalarQuery};
use crate::concurrency::admission::AdmissionGate;
use crate::concurrency::barrier::BatchBarrier;
use crate::concurrency::queue::{CopyQueueTx, create_copy_queue};
use crate::concurrency::shutdown::{ContinueFlag, ShutdownCoordinator, sleep_until_cancelled};
use crate::error::{ErrorKind, LoadCheckError, LoadCheckResult};
use crate::failpoints::{LOAD_DRIVER__BEFORE_ROW_COUNT, loadcheck_fail_point};
use crate::loadcheck_error;
use crate::metrics::{
    LOADCHECK_ROWS_DIRECT_DELETED_TOTAL, LOADCHECK_ROWS_REJECTED_TOTAL,
    LOADCHECK_ROWS_SUBMITTED_TOTAL, LOADCHECK_THROTTLES_TOTAL, TABLE_NAME_LABEL,
};
use crate::tracker::{DeleteCallback, InsertCallback, PairContext, PairStatsSnapshot};
use crate::types::{Destiny, RowGenerator};
use crate::workers::base::{Worker, WorkerHandle, WorkerType};
use crate::workers::policy::{FailureAction, build_failure_policy};
use crate::workers::reconciliation::{
    ReconciliationPhase, ReconciliationWorker, ReconciliationWorkerHandle,
    ReconciliationWorkerState,
};

/// The direct-delete buffer is flushed once it holds strictly more ids than this.
pub const ONLY_DELETE_FLUSH_THRESHOLD: usize = 100;

/// Observable state of a driver/worker pair.
#[derive(Debug, Clone)]
pub struct LoadDriverState {
    context: PairContext,
    reconciliation: ReconciliationWorkerState,
}

impl LoadDriverState {
    pub fn table(&self) -> &Arc<str> {
        self.context.table()
    }

    /// Returns `false` once the pair was degraded or the coordinator stopped.
    pub fn is_running(&self) -> bool {
        !self.context.should_stop()
    }

    pub fn stats(&self) -> PairStatsSnapshot {
        self.context.stats().snapshot()
    }

    /// Returns the failure that degraded the pair, if any.
    pub fn failure(&self) -> Option<LoadCheckError> {
        self.context.failure()
    }

    pub fn reconciliation_phase(&self) -> ReconciliationPhase {
        self.reconciliation.phase()
    }

    pub fn reconciliation(&self) -> &ReconciliationWorkerState {
        &self.reconciliation
    }

    /// Resolves once the pair's continue flag is cleared.
    pub async fn stopped(&self) {
        self.context.continue_flag().cleared().await;
    }
}

/// Handle of a running [`LoadDriver`].
#[derive(Debug)]
pub struct LoadDriverHandle {
    state: LoadDriverState,
    handle: Option<JoinHandle<LoadCheckResult<()>>>,
}

impl LoadDriverHandle {
    /// Asks the pair to stop at its next checkpoint.
    pub fn stop(&self) {
        self.state.context.continue_flag().clear();
    }
}

impl WorkerHandle<LoadDriverState> for LoadDriverHandle {
    fn state(&self) -> LoadDriverState {
        self.state.clone()
    }

    async fn wait(mut self) -> LoadCheckResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            loadcheck_error!(
                ErrorKind::LoadDriverPanic,
                "Load driver panicked",
                format!("Driver of table '{}' failed: {err}", self.state.table())
            )
        })?
    }
}

/// Producer of a monitored table.
///
/// Submits batches of rows, routes every accepted row to exactly one destiny and flushes direct
/// deletes. Starting a driver also starts its [`ReconciliationWorker`], which the driver stops
/// and joins when it exits.
#[derive(Debug)]
pub struct LoadDriver<B> {
    backend: B,
    table: TableConfig,
    driver_config: DriverConfig,
    reconciliation_config: ReconciliationConfig,
    gate: AdmissionGate,
    coordinator: ShutdownCoordinator,
    generator: RowGenerator,
}

impl<B> LoadDriver<B> {
    pub fn new(
        backend: B,
        table: TableConfig,
        driver_config: DriverConfig,
        reconciliation_config: ReconciliationConfig,
        gate: AdmissionGate,
        coordinator: ShutdownCoordinator,
        generator: RowGenerator,
    ) -> Self {
        Self {
            backend,
            table,
            driver_config,
            reconciliation_config,
            gate,
            coordinator,
            generator,
        }
    }
}

impl<B> Worker<LoadDriverHandle, LoadDriverState> for LoadDriver<B>
where
    B: Backend + Clone + Send + Sync + 'static,
{
    type Error = LoadCheckError;

    async fn start(self) -> Result<LoadDriverHandle, Self::Error> {
        let table: Arc<str> = Arc::from(self.table.name.as_str());
        let worker_type = WorkerType::LoadDriver {
            table: table.clone(),
        };
        info!(
            %worker_type,
            partitioning = ?self.table.partitioning,
            batch_size = self.driver_config.batch_size,
            "starting load driver"
        );

        let context = PairContext::new(table.clone(), self.coordinator.clone());
        let (queue_tx, queue_rx) = create_copy_queue();

        let worker = ReconciliationWorker::new(
            self.backend.clone(),
            context.clone(),
            self.table.partitioning,
            queue_rx,
            self.reconciliation_config.clone(),
        );
        let worker_handle = worker.start().await?;

        let state = LoadDriverState {
            context: context.clone(),
            reconciliation: worker_handle.state(),
        };

        let stop_guard = PairStopGuard {
            pair: context.continue_flag().clone(),
            worker: worker_handle.continue_flag().clone(),
        };
        let driver_loop = LoadDriverLoop {
            backend: self.backend,
            table: self.table,
            config: self.driver_config,
            gate: self.gate,
            context,
            queue: queue_tx,
            generator: self.generator,
            only_delete_buffer: Vec::with_capacity(ONLY_DELETE_FLUSH_THRESHOLD + 1),
            last_progress: None,
            queue_closed: false,
            _stop_guard: stop_guard,
        };

        let span = info_span!("load_driver", table = %table);
        let handle = tokio::spawn(driver_loop.run(worker_handle).instrument(span));

        Ok(LoadDriverHandle {
            state,
            handle: Some(handle),
        })
    }
}

/// Rows of one batch accepted by the backend.
#[derive(Debug, Default)]
struct SubmittedBatch {
    copy_ids: Vec<i64>,
    accepted: u64,
    rejected: u64,
}

/// Stops the pair and its worker when the driver loop goes away, including on panic.
#[derive(Debug)]
struct PairStopGuard {
    pair: ContinueFlag,
    worker: ContinueFlag,
}

impl Drop for PairStopGuard {
    fn drop(&mut self) {
        self.worker.clear();
        self.pair.clear();
    }
}

struct LoadDriverLoop<B> {
    backend: B,
    table: TableConfig,
    config: DriverConfig,
    gate: AdmissionGate,
    context: PairContext,
    queue: CopyQueueTx,
    generator: RowGenerator,
    only_delete_buffer: Vec<i64>,
    /// Row count and reconciled count seen by the previous iteration.
    last_progress: Option<(i64, u64)>,
    /// Set once a push found the copy queue closed.
    queue_closed: bool,
    _stop_guard: PairStopGuard,
}

impl<B> LoadDriverLoop<B>
where
    B: Backend,
{
    async fn run(mut self, worker: ReconciliationWorkerHandle) -> LoadCheckResult<()> {
        let result = self.run_iterations().await;

        if let Err(err) = &result {
            // Unhandled errors still follow the policy, a graceful failure stops every pair.
            if build_failure_policy(err).action() == FailureAction::AbortProcess {
                self.context.coordinator().abort(err.clone());
            }
        }

        worker.stop();
        let worker_result = worker.wait().await;

        let stats = self.context.stats().snapshot();
        info!(
            rows_submitted = stats.rows_submitted,
            reconciled = stats.reconciled,
            direct_deleted = stats.direct_deleted,
            abandoned_direct_deletes = self.only_delete_buffer.len(),
            "load driver stopped"
        );

        let mut errors = Vec::new();
        match result {
            Err(err) => {
                error!(error = %err, "load driver exited with an unhandled error");
                errors.push(err);
            }
            Ok(()) => {
                if let Some(failure) = self.context.failure() {
                    errors.push(failure);
                }
            }
        }
        if let Err(err) = worker_result {
            error!(error = %err, "reconciliation worker exited with an error");
            errors.push(err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    async fn run_iterations(&mut self) -> LoadCheckResult<()> {
        while !self.context.should_stop() {
            self.submit_batch().await?;

            if self.context.should_stop() {
                break;
            }

            self.throttle_without_progress().await?;
            self.flush_only_deletes_if_full().await?;
        }

        Ok(())
    }

    /// Submits one batch of rows sharing a single destiny and waits for every insert callback.
    ///
    /// A submission error ends the batch early, but the rows accepted before it are still
    /// awaited and routed before the error is returned.
    async fn submit_batch(&mut self) -> LoadCheckResult<()> {
        let destiny = self.generator.next_destiny();
        let barrier = BatchBarrier::new();
        let mut batch = SubmittedBatch::default();

        let result = self.submit_rows(destiny, &barrier, &mut batch).await;

        let table = self.context.table().to_string();
        counter!(LOADCHECK_ROWS_SUBMITTED_TOTAL, TABLE_NAME_LABEL => table.clone())
            .increment(batch.accepted);
        if batch.rejected > 0 {
            counter!(LOADCHECK_ROWS_REJECTED_TOTAL, TABLE_NAME_LABEL => table)
                .increment(batch.rejected);
        }
        debug!(
            destiny = destiny.as_str(),
            accepted = batch.accepted,
            rejected = batch.rejected,
            "batch submitted"
        );

        barrier.wait().await;

        // Rows are queued for copy once their inserts completed.
        self.queue_for_copy(batch.copy_ids);

        result
    }

    async fn submit_rows(
        &mut self,
        destiny: Destiny,
        barrier: &BatchBarrier,
        batch: &mut SubmittedBatch,
    ) -> LoadCheckResult<()> {
        let partitioning = self.table.partitioning;

        for _ in 0..self.config.batch_size {
            let permit = self.gate.acquire().await?;
            let row = self.generator.next_row();
            let routing_key = partitioning.is_single_partition().then(|| {
                self.backend
                    .routing_key_of(row.column(self.table.partition_column_index))
            });

            let call = ProcedureCall::Load {
                table: self.context.table().clone(),
                row,
                routing_key,
            };
            let callback =
                InsertCallback::new(self.context.clone(), row.id, permit, barrier.arrival());

            if !self.backend.call_procedure(call, Box::new(callback))? {
                self.context.stats().record_rejected();
                batch.rejected += 1;
                continue;
            }

            self.context.stats().record_submitted(destiny);
            batch.accepted += 1;
            match destiny {
                Destiny::CopyThenDelete => batch.copy_ids.push(row.id),
                Destiny::DirectDelete => self.only_delete_buffer.push(row.id),
            }
        }

        Ok(())
    }

    fn queue_for_copy(&mut self, copy_ids: Vec<i64>) {
        let mut abandoned = 0usize;
        for id in copy_ids {
            if !self.queue.push(id) {
                abandoned += 1;
            }
        }

        if abandoned > 0 && !self.queue_closed {
            self.queue_closed = true;
            warn!(
                abandoned,
                "copy queue closed, the reconciliation worker exited and copy rows are abandoned"
            );
        }
    }

    /// Sleeps the throttle interval when neither the row count nor the reconciled count moved
    /// since the previous iteration.
    async fn throttle_without_progress(&mut self) -> LoadCheckResult<()> {
        loadcheck_fail_point(LOAD_DRIVER__BEFORE_ROW_COUNT)?;

        let row_count = self
            .backend
            .query_scalar(ScalarQuery::RowCount {
                table: self.context.table().clone(),
            })
            .await?;
        let progress = (row_count, self.context.stats().reconciled());

        if self.last_progress == Some(progress) {
            debug!(row_count, "no progress since the previous iteration, throttling");
            counter!(
                LOADCHECK_THROTTLES_TOTAL,
                TABLE_NAME_LABEL => self.context.table().to_string()
            )
            .increment(1);

            sleep_until_cancelled(
                self.config.throttle(),
                self.context.continue_flag(),
                self.context.coordinator(),
            )
            .await;
        }
        self.last_progress = Some(progress);

        Ok(())
    }

    /// Flushes the direct-delete buffer when it holds more than [`ONLY_DELETE_FLUSH_THRESHOLD`]
    /// ids. Returns whether a flush happened.
    async fn flush_only_deletes_if_full(&mut self) -> LoadCheckResult<bool> {
        if self.only_delete_buffer.len() <= ONLY_DELETE_FLUSH_THRESHOLD {
            return Ok(false);
        }

        let barrier = BatchBarrier::new();
        let mut accepted = 0u64;
        for &id in &self.only_delete_buffer {
            let call = ProcedureCall::terminating_delete(
                self.context.table().clone(),
                id,
                self.table.partitioning,
                Destiny::DirectDelete,
            );
            let callback =
                DeleteCallback::new(self.context.clone(), id, Destiny::DirectDelete, barrier.arrival());

            if self.backend.call_procedure(call, Box::new(callback))? {
                accepted += 1;
            } else {
                warn!(row_id = id, "direct delete rejected by the backend");
            }
        }

        barrier.wait().await;

        self.context.stats().record_direct_deletes(accepted);
        counter!(
            LOADCHECK_ROWS_DIRECT_DELETED_TOTAL,
            TABLE_NAME_LABEL => self.context.table().to_string()
        )
        .increment(accepted);
        debug!(
            flushed = self.only_delete_buffer.len(),
            accepted, "direct-delete buffer flushed"
        );

        self.only_delete_buffer.clear();

        Ok(true)
    }
}
