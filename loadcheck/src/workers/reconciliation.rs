use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use loadcheck_config::shared::{Partitioning, ReconciliationConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::backend::{Backend, ProcedureCall};
use crate::concurrency::barrier::BatchBarrier;
use crate::concurrency::queue::{CopyQueueRx, MAX_DRAIN_BATCH};
use crate::concurrency::shutdown::{ContinueFlag, sleep_until_cancelled};
use crate::error::{ErrorKind, LoadCheckError, LoadCheckResult};
use crate::failpoints::{RECONCILIATION__BEFORE_COPY, loadcheck_fail_point};
use crate::loadcheck_error;
use crate::tracker::{CopyCallback, DeleteCallback, PairContext};
use crate::types::Destiny;
use crate::workers::base::{Worker, WorkerHandle, WorkerType};

/// Phase of a reconciliation worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationPhase {
    /// Nothing was queued; the worker sleeps its idle interval.
    Idle,
    /// Taking ids from the copy queue.
    Draining,
    /// Waiting for the copies of the drained ids.
    CopyPending,
    /// Waiting for the terminating deletes of the drained ids.
    DeletePending,
}

impl ReconciliationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationPhase::Idle => "idle",
            ReconciliationPhase::Draining => "draining",
            ReconciliationPhase::CopyPending => "copy_pending",
            ReconciliationPhase::DeletePending => "delete_pending",
        }
    }
}

/// Observable state of a [`ReconciliationWorker`].
#[derive(Debug, Clone)]
pub struct ReconciliationWorkerState {
    phase: watch::Receiver<ReconciliationPhase>,
    done: Arc<AtomicU64>,
}

impl ReconciliationWorkerState {
    pub fn phase(&self) -> ReconciliationPhase {
        *self.phase.borrow()
    }

    /// Number of rows this worker copied and deleted.
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Acquire)
    }

    /// Waits until the worker enters `phase`. Returns immediately if it already is there.
    pub async fn wait_for_phase(&self, phase: ReconciliationPhase) {
        let mut rx = self.phase.clone();
        let _ = rx.wait_for(|current| *current == phase).await;
    }

    /// Resolves once the worker task has exited, whether it returned or panicked.
    pub async fn exited(&self) {
        let mut rx = self.phase.clone();
        while rx.changed().await.is_ok() {}
    }
}

/// Handle of a running [`ReconciliationWorker`].
#[derive(Debug)]
pub struct ReconciliationWorkerHandle {
    table: Arc<str>,
    state: ReconciliationWorkerState,
    continue_flag: ContinueFlag,
    handle: Option<JoinHandle<LoadCheckResult<()>>>,
}

impl ReconciliationWorkerHandle {
    /// Asks the worker to exit at its next checkpoint. Queued ids are abandoned.
    pub fn stop(&self) {
        self.continue_flag.clear();
    }

    pub(crate) fn continue_flag(&self) -> &ContinueFlag {
        &self.continue_flag
    }
}

impl WorkerHandle<ReconciliationWorkerState> for ReconciliationWorkerHandle {
    fn state(&self) -> ReconciliationWorkerState {
        self.state.clone()
    }

    async fn wait(mut self) -> LoadCheckResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            loadcheck_error!(
                ErrorKind::ReconciliationWorkerPanic,
                "Reconciliation worker panicked",
                format!("Worker of table '{}' failed: {err}", self.table)
            )
        })?
    }
}

/// Companion of a load driver: copies queued rows and deletes them from both tables.
#[derive(Debug)]
pub struct ReconciliationWorker<B> {
    backend: B,
    context: PairContext,
    partitioning: Partitioning,
    queue: CopyQueueRx,
    config: ReconciliationConfig,
}

impl<B> ReconciliationWorker<B> {
    pub fn new(
        backend: B,
        context: PairContext,
        partitioning: Partitioning,
        queue: CopyQueueRx,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            backend,
            context,
            partitioning,
            queue,
            config,
        }
    }
}

impl<B> Worker<ReconciliationWorkerHandle, ReconciliationWorkerState> for ReconciliationWorker<B>
where
    B: Backend + Send + Sync + 'static,
{
    type Error = LoadCheckError;

    async fn start(self) -> Result<ReconciliationWorkerHandle, Self::Error> {
        let table = self.context.table().clone();
        let worker_type = WorkerType::Reconciliation {
            table: table.clone(),
        };
        info!(%worker_type, "starting reconciliation worker");

        let (phase_tx, phase_rx) = watch::channel(ReconciliationPhase::Idle);
        let done = Arc::new(AtomicU64::new(0));
        let continue_flag = ContinueFlag::new();

        let state = ReconciliationWorkerState {
            phase: phase_rx,
            done: done.clone(),
        };

        let reconciliation_loop = ReconciliationLoop {
            worker: self,
            phase: phase_tx,
            done,
            continue_flag: continue_flag.clone(),
            ids: Vec::with_capacity(MAX_DRAIN_BATCH),
        };

        let span = info_span!("reconciliation_worker", table = %table);
        let handle = tokio::spawn(reconciliation_loop.run().instrument(span));

        Ok(ReconciliationWorkerHandle {
            table,
            state,
            continue_flag,
            handle: Some(handle),
        })
    }
}

struct ReconciliationLoop<B> {
    worker: ReconciliationWorker<B>,
    phase: watch::Sender<ReconciliationPhase>,
    done: Arc<AtomicU64>,
    continue_flag: ContinueFlag,
    ids: Vec<i64>,
}

impl<B> ReconciliationLoop<B>
where
    B: Backend,
{
    async fn run(mut self) -> LoadCheckResult<()> {
        let result = self.run_cycles().await;
        self.set_phase(ReconciliationPhase::Idle);

        info!(done = self.done.load(Ordering::Acquire), "reconciliation worker stopped");

        result
    }

    async fn run_cycles(&mut self) -> LoadCheckResult<()> {
        while self.should_continue() {
            self.set_phase(ReconciliationPhase::Draining);
            self.ids.clear();
            let drained = self
                .worker
                .queue
                .drain_into(&mut self.ids, MAX_DRAIN_BATCH);

            if drained == 0 {
                self.set_phase(ReconciliationPhase::Idle);
                sleep_until_cancelled(
                    self.worker.config.idle_interval(),
                    &self.continue_flag,
                    self.worker.context.coordinator(),
                )
                .await;
                continue;
            }

            loadcheck_fail_point(RECONCILIATION__BEFORE_COPY)?;

            self.set_phase(ReconciliationPhase::CopyPending);
            self.copy_batch()?.wait().await;

            // Copied rows are always deleted, even when a stop was requested meanwhile, so that
            // every counted copy has its terminating delete.
            self.set_phase(ReconciliationPhase::DeletePending);
            let (barrier, accepted) = self.delete_batch()?;
            barrier.wait().await;

            self.worker.context.stats().record_copy_deletes(accepted);
            let done = self.done.fetch_add(accepted, Ordering::AcqRel) + accepted;
            debug!(drained, accepted, done, "reconciliation cycle finished");
        }

        Ok(())
    }

    fn copy_batch(&self) -> LoadCheckResult<BatchBarrier> {
        let context = &self.worker.context;
        let barrier = BatchBarrier::new();

        for &id in &self.ids {
            let call = ProcedureCall::Copy {
                table: context.table().clone(),
                id,
                partitioning: self.worker.partitioning,
            };
            let callback = CopyCallback::new(context.clone(), id, barrier.arrival());

            if !self.worker.backend.call_procedure(call, Box::new(callback))? {
                warn!(row_id = id, "copy call rejected by the backend");
            }
        }

        Ok(barrier)
    }

    fn delete_batch(&self) -> LoadCheckResult<(BatchBarrier, u64)> {
        let context = &self.worker.context;
        let barrier = BatchBarrier::new();
        let mut accepted = 0;

        for &id in &self.ids {
            let call = ProcedureCall::terminating_delete(
                context.table().clone(),
                id,
                self.worker.partitioning,
                Destiny::CopyThenDelete,
            );
            let callback = DeleteCallback::new(
                context.clone(),
                id,
                Destiny::CopyThenDelete,
                barrier.arrival(),
            );

            if self.worker.backend.call_procedure(call, Box::new(callback))? {
                accepted += 1;
            } else {
                warn!(row_id = id, "delete call rejected by the backend");
            }
        }

        Ok((barrier, accepted))
    }

    fn should_continue(&self) -> bool {
        self.continue_flag.is_set() && !self.worker.context.coordinator().is_stopped()
    }

    fn set_phase(&self, phase: ReconciliationPhase) {
        let changed = self.phase.send_if_modified(|current| {
            if *current == phase {
                return false;
            }

            *current = phase;
            true
        });

        if changed {
            trace!(phase = phase.as_str(), "reconciliation phase changed");
        }
    }
}
