//! Classification of asynchronous procedure responses.
//!
//! Every submitted call carries one of the callbacks below. A callback turns the backend's
//! [`ClientResponse`] into an [`Outcome`], applies the failure policy to the owning pair and then
//! releases its batch barrier arrival. Classification always happens before the arrival is
//! released, so a task woken by the barrier observes the flags its batch produced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use metrics::counter;
use tracing::{debug, error, warn};

use crate::backend::{ClientResponse, ProcedureCallback, ProcedureKind, ResponseStatus};
use crate::concurrency::admission::AdmissionPermit;
use crate::concurrency::barrier::BarrierArrival;
use crate::concurrency::shutdown::{ContinueFlag, ShutdownCoordinator};
use crate::error::{ErrorKind, LoadCheckError};
use crate::loadcheck_error;
use crate::metrics::{
    ERROR_KIND_LABEL, LOADCHECK_CALL_FAILURES_TOTAL, LOADCHECK_PAIR_FAILURES_TOTAL,
    LOADCHECK_ROWS_RECONCILED_TOTAL, OPERATION_LABEL, TABLE_NAME_LABEL,
};
use crate::types::Destiny;
use crate::workers::policy::{FailureAction, build_failure_policy};

/// Classified result of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The pair that issued the call must stop.
    Degraded,
    /// Every pair must stop and the run fails.
    Fatal,
}

impl Outcome {
    pub fn from_status(status: ResponseStatus) -> Self {
        match status {
            ResponseStatus::Success => Outcome::Success,
            ResponseStatus::GracefulFailure => Outcome::Fatal,
            ResponseStatus::UserAbort
            | ResponseStatus::UnexpectedFailure
            | ResponseStatus::ConnectionLost => Outcome::Degraded,
        }
    }
}

/// Lock-free counters of a driver/worker pair.
#[derive(Debug, Default)]
pub struct PairStats {
    rows_submitted: AtomicU64,
    rows_rejected: AtomicU64,
    copy_routed: AtomicU64,
    direct_routed: AtomicU64,
    /// Incremented by every copy callback, whatever its status. It counts attempted
    /// reconciliations, not confirmed ones.
    reconciled: AtomicU64,
    direct_deleted: AtomicU64,
    copy_delete_done: AtomicU64,
}

/// Point-in-time copy of [`PairStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairStatsSnapshot {
    pub rows_submitted: u64,
    pub rows_rejected: u64,
    pub copy_routed: u64,
    pub direct_routed: u64,
    pub reconciled: u64,
    pub direct_deleted: u64,
    pub copy_delete_done: u64,
}

impl PairStats {
    pub fn reconciled(&self) -> u64 {
        self.reconciled.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> PairStatsSnapshot {
        PairStatsSnapshot {
            rows_submitted: self.rows_submitted.load(Ordering::Acquire),
            rows_rejected: self.rows_rejected.load(Ordering::Acquire),
            copy_routed: self.copy_routed.load(Ordering::Acquire),
            direct_routed: self.direct_routed.load(Ordering::Acquire),
            reconciled: self.reconciled.load(Ordering::Acquire),
            direct_deleted: self.direct_deleted.load(Ordering::Acquire),
            copy_delete_done: self.copy_delete_done.load(Ordering::Acquire),
        }
    }

    pub(crate) fn record_submitted(&self, destiny: Destiny) {
        self.rows_submitted.fetch_add(1, Ordering::AcqRel);
        match destiny {
            Destiny::CopyThenDelete => self.copy_routed.fetch_add(1, Ordering::AcqRel),
            Destiny::DirectDelete => self.direct_routed.fetch_add(1, Ordering::AcqRel),
        };
    }

    pub(crate) fn record_rejected(&self) {
        self.rows_rejected.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_direct_deletes(&self, count: u64) {
        self.direct_deleted.fetch_add(count, Ordering::AcqRel);
    }

    pub(crate) fn record_copy_deletes(&self, count: u64) {
        self.copy_delete_done.fetch_add(count, Ordering::AcqRel);
    }

    fn record_reconciled(&self) {
        self.reconciled.fetch_add(1, Ordering::AcqRel);
    }
}

/// State shared by a pair and the callbacks of its calls.
#[derive(Debug, Clone)]
pub struct PairContext {
    table: Arc<str>,
    continue_flag: ContinueFlag,
    coordinator: ShutdownCoordinator,
    stats: Arc<PairStats>,
    failure: Arc<OnceLock<LoadCheckError>>,
}

impl PairContext {
    pub fn new(table: Arc<str>, coordinator: ShutdownCoordinator) -> Self {
        Self {
            table,
            continue_flag: ContinueFlag::new(),
            coordinator,
            stats: Arc::new(PairStats::default()),
            failure: Arc::new(OnceLock::new()),
        }
    }

    pub fn table(&self) -> &Arc<str> {
        &self.table
    }

    pub fn continue_flag(&self) -> &ContinueFlag {
        &self.continue_flag
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    pub fn stats(&self) -> &Arc<PairStats> {
        &self.stats
    }

    /// Returns `true` once the pair was degraded or the coordinator stopped.
    pub fn should_stop(&self) -> bool {
        !self.continue_flag.is_set() || self.coordinator.is_stopped()
    }

    /// Returns the first failure that degraded this pair.
    pub fn failure(&self) -> Option<LoadCheckError> {
        self.failure.get().cloned()
    }

    /// Applies the failure policy of `error` to this pair.
    pub fn escalate(&self, error: LoadCheckError) {
        let policy = build_failure_policy(&error);
        counter!(
            LOADCHECK_PAIR_FAILURES_TOTAL,
            TABLE_NAME_LABEL => self.table.to_string(),
            ERROR_KIND_LABEL => format!("{:?}", error.kind())
        )
        .increment(1);

        match policy.action() {
            FailureAction::AbortProcess => {
                error!(
                    table = %self.table,
                    error = %error,
                    action = policy.action().as_str(),
                    solution = policy.solution().unwrap_or_default(),
                    "fatal failure, aborting every pair"
                );
                self.coordinator.abort(error);
            }
            FailureAction::StopPair => {
                let _ = self.failure.set(error.clone());
                if self.continue_flag.clear() {
                    warn!(
                        table = %self.table,
                        error = %error,
                        action = policy.action().as_str(),
                        "pair degraded, stopping it"
                    );
                }
            }
            FailureAction::StopThread => {
                error!(
                    table = %self.table,
                    error = %error,
                    action = policy.action().as_str(),
                    "unhandled failure"
                );
            }
        }
    }

    /// Classifies `response` and escalates non successful outcomes.
    fn classify(&self, kind: ProcedureKind, row_id: i64, response: &ClientResponse) -> Outcome {
        let outcome = Outcome::from_status(response.status);
        if outcome == Outcome::Success {
            return outcome;
        }

        counter!(
            LOADCHECK_CALL_FAILURES_TOTAL,
            TABLE_NAME_LABEL => self.table.to_string(),
            OPERATION_LABEL => kind.as_str()
        )
        .increment(1);

        let error_kind = match outcome {
            Outcome::Fatal => ErrorKind::GracefulApplicationFailure,
            _ => ErrorKind::UngracefulApplicationFailure,
        };
        self.escalate(loadcheck_error!(
            error_kind,
            "Procedure call failed",
            format!(
                "{} of row {row_id} in table '{}' returned {response}",
                kind.as_str(),
                self.table
            )
        ));

        outcome
    }
}

/// Callback of a row insert. Holds the row's admission permit until it completes.
pub struct InsertCallback {
    context: PairContext,
    row_id: i64,
    _permit: AdmissionPermit,
    _arrival: BarrierArrival,
}

impl InsertCallback {
    pub fn new(
        context: PairContext,
        row_id: i64,
        permit: AdmissionPermit,
        arrival: BarrierArrival,
    ) -> Self {
        Self {
            context,
            row_id,
            _permit: permit,
            _arrival: arrival,
        }
    }
}

impl ProcedureCallback for InsertCallback {
    fn on_response(self: Box<Self>, response: ClientResponse) {
        self.context
            .classify(ProcedureKind::Load, self.row_id, &response);
    }
}

/// Callback of a copy into the copy table.
pub struct CopyCallback {
    context: PairContext,
    row_id: i64,
    _arrival: BarrierArrival,
}

impl CopyCallback {
    pub fn new(context: PairContext, row_id: i64, arrival: BarrierArrival) -> Self {
        Self {
            context,
            row_id,
            _arrival: arrival,
        }
    }
}

impl ProcedureCallback for CopyCallback {
    fn on_response(self: Box<Self>, response: ClientResponse) {
        self.context
            .classify(ProcedureKind::Copy, self.row_id, &response);

        self.context.stats.record_reconciled();
        counter!(
            LOADCHECK_ROWS_RECONCILED_TOTAL,
            TABLE_NAME_LABEL => self.context.table.to_string()
        )
        .increment(1);
    }
}

/// Callback of a terminating delete. Verifies the affected row count of the row's destiny.
pub struct DeleteCallback {
    context: PairContext,
    row_id: i64,
    destiny: Destiny,
    _arrival: BarrierArrival,
}

impl DeleteCallback {
    pub fn new(
        context: PairContext,
        row_id: i64,
        destiny: Destiny,
        arrival: BarrierArrival,
    ) -> Self {
        Self {
            context,
            row_id,
            destiny,
            _arrival: arrival,
        }
    }
}

impl ProcedureCallback for DeleteCallback {
    fn on_response(self: Box<Self>, response: ClientResponse) {
        let kind = match self.destiny {
            Destiny::CopyThenDelete => ProcedureKind::Delete,
            Destiny::DirectDelete => ProcedureKind::DeleteOnly,
        };
        self.context.classify(kind, self.row_id, &response);

        let expected = self.destiny.expected_delete_count();
        if response.scalar == Some(expected) {
            debug!(table = %self.context.table, row_id = self.row_id, "row reconciled");
            return;
        }

        let reported = response
            .scalar
            .map_or_else(|| "no count".to_string(), |count| count.to_string());
        self.context.escalate(loadcheck_error!(
            ErrorKind::RowCountMismatch,
            "Unexpected affected row count",
            format!(
                "{} of row {} in table '{}' expected {expected} affected rows, got {reported}",
                kind.as_str(),
                self.row_id,
                self.context.table
            )
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::admission::AdmissionGate;
    use crate::concurrency::barrier::BatchBarrier;

    fn context() -> PairContext {
        PairContext::new(Arc::from("loadp"), ShutdownCoordinator::new())
    }

    #[test]
    fn statuses_are_classified() {
        assert_eq!(
            Outcome::from_status(ResponseStatus::Success),
            Outcome::Success
        );
        assert_eq!(
            Outcome::from_status(ResponseStatus::GracefulFailure),
            Outcome::Fatal
        );
        for status in [
            ResponseStatus::UserAbort,
            ResponseStatus::UnexpectedFailure,
            ResponseStatus::ConnectionLost,
        ] {
            assert_eq!(Outcome::from_status(status), Outcome::Degraded);
        }
    }

    #[tokio::test]
    async fn insert_callback_releases_permit_and_arrival() {
        let context = context();
        let gate = AdmissionGate::new(1);
        let barrier = BatchBarrier::new();

        let callback = Box::new(InsertCallback::new(
            context.clone(),
            1,
            gate.acquire().await.unwrap(),
            barrier.arrival(),
        ));
        assert_eq!(gate.available(), 0);
        assert_eq!(barrier.pending(), 1);

        callback.on_response(ClientResponse::success());

        assert_eq!(gate.available(), 1);
        assert_eq!(barrier.pending(), 0);
        assert!(!context.should_stop());
    }

    #[tokio::test]
    async fn dropped_insert_callback_releases_permit_and_arrival() {
        let gate = AdmissionGate::new(1);
        let barrier = BatchBarrier::new();

        let callback = InsertCallback::new(
            context(),
            1,
            gate.acquire().await.unwrap(),
            barrier.arrival(),
        );
        drop(callback);

        assert_eq!(gate.available(), 1);
        assert_eq!(barrier.pending(), 0);
    }

    #[tokio::test]
    async fn graceful_insert_failure_aborts_every_pair() {
        let context = context();
        let gate = AdmissionGate::new(1);
        let barrier = BatchBarrier::new();

        Box::new(InsertCallback::new(
            context.clone(),
            1,
            gate.acquire().await.unwrap(),
            barrier.arrival(),
        ))
        .on_response(ClientResponse::failure(
            ResponseStatus::GracefulFailure,
            "duplicate key",
        ));

        let fatal = context.coordinator().fatal_error().unwrap();
        assert_eq!(fatal.kind(), ErrorKind::GracefulApplicationFailure);
        assert!(context.should_stop());
        assert!(context.failure().is_none());
    }

    #[test]
    fn copy_callback_counts_every_outcome() {
        let context = context();
        let barrier = BatchBarrier::new();

        Box::new(CopyCallback::new(context.clone(), 1, barrier.arrival()))
            .on_response(ClientResponse::affected_rows(1));
        Box::new(CopyCallback::new(context.clone(), 2, barrier.arrival())).on_response(
            ClientResponse::failure(ResponseStatus::UnexpectedFailure, "lost"),
        );

        assert_eq!(context.stats().reconciled(), 2);
        assert_eq!(
            context.failure().unwrap().kind(),
            ErrorKind::UngracefulApplicationFailure
        );
        assert!(!context.continue_flag().is_set());
        assert!(!context.coordinator().is_stopped());
    }

    #[test]
    fn delete_callback_accepts_expected_counts() {
        let context = context();
        let barrier = BatchBarrier::new();

        Box::new(DeleteCallback::new(
            context.clone(),
            1,
            Destiny::CopyThenDelete,
            barrier.arrival(),
        ))
        .on_response(ClientResponse::affected_rows(2));
        Box::new(DeleteCallback::new(
            context.clone(),
            2,
            Destiny::DirectDelete,
            barrier.arrival(),
        ))
        .on_response(ClientResponse::affected_rows(1));

        assert!(!context.should_stop());
        assert_eq!(barrier.pending(), 0);
    }

    #[test]
    fn delete_callback_degrades_on_mismatch() {
        let context = context();
        let barrier = BatchBarrier::new();

        Box::new(DeleteCallback::new(
            context.clone(),
            7,
            Destiny::CopyThenDelete,
            barrier.arrival(),
        ))
        .on_response(ClientResponse::affected_rows(1));

        let failure = context.failure().unwrap();
        assert_eq!(failure.kind(), ErrorKind::RowCountMismatch);
        assert!(failure.detail().unwrap().contains("expected 2 affected rows, got 1"));
        assert!(!context.continue_flag().is_set());
    }

    #[test]
    fn delete_callback_degrades_on_missing_count() {
        let context = context();
        let barrier = BatchBarrier::new();

        Box::new(DeleteCallback::new(
            context.clone(),
            7,
            Destiny::DirectDelete,
            barrier.arrival(),
        ))
        .on_response(ClientResponse::success());

        assert_eq!(context.failure().unwrap().kind(), ErrorKind::RowCountMismatch);
    }
}
