use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::{
    Backend, ClientResponse, ProcedureCall, ProcedureCallback, ProcedureKind, ResponseStatus,
    RoutingKey, ScalarQuery,
};
use crate::error::{ErrorKind, LoadCheckResult};
use crate::loadcheck_error;

/// Fault injected into matching calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// The call is not executed; its callback receives this status.
    Status(ResponseStatus),
    /// The call is executed; a successful response reports this affected row count instead.
    AffectedRows(i64),
    /// The call is rejected and its callback dropped.
    Reject,
    /// Submission fails with an error.
    Error,
}

/// Which calls a fault applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultConfig {
    pub kind: ProcedureKind,
    pub fault: FaultType,
    /// Restricts the fault to one table.
    pub table: Option<String>,
    /// Number of matching calls that pass through before the fault applies.
    pub skip: usize,
}

impl FaultConfig {
    pub fn new(kind: ProcedureKind, fault: FaultType) -> Self {
        Self {
            kind,
            fault,
            table: None,
            skip: 0,
        }
    }

    pub fn for_table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    pub fn after(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    fn matches(&self, call: &ProcedureCall) -> bool {
        call.kind() == self.kind
            && self
                .table
                .as_deref()
                .is_none_or(|table| table == call.table().as_ref())
    }
}

#[derive(Debug)]
struct ActiveFault {
    config: FaultConfig,
    seen: usize,
}

/// Backend wrapper injecting faults into selected calls.
#[derive(Debug, Clone)]
pub struct FaultInjectingBackend<B> {
    wrapped: B,
    faults: Arc<Mutex<Vec<ActiveFault>>>,
}

impl<B> FaultInjectingBackend<B> {
    pub fn wrap(backend: B, faults: Vec<FaultConfig>) -> Self {
        let faults = faults
            .into_iter()
            .map(|config| ActiveFault { config, seen: 0 })
            .collect();

        Self {
            wrapped: backend,
            faults: Arc::new(Mutex::new(faults)),
        }
    }

    pub fn inner(&self) -> &B {
        &self.wrapped
    }

    fn fault_for(&self, call: &ProcedureCall) -> Option<FaultType> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let active = faults
            .iter_mut()
            .find(|active| active.config.matches(call))?;

        active.seen += 1;
        (active.seen > active.config.skip).then_some(active.config.fault)
    }
}

struct OverrideAffectedRows {
    affected: i64,
    callback: Box<dyn ProcedureCallback>,
}

impl ProcedureCallback for OverrideAffectedRows {
    fn on_response(self: Box<Self>, mut response: ClientResponse) {
        if response.is_success() {
            response.scalar = Some(self.affected);
        }

        self.callback.on_response(response);
    }
}

impl<B> Backend for FaultInjectingBackend<B>
where
    B: Backend + Send + Sync,
{
    fn name() -> &'static str {
        B::name()
    }

    fn call_procedure(
        &self,
        call: ProcedureCall,
        callback: Box<dyn ProcedureCallback>,
    ) -> LoadCheckResult<bool> {
        match self.fault_for(&call) {
            None => self.wrapped.call_procedure(call, callback),
            Some(FaultType::Status(status)) => {
                let detail = format!("injected {} for {}", status.as_str(), call.procedure_name());
                tokio::spawn(async move {
                    callback.on_response(ClientResponse::failure(status, detail));
                });

                Ok(true)
            }
            Some(FaultType::AffectedRows(affected)) => self.wrapped.call_procedure(
                call,
                Box::new(OverrideAffectedRows { affected, callback }),
            ),
            Some(FaultType::Reject) => Ok(false),
            Some(FaultType::Error) => Err(loadcheck_error!(
                ErrorKind::BackendCallFailed,
                "Injected submission failure",
                call.procedure_name()
            )),
        }
    }

    async fn query_scalar(&self, query: ScalarQuery) -> LoadCheckResult<i64> {
        self.wrapped.query_scalar(query).await
    }

    fn routing_key_of(&self, value: i64) -> RoutingKey {
        self.wrapped.routing_key_of(value)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::types::Row;

    struct SendBack(oneshot::Sender<ClientResponse>);

    impl ProcedureCallback for SendBack {
        fn on_response(self: Box<Self>, response: ClientResponse) {
            let _ = self.0.send(response);
        }
    }

    fn load(table: &str, id: i64) -> ProcedureCall {
        ProcedureCall::Load {
            table: Arc::from(table),
            row: Row::new(id),
            routing_key: None,
        }
    }

    #[tokio::test]
    async fn faults_apply_after_skipped_calls_on_their_table() {
        let backend = FaultInjectingBackend::wrap(
            MemoryBackend::new(),
            vec![
                FaultConfig::new(
                    ProcedureKind::Load,
                    FaultType::Status(ResponseStatus::UnexpectedFailure),
                )
                .for_table("alpha")
                .after(1),
            ],
        );

        let mut statuses = Vec::new();
        for (table, id) in [("alpha", 1), ("beta", 2), ("alpha", 3)] {
            let (tx, rx) = oneshot::channel();
            assert!(backend.call_procedure(load(table, id), Box::new(SendBack(tx))).unwrap());
            statuses.push(rx.await.unwrap().status);
        }

        assert_eq!(
            statuses,
            vec![
                ResponseStatus::Success,
                ResponseStatus::Success,
                ResponseStatus::UnexpectedFailure
            ]
        );
        assert!(!backend.inner().contains_row("alpha", 3).await);
    }

    #[tokio::test]
    async fn reject_and_error_faults() {
        let backend = FaultInjectingBackend::wrap(
            MemoryBackend::new(),
            vec![FaultConfig::new(ProcedureKind::Load, FaultType::Reject)],
        );
        let (tx, rx) = oneshot::channel();
        assert!(!backend.call_procedure(load("alpha", 1), Box::new(SendBack(tx))).unwrap());
        assert!(rx.await.is_err());

        let backend = FaultInjectingBackend::wrap(
            MemoryBackend::new(),
            vec![FaultConfig::new(ProcedureKind::Load, FaultType::Error)],
        );
        let (tx, _rx) = oneshot::channel();
        let err = backend
            .call_procedure(load("alpha", 1), Box::new(SendBack(tx)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendCallFailed);
    }
}
