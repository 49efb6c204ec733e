use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::backend::{
    Backend, ClientResponse, ProcedureCall, ProcedureCallback, ProcedureKind, RoutingKey,
    ScalarQuery,
};
use crate::error::LoadCheckResult;
use crate::test_utils::notify::TimedNotify;

/// A call together with the response its callback received.
#[derive(Debug, Clone)]
pub struct RecordedResponse {
    pub call: ProcedureCall,
    pub response: ClientResponse,
}

type ResponseCondition = Box<dyn Fn(&[RecordedResponse]) -> bool + Send + Sync>;

#[derive(Default)]
struct Inner {
    calls: Vec<ProcedureCall>,
    responses: Vec<RecordedResponse>,
    conditions: Vec<(ResponseCondition, Arc<Notify>)>,
}

impl Inner {
    fn check_conditions(&mut self) {
        let responses = &self.responses;
        self.conditions.retain(|(condition, notify)| {
            let satisfied = condition(responses);
            if satisfied {
                notify.notify_one();
            }

            !satisfied
        });
    }
}

/// Backend wrapper recording every accepted call and every delivered response.
///
/// Tests register conditions on the recorded responses and wait for them through a
/// [`TimedNotify`].
#[derive(Clone)]
pub struct TestBackendWrapper<B> {
    wrapped: B,
    inner: Arc<Mutex<Inner>>,
}

impl<B: fmt::Debug> fmt::Debug for TestBackendWrapper<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("TestBackendWrapper")
            .field("wrapped", &self.wrapped)
            .field("calls", &inner.calls.len())
            .field("responses", &inner.responses.len())
            .finish()
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B> TestBackendWrapper<B> {
    pub fn wrap(backend: B) -> Self {
        Self {
            wrapped: backend,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Returns the wrapped backend.
    pub fn inner(&self) -> &B {
        &self.wrapped
    }

    /// Returns every accepted call in submission order.
    pub fn calls(&self) -> Vec<ProcedureCall> {
        lock(&self.inner).calls.clone()
    }

    /// Returns every delivered response with its call, in delivery order.
    pub fn responses(&self) -> Vec<RecordedResponse> {
        lock(&self.inner).responses.clone()
    }

    pub fn calls_of(&self, kind: ProcedureKind) -> Vec<ProcedureCall> {
        lock(&self.inner)
            .calls
            .iter()
            .filter(|call| call.kind() == kind)
            .cloned()
            .collect()
    }

    /// Returns the responses delivered for calls of `kind`, in delivery order.
    pub fn responses_of(&self, kind: ProcedureKind) -> Vec<ClientResponse> {
        lock(&self.inner)
            .responses
            .iter()
            .filter(|recorded| recorded.call.kind() == kind)
            .map(|recorded| recorded.response.clone())
            .collect()
    }

    /// Registers a condition on the delivered responses.
    ///
    /// The returned notify fires once the condition holds, possibly right away.
    pub fn notify_on_responses<F>(&self, condition: F) -> TimedNotify
    where
        F: Fn(&[RecordedResponse]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = lock(&self.inner);
        inner.conditions.push((Box::new(condition), notify.clone()));
        inner.check_conditions();

        TimedNotify::new(notify)
    }

    /// Fires once at least `count` responses for calls of `kind` were delivered.
    pub fn wait_for_responses(&self, kind: ProcedureKind, count: usize) -> TimedNotify {
        self.notify_on_responses(move |responses| {
            responses
                .iter()
                .filter(|recorded| recorded.call.kind() == kind)
                .count()
                >= count
        })
    }

    /// Fires once at least `count` responses for calls of `kind` on `table` were delivered.
    pub fn wait_for_table_responses(
        &self,
        table: &str,
        kind: ProcedureKind,
        count: usize,
    ) -> TimedNotify {
        let table = table.to_string();
        self.notify_on_responses(move |responses| {
            responses
                .iter()
                .filter(|recorded| {
                    recorded.call.kind() == kind && recorded.call.table().as_ref() == table
                })
                .count()
                >= count
        })
    }
}

struct RecordingCallback {
    call: ProcedureCall,
    inner: Arc<Mutex<Inner>>,
    callback: Box<dyn ProcedureCallback>,
}

impl ProcedureCallback for RecordingCallback {
    fn on_response(self: Box<Self>, response: ClientResponse) {
        let RecordingCallback {
            call,
            inner,
            callback,
        } = *self;

        {
            let mut inner = lock(&inner);
            inner.responses.push(RecordedResponse {
                call,
                response: response.clone(),
            });
            inner.check_conditions();
        }

        callback.on_response(response);
    }
}

impl<B> Backend for TestBackendWrapper<B>
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
        let recording = RecordingCallback {
            call: call.clone(),
            inner: self.inner.clone(),
            callback,
        };

        // Recorded up front, so a test woken by the response always sees the call.
        lock(&self.inner).calls.push(call.clone());

        let result = self.wrapped.call_procedure(call.clone(), Box::new(recording));
        if !matches!(result, Ok(true)) {
            let mut inner = lock(&self.inner);
            if let Some(position) = inner.calls.iter().rposition(|recorded| *recorded == call) {
                inner.calls.remove(position);
            }
        }

        result
    }

    async fn query_scalar(&self, query: ScalarQuery) -> LoadCheckResult<i64> {
        self.wrapped.query_scalar(query).await
    }

    fn routing_key_of(&self, value: i64) -> RoutingKey {
        self.wrapped.routing_key_of(value)
    }
}
