use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::LoadCheckResult;

/// The two kinds of tasks a monitored table runs.
#[derive(Debug, Clone)]
pub enum WorkerType {
    /// Submits rows and flushes direct deletes.
    LoadDriver { table: Arc<str> },
    /// Copies and deletes queued rows.
    Reconciliation { table: Arc<str> },
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerType::LoadDriver { table } => write!(f, "load_driver({table})"),
            WorkerType::Reconciliation { table } => write!(f, "reconciliation({table})"),
        }
    }
}

/// A background task of the harness.
///
/// `H` is the handle returned once the worker is running and `S` the state observable through
/// it.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error returned when the worker cannot be started.
    type Error;

    /// Spawns the worker and returns its handle without waiting for it to finish.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// Handle of a running worker.
pub trait WorkerHandle<S> {
    /// Returns a snapshot handle of the worker's state. It stays valid after the worker exits.
    fn state(&self) -> S;

    /// Waits for the worker to exit and returns its result.
    fn wait(self) -> impl Future<Output = LoadCheckResult<()>> + Send;
}
