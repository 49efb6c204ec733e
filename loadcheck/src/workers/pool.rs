use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::LoadCheckResult;
use crate::workers::base::WorkerHandle;
use crate::workers::load_driver::{LoadDriverHandle, LoadDriverState};

/// Set of running driver/worker pairs, keyed by table name.
#[derive(Debug, Clone, Default)]
pub struct PairPool {
    states: Arc<RwLock<HashMap<Arc<str>, LoadDriverState>>>,
    join_set: Arc<Mutex<JoinSet<(Arc<str>, LoadCheckResult<()>)>>>,
}

impl PairPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a started driver until it exits.
    pub async fn spawn(&self, handle: LoadDriverHandle) {
        let state = handle.state();
        let table = state.table().clone();

        if let Ok(mut states) = self.states.write() {
            states.insert(table.clone(), state);
        }

        let mut join_set = self.join_set.lock().await;
        join_set.spawn(async move {
            let result = handle.wait().await;
            (table, result)
        });
    }

    /// Returns the state of the pair monitoring `table`.
    pub fn state(&self, table: &str) -> Option<LoadDriverState> {
        self.states.read().ok()?.get(table).cloned()
    }

    /// Waits for every pair to exit and aggregates their errors.
    ///
    /// A pair that fails does not stop the others; its error is logged as soon as it exits.
    pub async fn wait_all(&self) -> LoadCheckResult<()> {
        let mut errors = Vec::new();

        loop {
            let result = {
                let mut join_set = self.join_set.lock().await;
                join_set.join_next().await
            };

            let Some(result) = result else {
                break;
            };

            match result {
                Ok((table, Ok(()))) => {
                    info!(%table, "pair finished");
                }
                Ok((table, Err(err))) => {
                    error!(%table, error = %err, "pair finished with error");
                    errors.push(err);
                }
                Err(join_err) => {
                    // Driver panics are caught by the handle, so only cancellation lands here.
                    debug!(error = %join_err, "pair task was cancelled");
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}
