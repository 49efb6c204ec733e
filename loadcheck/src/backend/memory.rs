use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use loadcheck_config::shared::MemoryBackendConfig;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

use crate::backend::{
    Backend, ClientResponse, ProcedureCall, ProcedureCallback, ResponseStatus, ScalarQuery,
};
use crate::error::{ErrorKind, LoadCheckResult};
use crate::loadcheck_error;
use crate::types::Row;

#[derive(Debug, Default)]
struct MemoryTable {
    rows: HashMap<i64, Row>,
    copies: HashMap<i64, Row>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, MemoryTable>,
}

impl Inner {
    fn table_mut(&mut self, name: &str) -> &mut MemoryTable {
        self.tables.entry(name.to_string()).or_default()
    }

    fn apply(&mut self, call: &ProcedureCall) -> ClientResponse {
        let table = self.table_mut(call.table());

        match call {
            ProcedureCall::Load { row, .. } => {
                if table.rows.contains_key(&row.id) {
                    return ClientResponse::failure(
                        ResponseStatus::GracefulFailure,
                        format!("duplicate key value for cid {}", row.id),
                    );
                }

                table.rows.insert(row.id, *row);
                ClientResponse::affected_rows(1)
            }
            ProcedureCall::Copy { id, .. } => match table.rows.get(id) {
                Some(row) => {
                    table.copies.insert(*id, *row);
                    ClientResponse::affected_rows(1)
                }
                None => ClientResponse::affected_rows(0),
            },
            ProcedureCall::Delete { id, .. } => {
                let deleted = i64::from(table.rows.remove(id).is_some())
                    + i64::from(table.copies.remove(id).is_some());
                ClientResponse::affected_rows(deleted)
            }
            ProcedureCall::DeleteOnly { id, .. } => {
                ClientResponse::affected_rows(i64::from(table.rows.remove(id).is_some()))
            }
        }
    }
}

/// In-process backend keeping a load table and a copy table per table name.
///
/// Responses are delivered from spawned tasks after the configured latency. Calls beyond the
/// outstanding call limit are rejected.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
    outstanding: Arc<Semaphore>,
    latency: Duration,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_config(&MemoryBackendConfig::default())
    }

    pub fn with_config(config: &MemoryBackendConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            outstanding: Arc::new(Semaphore::new(config.max_outstanding_calls)),
            latency: Duration::from_millis(config.latency_ms),
        }
    }

    /// Inserts `row` into the load table of `table` directly, bypassing procedure calls.
    pub async fn insert_row(&self, table: &str, row: Row) {
        let mut inner = self.inner.lock().await;
        inner.table_mut(table).rows.insert(row.id, row);
    }

    /// Returns the number of rows in the load table of `table`.
    pub async fn row_count(&self, table: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.tables.get(table).map_or(0, |table| table.rows.len())
    }

    /// Returns the number of rows in the copy table of `table`.
    pub async fn copy_row_count(&self, table: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.tables.get(table).map_or(0, |table| table.copies.len())
    }

    /// Returns whether the row `id` is present in the load table of `table`.
    pub async fn contains_row(&self, table: &str, id: i64) -> bool {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table)
            .is_some_and(|table| table.rows.contains_key(&id))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn name() -> &'static str {
        "memory"
    }

    fn call_procedure(
        &self,
        call: ProcedureCall,
        callback: Box<dyn ProcedureCallback>,
    ) -> LoadCheckResult<bool> {
        let runtime = Handle::try_current().map_err(|err| {
            loadcheck_error!(
                ErrorKind::BackendCallFailed,
                "Memory backend calls require a tokio runtime",
                source: err
            )
        })?;

        let Ok(permit) = self.outstanding.clone().try_acquire_owned() else {
            debug!(
                procedure = call.procedure_name(),
                "too many outstanding calls, rejecting"
            );
            return Ok(false);
        };

        let inner = self.inner.clone();
        let latency = self.latency;
        runtime.spawn(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let response = inner.lock().await.apply(&call);
            drop(permit);

            callback.on_response(response);
        });

        Ok(true)
    }

    async fn query_scalar(&self, query: ScalarQuery) -> LoadCheckResult<i64> {
        match query {
            ScalarQuery::RowCount { table } => Ok(self.row_count(&table).await as i64),
        }
    }
}
