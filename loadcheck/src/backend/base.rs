use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use loadcheck_config::shared::Partitioning;
use serde::Serialize;

use crate::error::LoadCheckResult;
use crate::types::{Destiny, Row};

/// Opaque token routing a call to the backend partition that owns a value.
pub type RoutingKey = Bytes;

/// Status reported by the backend for an asynchronous procedure call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    /// The procedure ran and rolled back on an application level error, e.g. a constraint
    /// violation.
    GracefulFailure,
    UserAbort,
    UnexpectedFailure,
    ConnectionLost,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Success => "success",
            ResponseStatus::GracefulFailure => "graceful_failure",
            ResponseStatus::UserAbort => "user_abort",
            ResponseStatus::UnexpectedFailure => "unexpected_failure",
            ResponseStatus::ConnectionLost => "connection_lost",
        }
    }
}

/// Response delivered to a [`ProcedureCallback`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientResponse {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    /// Scalar result of the procedure, the affected row count for copies and deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scalar: Option<i64>,
}

impl ClientResponse {
    /// A successful response without a result.
    pub fn success() -> Self {
        Self {
            status: ResponseStatus::Success,
            status_detail: None,
            scalar: None,
        }
    }

    /// A successful response reporting `affected` rows.
    pub fn affected_rows(affected: i64) -> Self {
        Self {
            status: ResponseStatus::Success,
            status_detail: None,
            scalar: Some(affected),
        }
    }

    /// A failed response with `status` and a human readable detail.
    pub fn failure(status: ResponseStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            status_detail: Some(detail.into()),
            scalar: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Renders the response as a JSON object, the form used in logs.
impl fmt::Display for ClientResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Kind of a [`ProcedureCall`], used for labels and fault matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcedureKind {
    Load,
    Copy,
    Delete,
    DeleteOnly,
}

impl ProcedureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureKind::Load => "load",
            ProcedureKind::Copy => "copy",
            ProcedureKind::Delete => "delete",
            ProcedureKind::DeleteOnly => "delete_only",
        }
    }
}

/// An asynchronous procedure invocation against a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureCall {
    /// Inserts `row`. Carries a routing key in single partition mode.
    Load {
        table: Arc<str>,
        row: Row,
        routing_key: Option<RoutingKey>,
    },
    /// Copies the row `id` into the copy table.
    Copy {
        table: Arc<str>,
        id: i64,
        partitioning: Partitioning,
    },
    /// Deletes the row `id` from the load table and the copy table. Must affect 2 rows.
    Delete {
        table: Arc<str>,
        id: i64,
        partitioning: Partitioning,
    },
    /// Deletes the row `id` from the load table only. Must affect 1 row.
    DeleteOnly {
        table: Arc<str>,
        id: i64,
        partitioning: Partitioning,
    },
}

impl ProcedureCall {
    /// Builds the terminating delete of a row following `destiny`.
    pub fn terminating_delete(
        table: Arc<str>,
        id: i64,
        partitioning: Partitioning,
        destiny: Destiny,
    ) -> Self {
        match destiny {
            Destiny::CopyThenDelete => ProcedureCall::Delete {
                table,
                id,
                partitioning,
            },
            Destiny::DirectDelete => ProcedureCall::DeleteOnly {
                table,
                id,
                partitioning,
            },
        }
    }

    pub fn kind(&self) -> ProcedureKind {
        match self {
            ProcedureCall::Load { .. } => ProcedureKind::Load,
            ProcedureCall::Copy { .. } => ProcedureKind::Copy,
            ProcedureCall::Delete { .. } => ProcedureKind::Delete,
            ProcedureCall::DeleteOnly { .. } => ProcedureKind::DeleteOnly,
        }
    }

    pub fn table(&self) -> &Arc<str> {
        match self {
            ProcedureCall::Load { table, .. }
            | ProcedureCall::Copy { table, .. }
            | ProcedureCall::Delete { table, .. }
            | ProcedureCall::DeleteOnly { table, .. } => table,
        }
    }

    /// Returns the id of the row the call operates on.
    pub fn row_id(&self) -> i64 {
        match self {
            ProcedureCall::Load { row, .. } => row.id,
            ProcedureCall::Copy { id, .. }
            | ProcedureCall::Delete { id, .. }
            | ProcedureCall::DeleteOnly { id, .. } => *id,
        }
    }

    /// Returns the name of the stored procedure the backend runs for this call.
    pub fn procedure_name(&self) -> &'static str {
        use Partitioning::{MultiPartition, SinglePartition};

        match self {
            ProcedureCall::Load {
                routing_key: Some(_),
                ..
            } => "LoadSinglepartitionTable",
            ProcedureCall::Load {
                routing_key: None, ..
            } => "LoadMultipartitionTable",
            ProcedureCall::Copy { partitioning, .. } => match partitioning {
                SinglePartition => "CopyLoadPartitionedSP",
                MultiPartition => "CopyLoadPartitionedMP",
            },
            ProcedureCall::Delete { partitioning, .. } => match partitioning {
                SinglePartition => "DeleteLoadPartitionedSP",
                MultiPartition => "DeleteLoadPartitionedMP",
            },
            ProcedureCall::DeleteOnly { partitioning, .. } => match partitioning {
                SinglePartition => "DeleteOnlyLoadTableSP",
                MultiPartition => "DeleteOnlyLoadTableMP",
            },
        }
    }
}

/// A synchronous scalar query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarQuery {
    /// Counts the rows currently in the load table.
    RowCount { table: Arc<str> },
}

/// Receives the response of an accepted procedure call.
///
/// Backends invoke [`ProcedureCallback::on_response`] exactly once per accepted call, from any
/// task and in any order. The callback of a rejected call is dropped without being invoked.
pub trait ProcedureCallback: Send + 'static {
    fn on_response(self: Box<Self>, response: ClientResponse);
}

/// Client of the data store under test.
pub trait Backend {
    /// Returns a short name identifying the backend in logs.
    fn name() -> &'static str;

    /// Submits `call` asynchronously.
    ///
    /// Returns `Ok(true)` when the call was accepted and `callback` will be invoked later,
    /// `Ok(false)` when the backend rejected it and dropped `callback`, and an error when the
    /// call could not be handed to the backend at all.
    fn call_procedure(
        &self,
        call: ProcedureCall,
        callback: Box<dyn ProcedureCallback>,
    ) -> LoadCheckResult<bool>;

    /// Runs a scalar query and returns its value.
    fn query_scalar(
        &self,
        query: ScalarQuery,
    ) -> impl Future<Output = LoadCheckResult<i64>> + Send;

    /// Derives the routing key of a partition column value.
    fn routing_key_of(&self, value: i64) -> RoutingKey {
        Bytes::copy_from_slice(&value.to_be_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procedure_names_follow_partitioning() {
        let table: Arc<str> = Arc::from("loadp");
        let row = Row::new(5);

        let single = ProcedureCall::Load {
            table: table.clone(),
            row,
            routing_key: Some(Bytes::from_static(&[0, 0, 0, 0, 0, 0, 0, 5])),
        };
        let multi = ProcedureCall::Load {
            table: table.clone(),
            row,
            routing_key: None,
        };
        assert_eq!(single.procedure_name(), "LoadSinglepartitionTable");
        assert_eq!(multi.procedure_name(), "LoadMultipartitionTable");

        let delete = ProcedureCall::terminating_delete(
            table.clone(),
            5,
            Partitioning::MultiPartition,
            Destiny::CopyThenDelete,
        );
        assert_eq!(delete.procedure_name(), "DeleteLoadPartitionedMP");

        let delete_only = ProcedureCall::terminating_delete(
            table,
            5,
            Partitioning::SinglePartition,
            Destiny::DirectDelete,
        );
        assert_eq!(delete_only.procedure_name(), "DeleteOnlyLoadTableSP");
        assert_eq!(delete_only.kind(), ProcedureKind::DeleteOnly);
        assert_eq!(delete_only.row_id(), 5);
    }

    #[test]
    fn response_renders_as_json() {
        let response = ClientResponse::affected_rows(2);
        assert_eq!(response.to_string(), r#"{"status":"SUCCESS","scalar":2}"#);

        let failure = ClientResponse::failure(ResponseStatus::GracefulFailure, "duplicate key");
        assert_eq!(
            failure.to_string(),
            r#"{"status":"GRACEFUL_FAILURE","status_detail":"duplicate key"}"#
        );
    }
}
