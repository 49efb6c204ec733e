use std::sync::Arc;
use std::time::Duration;

use loadcheck_config::shared::{IntoConnectOptions, PgConnectionConfig};
use pg_escape::quote_identifier;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::backend::{
    Backend, ClientResponse, ProcedureCall, ProcedureCallback, ResponseStatus, ScalarQuery,
};
use crate::error::{ErrorKind, LoadCheckResult};
use crate::loadcheck_error;

/// Suffix of the table receiving copied rows.
const COPY_TABLE_SUFFIX: &str = "_copy";

/// Backend running every procedure as a statement against a Postgres database.
///
/// Each monitored table `t` is backed by `t` and `t_copy`, both with `cid`, `txnid` and `rowid`
/// bigint columns. Calls are executed on spawned tasks; calls beyond the outstanding call limit
/// are rejected.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    outstanding: Arc<Semaphore>,
}

impl PostgresBackend {
    /// Creates a backend with a lazily connecting pool.
    pub fn new(config: &PgConnectionConfig, max_outstanding_calls: usize) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_lazy_with(config.with_db());

        Self::with_pool(pool, max_outstanding_calls)
    }

    pub fn with_pool(pool: PgPool, max_outstanding_calls: usize) -> Self {
        Self {
            pool,
            outstanding: Arc::new(Semaphore::new(max_outstanding_calls)),
        }
    }

    /// Creates the load and copy tables of `tables` when they do not exist.
    pub async fn prepare_tables<'a, I>(&self, tables: I) -> LoadCheckResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for table in tables {
            for name in [table.to_string(), format!("{table}{COPY_TABLE_SUFFIX}")] {
                let statement = format!(
                    "create table if not exists {} (cid bigint primary key, txnid bigint not null, rowid bigint not null)",
                    quote_identifier(&name)
                );
                sqlx::query(&statement).execute(&self.pool).await?;
            }

            info!(table, "load and copy tables ready");
        }

        Ok(())
    }
}

/// Runs `call` and returns the number of affected rows.
async fn execute(pool: &PgPool, call: &ProcedureCall) -> Result<i64, sqlx::Error> {
    let table = call.table();
    let load_table = quote_identifier(table);
    let copy_table = format!("{table}{COPY_TABLE_SUFFIX}");
    let copy_table = quote_identifier(&copy_table);

    match call {
        ProcedureCall::Load { row, .. } => {
            let statement =
                format!("insert into {load_table} (cid, txnid, rowid) values ($1, $2, $3)");
            let result = sqlx::query(&statement)
                .bind(row.id)
                .bind(row.txnid)
                .bind(row.timestamp)
                .execute(pool)
                .await?;

            Ok(result.rows_affected() as i64)
        }
        ProcedureCall::Copy { id, .. } => {
            let statement = format!(
                "insert into {copy_table} (cid, txnid, rowid) select cid, txnid, rowid from {load_table} where cid = $1"
            );
            let result = sqlx::query(&statement).bind(*id).execute(pool).await?;

            Ok(result.rows_affected() as i64)
        }
        ProcedureCall::Delete { id, .. } => {
            let statement = format!(
                "with deleted_rows as (delete from {load_table} where cid = $1 returning cid), \
                 deleted_copies as (delete from {copy_table} where cid = $1 returning cid) \
                 select (select count(*) from deleted_rows) + (select count(*) from deleted_copies)"
            );

            sqlx::query_scalar::<_, i64>(&statement)
                .bind(*id)
                .fetch_one(pool)
                .await
        }
        ProcedureCall::DeleteOnly { id, .. } => {
            let statement = format!("delete from {load_table} where cid = $1");
            let result = sqlx::query(&statement).bind(*id).execute(pool).await?;

            Ok(result.rows_affected() as i64)
        }
    }
}

/// Maps a statement error to the status an asynchronous caller observes.
fn response_for_error(err: &sqlx::Error) -> ClientResponse {
    let status = match err {
        sqlx::Error::Database(_) => ResponseStatus::GracefulFailure,
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => ResponseStatus::ConnectionLost,
        _ => ResponseStatus::UnexpectedFailure,
    };

    ClientResponse::failure(status, err.to_string())
}

impl Backend for PostgresBackend {
    fn name() -> &'static str {
        "postgres"
    }

    fn call_procedure(
        &self,
        call: ProcedureCall,
        callback: Box<dyn ProcedureCallback>,
    ) -> LoadCheckResult<bool> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| {
            loadcheck_error!(
                ErrorKind::BackendCallFailed,
                "Postgres backend calls require a tokio runtime",
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

        let pool = self.pool.clone();
        runtime.spawn(async move {
            let response = match execute(&pool, &call).await {
                Ok(affected) => ClientResponse::affected_rows(affected),
                Err(err) => response_for_error(&err),
            };
            drop(permit);

            callback.on_response(response);
        });

        Ok(true)
    }

    async fn query_scalar(&self, query: ScalarQuery) -> LoadCheckResult<i64> {
        match query {
            ScalarQuery::RowCount { table } => {
                let statement = format!("select count(*) from {}", quote_identifier(&table));
                let count = sqlx::query_scalar::<_, i64>(&statement)
                    .fetch_one(&self.pool)
                    .await?;

                Ok(count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_errors_map_to_statuses() {
        assert_eq!(
            response_for_error(&sqlx::Error::PoolTimedOut).status,
            ResponseStatus::ConnectionLost
        );
        assert_eq!(
            response_for_error(&sqlx::Error::RowNotFound).status,
            ResponseStatus::UnexpectedFailure
        );

        let io = sqlx::Error::Io(std::io::Error::other("reset"));
        let response = response_for_error(&io);
        assert_eq!(response.status, ResponseStatus::ConnectionLost);
        assert!(response.status_detail.is_some());
    }
}
