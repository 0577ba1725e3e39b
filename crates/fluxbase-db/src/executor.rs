//! The role-bound transaction executor.
//!
//! A request's database interaction moves through
//! `acquired -> bound -> executing -> {committed | rolled_back}`. No
//! statement runs before the identity is installed, and dropping a
//! [`BoundTransaction`] without committing rolls it back, so state is
//! released on every exit path.

use crate::bindings::bind_statement;
use crate::pool::Pools;
use crate::translate::translate_db_error;
use fluxbase_core::{Error, Identity};
use fluxbase_planner::Statement;
use sqlx::{PgPool, Postgres, Row, Transaction};

pub struct DbExecutor {
    pools: Pools,
    statement_timeout_ms: u64,
}

impl DbExecutor {
    pub fn new(pools: Pools, statement_timeout_ms: u64) -> Self {
        DbExecutor {
            pools,
            statement_timeout_ms,
        }
    }

    pub fn runtime_pool(&self) -> &PgPool {
        &self.pools.runtime
    }

    /// The admin pool. Only the DDL path (migrations, introspection,
    /// internal tables) may use this; request handlers never touch it.
    pub fn admin_pool(&self) -> &PgPool {
        &self.pools.admin
    }

    /// Check out a runtime connection, begin a transaction, and install
    /// the identity. Returns only after the session is fully bound.
    pub async fn begin(&self, identity: &Identity) -> Result<BoundTransaction<'_>, Error> {
        let mut tx = Box::pin(self.pools.runtime.begin())
            .await
            .map_err(translate_db_error)?;
        if let Err(e) = bind_identity(&mut tx, identity, self.statement_timeout_ms).await {
            // Explicit rollback keeps the failure visible in traces;
            // dropping the transaction would also abort it.
            let _ = Box::pin(tx.rollback()).await;
            return Err(e);
        }
        Ok(BoundTransaction { tx })
    }
}

/// `SET LOCAL role` plus the `app.*` session settings RLS policies read.
async fn bind_identity(
    tx: &mut Transaction<'_, Postgres>,
    identity: &Identity,
    statement_timeout_ms: u64,
) -> Result<(), Error> {
    // The role name comes from the closed Role enum, never from request
    // input; statement_timeout is a config integer.
    let setup = format!(
        "SET LOCAL statement_timeout = {statement_timeout_ms}; SET LOCAL role \"{}\"",
        identity.role.as_db_role()
    );
    Box::pin(sqlx::raw_sql(&setup).execute(&mut **tx))
        .await
        .map_err(translate_db_error)?;

    Box::pin(
        sqlx::query("SELECT set_config('app.user_id', $1, true)")
            .bind(identity.user_id_setting())
            .execute(&mut **tx),
    )
    .await
    .map_err(translate_db_error)?;

    Box::pin(
        sqlx::query("SELECT set_config('app.claims', $1, true)")
            .bind(identity.claims_json().to_string())
            .execute(&mut **tx),
    )
    .await
    .map_err(translate_db_error)?;

    tracing::trace!(role = %identity.role, user = %identity.user_id_setting(),
        "identity bound");
    Ok(())
}

/// A transaction with the request identity installed.
pub struct BoundTransaction<'p> {
    tx: Transaction<'p, Postgres>,
}

impl BoundTransaction<'_> {
    /// Run a `json_agg`-enveloped statement and decode its single JSON
    /// value.
    pub async fn fetch_json(&mut self, stmt: &Statement) -> Result<serde_json::Value, Error> {
        let row = bind_statement(stmt)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(translate_db_error)?;
        row.try_get(0).map_err(Error::internal)
    }

    /// Run a `SELECT count(*)` statement.
    pub async fn fetch_count(&mut self, stmt: &Statement) -> Result<i64, Error> {
        let row = bind_statement(stmt)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(translate_db_error)?;
        row.try_get(0).map_err(Error::internal)
    }

    /// Run a statement for its side effects; returns affected rows.
    pub async fn execute(&mut self, stmt: &Statement) -> Result<u64, Error> {
        let result = bind_statement(stmt)
            .execute(&mut *self.tx)
            .await
            .map_err(translate_db_error)?;
        Ok(result.rows_affected())
    }

    /// Visibility probe: does the statement return any row at all?
    pub async fn probe(&mut self, stmt: &Statement) -> Result<bool, Error> {
        let fetch = Box::pin(bind_statement(stmt).fetch_optional(&mut *self.tx));
        let row = fetch.await.map_err(translate_db_error)?;
        Ok(row.is_some())
    }

    pub async fn commit(self) -> Result<(), Error> {
        Box::pin(self.tx.commit())
            .await
            .map_err(translate_db_error)
    }

    pub async fn rollback(self) -> Result<(), Error> {
        Box::pin(self.tx.rollback())
            .await
            .map_err(translate_db_error)
    }
}
