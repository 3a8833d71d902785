//! The unified engine adapter.
//!
//! [`EngineAdapter`] is a tagged variant over the two engine-specific
//! adapters, exposing one capability set: connection lifecycle, statement
//! execution, fetching, transaction control, and schema introspection.
//! Behavior differs only in SQL dialect and a few catalog queries, so a
//! flat enum with parallel per-engine modules keeps dispatch obvious.
//!
//! State machine per instance:
//! `Disconnected -connect-> Connected -disconnect-> Disconnected`; within
//! Connected, `Idle -begin-> Active -commit|rollback-> Idle`. Exactly one
//! transaction may be active per instance; nesting is rejected.

use crate::config::{ConnectionDescriptor, EngineKind};
use crate::db::mysql::MySqlAdapter;
use crate::db::postgres::PostgresAdapter;
use crate::db::transaction::TransactionScope;
use crate::error::DbResult;
use crate::models::{ColumnInfo, SqlValue, ValueMap};

/// Transaction state of one adapter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// One engine-specific adapter bound to a single live connection.
pub enum EngineAdapter {
    MySql(MySqlAdapter),
    Postgres(PostgresAdapter),
}

impl EngineAdapter {
    /// Create a disconnected adapter for the descriptor's engine.
    pub fn new(descriptor: ConnectionDescriptor) -> Self {
        match descriptor.engine {
            EngineKind::MySql => Self::MySql(MySqlAdapter::new(descriptor)),
            EngineKind::Postgres => Self::Postgres(PostgresAdapter::new(descriptor)),
        }
    }

    pub fn engine(&self) -> EngineKind {
        match self {
            Self::MySql(_) => EngineKind::MySql,
            Self::Postgres(_) => EngineKind::Postgres,
        }
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        match self {
            Self::MySql(a) => a.descriptor(),
            Self::Postgres(a) => a.descriptor(),
        }
    }

    /// Unique identifier of this instance, used for log correlation and
    /// pool diagnostics.
    pub fn instance_id(&self) -> &str {
        match self {
            Self::MySql(a) => a.instance_id(),
            Self::Postgres(a) => a.instance_id(),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Self::MySql(a) => a.is_connected(),
            Self::Postgres(a) => a.is_connected(),
        }
    }

    pub fn transaction_state(&self) -> TransactionState {
        match self {
            Self::MySql(a) => a.transaction_state(),
            Self::Postgres(a) => a.transaction_state(),
        }
    }

    /// Establish the live connection. An already-connected adapter closes
    /// its connection first and reconnects.
    pub async fn connect(&mut self) -> DbResult<()> {
        match self {
            Self::MySql(a) => a.connect().await,
            Self::Postgres(a) => a.connect().await,
        }
    }

    /// Release the connection. Idempotent; never fails.
    pub async fn disconnect(&mut self) {
        match self {
            Self::MySql(a) => a.disconnect().await,
            Self::Postgres(a) => a.disconnect().await,
        }
    }

    /// Reconnect if the connection has been dropped.
    pub async fn ensure_connected(&mut self) -> DbResult<()> {
        match self {
            Self::MySql(a) => a.ensure_connected().await,
            Self::Postgres(a) => a.ensure_connected().await,
        }
    }

    /// Execute a mutating statement (INSERT, UPDATE, DELETE, DDL) and
    /// return the affected row count.
    pub async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        match self {
            Self::MySql(a) => a.execute(sql, params).await,
            Self::Postgres(a) => a.execute(sql, params).await,
        }
    }

    /// Fetch at most one row.
    pub async fn fetch_one(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Option<ValueMap>> {
        match self {
            Self::MySql(a) => a.fetch_one(sql, params).await,
            Self::Postgres(a) => a.fetch_one(sql, params).await,
        }
    }

    /// Fetch all rows, in result-set order.
    pub async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<ValueMap>> {
        match self {
            Self::MySql(a) => a.fetch_all(sql, params).await,
            Self::Postgres(a) => a.fetch_all(sql, params).await,
        }
    }

    /// Start a transaction. Fails if one is already active.
    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        match self {
            Self::MySql(a) => a.begin_transaction().await,
            Self::Postgres(a) => a.begin_transaction().await,
        }
    }

    /// Commit the active transaction. A commit with no active transaction
    /// is ignored.
    pub async fn commit(&mut self) -> DbResult<()> {
        match self {
            Self::MySql(a) => a.commit().await,
            Self::Postgres(a) => a.commit().await,
        }
    }

    /// Roll back the active transaction. A rollback with no active
    /// transaction is an error: it signals control-flow confusion in the
    /// caller, and the adapter state cannot be assumed sound.
    pub async fn rollback(&mut self) -> DbResult<()> {
        match self {
            Self::MySql(a) => a.rollback().await,
            Self::Postgres(a) => a.rollback().await,
        }
    }

    /// Generated key of the most recent INSERT on this instance. MySQL
    /// only; PostgreSQL returns `None` and callers use a RETURNING clause.
    pub fn last_insert_id(&self) -> Option<u64> {
        match self {
            Self::MySql(a) => a.last_insert_id(),
            Self::Postgres(_) => None,
        }
    }

    /// List databases visible on the server.
    pub async fn list_databases(&mut self) -> DbResult<Vec<String>> {
        match self {
            Self::MySql(a) => a.list_databases().await,
            Self::Postgres(a) => a.list_databases().await,
        }
    }

    /// List tables. MySQL interprets `scope` as a database name; PostgreSQL
    /// interprets it as a schema name (default "public") - the connection is
    /// already bound to one database.
    pub async fn list_tables(&mut self, scope: Option<&str>) -> DbResult<Vec<String>> {
        match self {
            Self::MySql(a) => a.list_tables(scope).await,
            Self::Postgres(a) => a.list_tables(scope).await,
        }
    }

    /// Describe a table's columns, ordered by ordinal position. `scope` is
    /// interpreted as in [`list_tables`](Self::list_tables).
    pub async fn table_schema(
        &mut self,
        table: &str,
        scope: Option<&str>,
    ) -> DbResult<Vec<ColumnInfo>> {
        match self {
            Self::MySql(a) => a.table_schema(table, scope).await,
            Self::Postgres(a) => a.table_schema(table, scope).await,
        }
    }

    /// Engine version string.
    pub async fn server_version(&mut self) -> DbResult<String> {
        match self {
            Self::MySql(a) => a.server_version().await,
            Self::Postgres(a) => a.server_version().await,
        }
    }

    /// Execute one statement once per parameter set, inside a single
    /// transaction scope. Atomic: either every statement applies or none
    /// does, and the first failure's error is the one surfaced after
    /// rollback. Returns the total affected row count.
    pub async fn execute_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<SqlValue>],
    ) -> DbResult<u64> {
        // Owned copies: the scope body must not borrow from this frame
        let sql = sql.to_string();
        let param_sets = param_sets.to_vec();
        TransactionScope::run(self, move |adapter| {
            Box::pin(async move {
                let mut total_affected = 0u64;
                for params in &param_sets {
                    total_affected += adapter.execute(&sql, params).await?;
                }
                Ok(total_affected)
            })
        })
        .await
    }
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("engine", &self.engine())
            .field("instance_id", &self.instance_id())
            .field("connected", &self.is_connected())
            .field("transaction_state", &self.transaction_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql_descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new(EngineKind::MySql, "localhost", 3306, "root", "pw")
            .unwrap()
            .with_database("shop")
    }

    #[test]
    fn test_new_dispatches_on_engine() {
        let adapter = EngineAdapter::new(mysql_descriptor());
        assert_eq!(adapter.engine(), EngineKind::MySql);

        let descriptor =
            ConnectionDescriptor::new(EngineKind::Postgres, "localhost", 5432, "postgres", "pw")
                .unwrap();
        let adapter = EngineAdapter::new(descriptor);
        assert_eq!(adapter.engine(), EngineKind::Postgres);
    }

    #[test]
    fn test_postgres_has_no_last_insert_id() {
        let descriptor =
            ConnectionDescriptor::new(EngineKind::Postgres, "localhost", 5432, "postgres", "pw")
                .unwrap();
        let adapter = EngineAdapter::new(descriptor);
        assert_eq!(adapter.last_insert_id(), None);
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let adapter = EngineAdapter::new(mysql_descriptor());
        let debug = format!("{:?}", adapter);
        assert!(!debug.contains("pw"));
        assert!(debug.contains("MySql"));
    }

    #[test]
    fn test_transaction_state_helpers() {
        assert!(TransactionState::Active.is_active());
        assert!(!TransactionState::Idle.is_active());
    }
}
