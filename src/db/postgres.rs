//! PostgreSQL adapter.
//!
//! Owns a single live `PgConnection` built from a [`ConnectionDescriptor`].
//! Structurally parallel to the MySQL adapter; the differences are the
//! introspection catalogs and the absence of a session-level last-insert-id
//! (PostgreSQL callers use a RETURNING clause instead).

use crate::config::ConnectionDescriptor;
use crate::db::adapter::TransactionState;
use crate::db::bind::bind_postgres_value;
use crate::db::decode::postgres_row_to_values;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, SqlValue, ValueMap};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use tracing::{debug, info, warn};

mod queries {
    // Catalog name/domain types are cast to their base types so they decode
    // as plain text and integers.
    pub const LIST_DATABASES: &str = r#"
        SELECT datname::text AS datname
        FROM pg_database
        WHERE datistemplate = false
        ORDER BY datname
        "#;

    // Scoped by schema, not database: a connection is bound to one database
    // and cross-database listing is not a thing here.
    pub const LIST_TABLES: &str = r#"
        SELECT tablename::text AS tablename
        FROM pg_tables
        WHERE schemaname = $1
        ORDER BY tablename
        "#;

    pub const TABLE_SCHEMA: &str = r#"
        SELECT
            column_name::text AS column_name,
            data_type::text AS data_type,
            is_nullable::text AS is_nullable,
            character_maximum_length::int AS character_maximum_length,
            column_default::text AS column_default,
            ordinal_position::int AS ordinal_position
        FROM information_schema.columns
        WHERE table_schema = $1
        AND table_name = $2
        ORDER BY ordinal_position
        "#;

    pub const SERVER_VERSION: &str = "SELECT version() AS version";
}

const DEFAULT_SCHEMA: &str = "public";

pub struct PostgresAdapter {
    descriptor: ConnectionDescriptor,
    conn: Option<PgConnection>,
    tx_state: TransactionState,
    instance_id: String,
}

impl PostgresAdapter {
    pub(crate) fn new(descriptor: ConnectionDescriptor) -> Self {
        Self {
            descriptor,
            conn: None,
            tx_state: TransactionState::Idle,
            instance_id: format!("conn_{}", uuid::Uuid::new_v4().simple()),
        }
    }

    pub(crate) fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub(crate) fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub(crate) fn transaction_state(&self) -> TransactionState {
        self.tx_state
    }

    /// Establish the connection. If one is already open it is closed first
    /// and replaced, so repeated calls never leak sockets.
    pub(crate) async fn connect(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            debug!(instance = %self.instance_id, "Already connected, reconnecting");
            self.disconnect().await;
        }

        let mut options = PgConnectOptions::new()
            .host(&self.descriptor.host)
            .port(self.descriptor.port)
            .username(&self.descriptor.user)
            .password(&self.descriptor.secret);
        if let Some(database) = &self.descriptor.database {
            options = options.database(database);
        }

        let conn = options.connect().await.map_err(|e| {
            DbError::connection(format!(
                "PostgreSQL connection to {} failed: {}",
                self.descriptor.endpoint(),
                e
            ))
        })?;

        self.conn = Some(conn);
        self.tx_state = TransactionState::Idle;
        info!(
            instance = %self.instance_id,
            endpoint = %self.descriptor.endpoint(),
            "PostgreSQL connection established"
        );
        Ok(())
    }

    /// Close the connection. Idempotent; never fails.
    pub(crate) async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                warn!(instance = %self.instance_id, error = %e, "Error closing PostgreSQL connection");
            } else {
                info!(instance = %self.instance_id, "PostgreSQL connection closed");
            }
        }
        self.tx_state = TransactionState::Idle;
    }

    pub(crate) async fn ensure_connected(&mut self) -> DbResult<()> {
        if !self.is_connected() {
            info!(instance = %self.instance_id, "Reconnecting to PostgreSQL");
            self.connect().await?;
        }
        Ok(())
    }

    fn conn(&mut self) -> DbResult<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::connection("Adapter is not connected"))
    }

    /// Execute a mutating statement, returning the affected row count.
    pub(crate) async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        self.ensure_connected().await?;
        let conn = self.conn()?;

        let result = if params.is_empty() {
            (&mut *conn).execute(sql).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_value(query, param);
            }
            query.execute(&mut *conn).await
        }
        .map_err(DbError::from)?;

        debug!(
            instance = %self.instance_id,
            rows_affected = result.rows_affected(),
            "Statement executed"
        );
        Ok(result.rows_affected())
    }

    pub(crate) async fn fetch_one(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Option<ValueMap>> {
        self.ensure_connected().await?;
        let conn = self.conn()?;

        let row = if params.is_empty() {
            (&mut *conn).fetch_optional(sql).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_value(query, param);
            }
            query.fetch_optional(&mut *conn).await
        }
        .map_err(DbError::from)?;

        Ok(row.as_ref().map(postgres_row_to_values))
    }

    pub(crate) async fn fetch_all(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> DbResult<Vec<ValueMap>> {
        self.ensure_connected().await?;
        let conn = self.conn()?;

        let rows = if params.is_empty() {
            (&mut *conn).fetch_all(sql).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_value(query, param);
            }
            query.fetch_all(&mut *conn).await
        }
        .map_err(DbError::from)?;

        Ok(rows.iter().map(postgres_row_to_values).collect())
    }

    pub(crate) async fn begin_transaction(&mut self) -> DbResult<()> {
        if self.tx_state == TransactionState::Active {
            return Err(DbError::transaction(
                "A transaction is already active on this connection",
            ));
        }
        self.ensure_connected().await?;
        let conn = self.conn()?;
        (&mut *conn)
            .execute("BEGIN")
            .await
            .map_err(|e| DbError::transaction(format!("Failed to begin transaction: {}", e)))?;
        self.tx_state = TransactionState::Active;
        debug!(instance = %self.instance_id, "Transaction started");
        Ok(())
    }

    pub(crate) async fn commit(&mut self) -> DbResult<()> {
        if self.tx_state == TransactionState::Idle {
            debug!(instance = %self.instance_id, "Commit without active transaction ignored");
            return Ok(());
        }
        let conn = self.conn()?;
        (&mut *conn)
            .execute("COMMIT")
            .await
            .map_err(|e| DbError::transaction(format!("Commit failed: {}", e)))?;
        self.tx_state = TransactionState::Idle;
        debug!(instance = %self.instance_id, "Transaction committed");
        Ok(())
    }

    pub(crate) async fn rollback(&mut self) -> DbResult<()> {
        if self.tx_state == TransactionState::Idle {
            return Err(DbError::transaction("Rollback without active transaction"));
        }
        let conn = self.conn()?;
        (&mut *conn)
            .execute("ROLLBACK")
            .await
            .map_err(|e| DbError::transaction(format!("Rollback failed: {}", e)))?;
        self.tx_state = TransactionState::Idle;
        debug!(instance = %self.instance_id, "Transaction rolled back");
        Ok(())
    }

    pub(crate) async fn list_databases(&mut self) -> DbResult<Vec<String>> {
        let rows = self.fetch_all(queries::LIST_DATABASES, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("datname").and_then(|v| v.as_text()))
            .map(String::from)
            .collect())
    }

    /// List tables in a schema. The scope argument names a *schema* here
    /// (defaulting to "public"); database-level scoping does not apply to a
    /// connection that is already bound to one database.
    pub(crate) async fn list_tables(&mut self, scope: Option<&str>) -> DbResult<Vec<String>> {
        let params = [SqlValue::from(scope.unwrap_or(DEFAULT_SCHEMA))];
        let rows = self.fetch_all(queries::LIST_TABLES, &params).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("tablename").and_then(|v| v.as_text()))
            .map(String::from)
            .collect())
    }

    pub(crate) async fn table_schema(
        &mut self,
        table: &str,
        scope: Option<&str>,
    ) -> DbResult<Vec<ColumnInfo>> {
        let params = [
            SqlValue::from(scope.unwrap_or(DEFAULT_SCHEMA)),
            SqlValue::from(table),
        ];
        let rows = self.fetch_all(queries::TABLE_SCHEMA, &params).await?;
        Ok(rows.iter().map(column_info_from_row).collect())
    }

    pub(crate) async fn server_version(&mut self) -> DbResult<String> {
        let row = self.fetch_one(queries::SERVER_VERSION, &[]).await?;
        Ok(row
            .as_ref()
            .and_then(|r| r.get("version"))
            .and_then(|v| v.as_text())
            .unwrap_or("Unknown")
            .to_string())
    }
}

fn column_info_from_row(row: &ValueMap) -> ColumnInfo {
    ColumnInfo {
        name: row
            .get("column_name")
            .and_then(|v| v.as_text())
            .unwrap_or_default()
            .to_string(),
        data_type: row
            .get("data_type")
            .and_then(|v| v.as_text())
            .unwrap_or_default()
            .to_string(),
        nullable: row
            .get("is_nullable")
            .and_then(|v| v.as_text())
            .map(|v| v.eq_ignore_ascii_case("YES"))
            .unwrap_or(true),
        max_length: row
            .get("character_maximum_length")
            .and_then(|v| v.as_int()),
        default_value: row
            .get("column_default")
            .and_then(|v| v.as_text())
            .map(String::from),
        ordinal_position: row
            .get("ordinal_position")
            .and_then(|v| v.as_int())
            .unwrap_or(0) as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineKind;

    #[test]
    fn test_new_adapter_starts_disconnected_and_idle() {
        let descriptor =
            ConnectionDescriptor::new(EngineKind::Postgres, "localhost", 5432, "postgres", "pw")
                .unwrap();
        let adapter = PostgresAdapter::new(descriptor);
        assert!(!adapter.is_connected());
        assert_eq!(adapter.transaction_state(), TransactionState::Idle);
    }

    #[test]
    fn test_column_info_defaults_ordinal_to_zero() {
        let info = column_info_from_row(&ValueMap::new());
        assert!(info.name.is_empty());
        assert!(info.nullable);
        assert_eq!(info.ordinal_position, 0);
    }
}
