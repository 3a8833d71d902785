//! MySQL adapter.
//!
//! Owns a single live `MySqlConnection` built from a
//! [`ConnectionDescriptor`]. Transactions are driven by issuing literal
//! BEGIN/COMMIT/ROLLBACK statements on the connection, tracked by
//! [`TransactionState`].

use crate::config::ConnectionDescriptor;
use crate::db::adapter::TransactionState;
use crate::db::bind::bind_mysql_value;
use crate::db::decode::mysql_row_to_values;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, SqlValue, ValueMap};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use tracing::{debug, info, warn};

mod queries {
    pub const LIST_DATABASES: &str = "SHOW DATABASES";

    // information_schema string columns come back as binary without an
    // explicit CONVERT, which would decode as base64 noise.
    pub const LIST_TABLES: &str = r#"
        SELECT CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
        "#;

    pub const TABLE_SCHEMA: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS column_name,
            CONVERT(DATA_TYPE USING utf8) AS data_type,
            CONVERT(IS_NULLABLE USING utf8) AS is_nullable,
            CHARACTER_MAXIMUM_LENGTH AS character_maximum_length,
            CONVERT(COLUMN_DEFAULT USING utf8) AS column_default,
            ORDINAL_POSITION AS ordinal_position
        FROM information_schema.COLUMNS
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY ORDINAL_POSITION
        "#;

    pub const SERVER_VERSION: &str = "SELECT VERSION() AS version";
}

pub struct MySqlAdapter {
    descriptor: ConnectionDescriptor,
    conn: Option<MySqlConnection>,
    tx_state: TransactionState,
    last_insert_id: Option<u64>,
    instance_id: String,
}

impl MySqlAdapter {
    pub(crate) fn new(descriptor: ConnectionDescriptor) -> Self {
        Self {
            descriptor,
            conn: None,
            tx_state: TransactionState::Idle,
            last_insert_id: None,
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

    pub(crate) fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }

    /// Establish the connection. If one is already open it is closed first
    /// and replaced, so repeated calls never leak sockets.
    pub(crate) async fn connect(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            debug!(instance = %self.instance_id, "Already connected, reconnecting");
            self.disconnect().await;
        }

        let mut options = MySqlConnectOptions::new()
            .host(&self.descriptor.host)
            .port(self.descriptor.port)
            .username(&self.descriptor.user)
            .password(&self.descriptor.secret)
            .charset("utf8mb4");
        if let Some(database) = &self.descriptor.database {
            options = options.database(database);
        }

        let conn = options.connect().await.map_err(|e| {
            DbError::connection(format!(
                "MySQL connection to {} failed: {}",
                self.descriptor.endpoint(),
                e
            ))
        })?;

        self.conn = Some(conn);
        self.tx_state = TransactionState::Idle;
        self.last_insert_id = None;
        info!(
            instance = %self.instance_id,
            endpoint = %self.descriptor.endpoint(),
            "MySQL connection established"
        );
        Ok(())
    }

    /// Close the connection. Idempotent; never fails.
    pub(crate) async fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                warn!(instance = %self.instance_id, error = %e, "Error closing MySQL connection");
            } else {
                info!(instance = %self.instance_id, "MySQL connection closed");
            }
        }
        self.tx_state = TransactionState::Idle;
    }

    pub(crate) async fn ensure_connected(&mut self) -> DbResult<()> {
        if !self.is_connected() {
            info!(instance = %self.instance_id, "Reconnecting to MySQL");
            self.connect().await?;
        }
        Ok(())
    }

    fn conn(&mut self) -> DbResult<&mut MySqlConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::connection("Adapter is not connected"))
    }

    /// Execute a mutating statement, returning the affected row count.
    pub(crate) async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        self.ensure_connected().await?;
        let conn = self.conn()?;

        let result = if params.is_empty() {
            // Raw execution - some statements reject the prepared path
            (&mut *conn).execute(sql).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_value(query, param);
            }
            query.execute(&mut *conn).await
        }
        .map_err(DbError::from)?;

        let last_id = result.last_insert_id();
        self.last_insert_id = (last_id != 0).then_some(last_id);

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
                query = bind_mysql_value(query, param);
            }
            query.fetch_optional(&mut *conn).await
        }
        .map_err(DbError::from)?;

        Ok(row.as_ref().map(mysql_row_to_values))
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
                query = bind_mysql_value(query, param);
            }
            query.fetch_all(&mut *conn).await
        }
        .map_err(DbError::from)?;

        Ok(rows.iter().map(mysql_row_to_values).collect())
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
            .filter_map(|row| row.values().next().and_then(|v| v.as_text()))
            .map(String::from)
            .collect())
    }

    /// List tables, scoped to the given database or the connection's
    /// current one.
    pub(crate) async fn list_tables(&mut self, scope: Option<&str>) -> DbResult<Vec<String>> {
        let params = [SqlValue::from(scope.map(String::from))];
        let rows = self.fetch_all(queries::LIST_TABLES, &params).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("TABLE_NAME").and_then(|v| v.as_text()))
            .map(String::from)
            .collect())
    }

    pub(crate) async fn table_schema(
        &mut self,
        table: &str,
        scope: Option<&str>,
    ) -> DbResult<Vec<ColumnInfo>> {
        let params = [
            SqlValue::from(table),
            SqlValue::from(scope.map(String::from)),
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
