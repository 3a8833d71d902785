//! CRUD and introspection operations over pooled connections.
//!
//! [`CrudService`] is the surface an outer RPC/tool layer calls: structured
//! requests in, [`Envelope`] values out. Each operation resolves a logical
//! connection name through the registry, leases an adapter from the pool,
//! builds parameterized SQL, executes, and releases the lease on every
//! path. Adapter errors never cross this boundary as `Err` - they are
//! converted to error envelopes carrying the table name and a message that
//! never includes connection secrets.

use crate::config::ConnectionRegistry;
use crate::db::adapter::EngineAdapter;
use crate::db::builder::QueryBuilder;
use crate::db::pool::{AdapterLease, ConnectionPool};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnInfo, Envelope, SqlValue, ValueMap};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Column name used for id lookups when the caller does not name one.
pub const DEFAULT_ID_COLUMN: &str = "id";

/// Options for [`CrudService::select_records`].
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Columns to project; all columns when omitted or empty.
    pub columns: Option<Vec<String>>,
    /// Equality filter, AND-joined in map order.
    pub filter: Option<ValueMap>,
    /// Free-text ordering expression (e.g. "created_at DESC"). Appended
    /// verbatim - trusted input from the calling layer only.
    pub order_by: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsertOutput {
    pub table: String,
    pub rows_affected: u64,
    /// MySQL only; PostgreSQL callers use a RETURNING clause instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<u64>,
    pub data: ValueMap,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkInsertOutput {
    pub table: String,
    pub rows_affected: u64,
    pub records_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectOutput {
    pub table: String,
    pub count: usize,
    pub records: Vec<ValueMap>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordOutput {
    pub table: String,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ValueMap>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountOutput {
    pub table: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutput {
    pub table: String,
    pub rows_affected: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutput {
    pub table: String,
    pub rows_affected: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseListOutput {
    pub count: usize,
    pub databases: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableListOutput {
    pub count: usize,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSchemaOutput {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerVersionOutput {
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionProbeOutput {
    pub connection: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub server_version: String,
}

/// Orchestrates registry, pool, builder and adapters into the CRUD surface.
///
/// Constructed explicitly at startup and passed to whatever layer exposes
/// the operations; there is no global instance.
pub struct CrudService {
    registry: ConnectionRegistry,
    pool: Arc<ConnectionPool>,
}

impl CrudService {
    /// Create a service with a pool sized from the registry settings.
    pub fn new(registry: ConnectionRegistry) -> Self {
        let pool = Arc::new(ConnectionPool::new(registry.settings().pool_size));
        Self { registry, pool }
    }

    /// Create a service sharing an existing pool.
    pub fn with_pool(registry: ConnectionRegistry, pool: Arc<ConnectionPool>) -> Self {
        Self { registry, pool }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Disconnect every pooled connection.
    pub async fn shutdown(&self) {
        self.pool.close_all(None).await;
    }

    async fn lease(&self, connection: Option<&str>) -> DbResult<AdapterLease> {
        let (name, descriptor) = self.registry.resolve(connection)?;
        self.pool.acquire(name, descriptor).await
    }

    fn fail<T>(&self, table: &str, err: DbError) -> Envelope<T> {
        warn!(table = %table, error = %err, "Operation failed");
        Envelope::from_error(Some(table.to_string()), err)
    }

    // =========================================================================
    // CREATE
    // =========================================================================

    /// Insert a single record. Column order follows the data map.
    pub async fn insert_record(
        &self,
        table: &str,
        data: ValueMap,
        connection: Option<&str>,
    ) -> Envelope<InsertOutput> {
        match self.try_insert(table, &data, connection).await {
            Ok((rows_affected, last_insert_id)) => {
                info!(table = %table, rows_affected, "Record inserted");
                Envelope::Success(InsertOutput {
                    table: table.to_string(),
                    rows_affected,
                    last_insert_id,
                    data,
                })
            }
            Err(err) => self.fail(table, err),
        }
    }

    async fn try_insert(
        &self,
        table: &str,
        data: &ValueMap,
        connection: Option<&str>,
    ) -> DbResult<(u64, Option<u64>)> {
        if data.is_empty() {
            return Err(DbError::validation("Insert requires at least one column"));
        }
        let mut lease = self.lease(connection).await?;
        let result = insert_on(lease.adapter(), table, data).await;
        lease.release().await;
        result
    }

    /// Insert multiple records atomically. The column set is taken from the
    /// first record and every record must match it; the whole batch runs in
    /// one transaction scope.
    pub async fn bulk_insert(
        &self,
        table: &str,
        records: Vec<ValueMap>,
        connection: Option<&str>,
    ) -> Envelope<BulkInsertOutput> {
        match self.try_bulk_insert(table, &records, connection).await {
            Ok(rows_affected) => {
                info!(
                    table = %table,
                    rows_affected,
                    records_count = records.len(),
                    "Bulk insert completed"
                );
                Envelope::Success(BulkInsertOutput {
                    table: table.to_string(),
                    rows_affected,
                    records_count: records.len(),
                })
            }
            Err(err) => self.fail(table, err),
        }
    }

    async fn try_bulk_insert(
        &self,
        table: &str,
        records: &[ValueMap],
        connection: Option<&str>,
    ) -> DbResult<u64> {
        let first = records
            .first()
            .ok_or_else(|| DbError::validation("Bulk insert requires at least one record"))?;
        if first.is_empty() {
            return Err(DbError::validation("Insert requires at least one column"));
        }

        let expected: Vec<&str> = first.columns().collect();
        for (index, record) in records.iter().enumerate().skip(1) {
            let columns: Vec<&str> = record.columns().collect();
            if columns != expected {
                return Err(DbError::validation(format!(
                    "Record {} columns do not match the first record",
                    index
                )));
            }
        }

        let param_sets: Vec<Vec<SqlValue>> = records
            .iter()
            .map(|record| record.values().cloned().collect())
            .collect();

        let mut lease = self.lease(connection).await?;
        let result = async {
            let adapter = lease.adapter();
            let mut builder = QueryBuilder::new(adapter.engine());
            let (sql, _) = builder.insert_statement(table, first);
            adapter.execute_many(&sql, &param_sets).await
        }
        .await;
        lease.release().await;
        result
    }

    // =========================================================================
    // READ
    // =========================================================================

    /// Select records with optional projection, filter, ordering and limit.
    pub async fn select_records(
        &self,
        table: &str,
        options: SelectOptions,
        connection: Option<&str>,
    ) -> Envelope<SelectOutput> {
        let result = match self.lease(connection).await {
            Ok(mut lease) => {
                let result = select_on(lease.adapter(), table, &options).await;
                lease.release().await;
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(records) => {
                info!(table = %table, count = records.len(), "Records selected");
                Envelope::Success(SelectOutput {
                    table: table.to_string(),
                    count: records.len(),
                    records,
                })
            }
            Err(err) => self.fail(table, err),
        }
    }

    /// Look up a single record by id. A missing record is a success with
    /// `found: false`, not an error.
    pub async fn get_record_by_id(
        &self,
        table: &str,
        id_value: SqlValue,
        id_column: Option<&str>,
        connection: Option<&str>,
    ) -> Envelope<RecordOutput> {
        let id_column = id_column.unwrap_or(DEFAULT_ID_COLUMN);
        let result = match self.lease(connection).await {
            Ok(mut lease) => {
                let result = fetch_by_id_on(lease.adapter(), table, id_column, id_value).await;
                lease.release().await;
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(record) => {
                info!(table = %table, found = record.is_some(), "Record lookup");
                Envelope::Success(RecordOutput {
                    table: table.to_string(),
                    found: record.is_some(),
                    record,
                })
            }
            Err(err) => self.fail(table, err),
        }
    }

    /// Count records matching an optional filter.
    pub async fn count_records(
        &self,
        table: &str,
        filter: Option<&ValueMap>,
        connection: Option<&str>,
    ) -> Envelope<CountOutput> {
        let result = match self.lease(connection).await {
            Ok(mut lease) => {
                let result = count_rows(lease.adapter(), table, filter).await;
                lease.release().await;
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(count) => {
                info!(table = %table, count, "Records counted");
                Envelope::Success(CountOutput {
                    table: table.to_string(),
                    count,
                })
            }
            Err(err) => self.fail(table, err),
        }
    }

    // =========================================================================
    // UPDATE
    // =========================================================================

    /// Update a single record by id. Zero affected rows means the id did
    /// not match; that is still a success.
    pub async fn update_record(
        &self,
        table: &str,
        id_value: SqlValue,
        data: ValueMap,
        id_column: Option<&str>,
        connection: Option<&str>,
    ) -> Envelope<UpdateOutput> {
        let id_column = id_column.unwrap_or(DEFAULT_ID_COLUMN);
        let result = self
            .try_update_by_id(table, id_value, &data, id_column, connection)
            .await;

        match result {
            Ok(rows_affected) => {
                info!(table = %table, rows_affected, "Record updated");
                Envelope::Success(UpdateOutput {
                    table: table.to_string(),
                    rows_affected,
                })
            }
            Err(err) => self.fail(table, err),
        }
    }

    async fn try_update_by_id(
        &self,
        table: &str,
        id_value: SqlValue,
        data: &ValueMap,
        id_column: &str,
        connection: Option<&str>,
    ) -> DbResult<u64> {
        if data.is_empty() {
            return Err(DbError::validation("Update requires at least one column"));
        }
        let mut lease = self.lease(connection).await?;
        let result = update_by_id_on(lease.adapter(), table, id_column, id_value, data).await;
        lease.release().await;
        result
    }

    /// Update every record matching the filter. The filter must be
    /// non-empty; an unrestricted bulk update is refused before any SQL is
    /// built or executed.
    pub async fn update_records(
        &self,
        table: &str,
        data: ValueMap,
        filter: &ValueMap,
        connection: Option<&str>,
    ) -> Envelope<UpdateOutput> {
        if filter.is_empty() {
            return self.fail(
                table,
                DbError::validation("A WHERE filter is required to update multiple records"),
            );
        }
        if data.is_empty() {
            return self.fail(
                table,
                DbError::validation("Update requires at least one column"),
            );
        }

        let result = match self.lease(connection).await {
            Ok(mut lease) => {
                let result = update_many_on(lease.adapter(), table, &data, filter).await;
                lease.release().await;
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(rows_affected) => {
                info!(table = %table, rows_affected, "Records updated");
                Envelope::Success(UpdateOutput {
                    table: table.to_string(),
                    rows_affected,
                })
            }
            Err(err) => self.fail(table, err),
        }
    }

    // =========================================================================
    // DELETE
    // =========================================================================

    /// Delete a single record by id. Zero affected rows is a success.
    pub async fn delete_record(
        &self,
        table: &str,
        id_value: SqlValue,
        id_column: Option<&str>,
        connection: Option<&str>,
    ) -> Envelope<DeleteOutput> {
        let id_column = id_column.unwrap_or(DEFAULT_ID_COLUMN);
        let result = match self.lease(connection).await {
            Ok(mut lease) => {
                let result = delete_by_id_on(lease.adapter(), table, id_column, id_value).await;
                lease.release().await;
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(rows_affected) => {
                info!(table = %table, rows_affected, "Record deleted");
                Envelope::Success(DeleteOutput {
                    table: table.to_string(),
                    rows_affected,
                })
            }
            Err(err) => self.fail(table, err),
        }
    }

    /// Delete every record matching the filter.
    ///
    /// The filter must be non-empty. When the registry's
    /// `confirm_destructive_operations` setting is on (the default), a call
    /// without `confirm` is side-effect-free and returns a
    /// confirmation-required envelope echoing the filter. A confirmed call
    /// re-counts the matching rows immediately before deleting.
    pub async fn delete_records(
        &self,
        table: &str,
        filter: ValueMap,
        confirm: bool,
        connection: Option<&str>,
    ) -> Envelope<DeleteOutput> {
        if filter.is_empty() {
            return self.fail(
                table,
                DbError::validation("A WHERE filter is required to delete multiple records"),
            );
        }

        if !confirm && self.registry.settings().confirm_destructive_operations {
            info!(table = %table, "Destructive operation awaiting confirmation");
            return Envelope::ConfirmationRequired {
                message: "This operation requires explicit confirmation".to_string(),
                warning: format!("Records in '{}' matching the filter will be deleted", table),
                table: table.to_string(),
                filter,
            };
        }

        let result = match self.lease(connection).await {
            Ok(mut lease) => {
                let result = delete_many_on(lease.adapter(), table, &filter).await;
                lease.release().await;
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(rows_affected) => {
                info!(table = %table, rows_affected, "Records deleted");
                Envelope::Success(DeleteOutput {
                    table: table.to_string(),
                    rows_affected,
                })
            }
            Err(err) => self.fail(table, err),
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub async fn list_databases(&self, connection: Option<&str>) -> Envelope<DatabaseListOutput> {
        let result = match self.lease(connection).await {
            Ok(mut lease) => {
                let result = lease.adapter().list_databases().await;
                lease.release().await;
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(databases) => Envelope::Success(DatabaseListOutput {
                count: databases.len(),
                databases,
            }),
            Err(err) => {
                warn!(error = %err, "list_databases failed");
                Envelope::from_error(None, err)
            }
        }
    }

    /// List tables. MySQL interprets `scope` as a database name, PostgreSQL
    /// as a schema name (default "public").
    pub async fn list_tables(
        &self,
        scope: Option<&str>,
        connection: Option<&str>,
    ) -> Envelope<TableListOutput> {
        let result = match self.lease(connection).await {
            Ok(mut lease) => {
                let result = lease.adapter().list_tables(scope).await;
                lease.release().await;
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(tables) => Envelope::Success(TableListOutput {
                count: tables.len(),
                tables,
            }),
            Err(err) => {
                warn!(error = %err, "list_tables failed");
                Envelope::from_error(None, err)
            }
        }
    }

    /// Describe a table's columns, ordered by ordinal position.
    pub async fn get_table_schema(
        &self,
        table: &str,
        scope: Option<&str>,
        connection: Option<&str>,
    ) -> Envelope<TableSchemaOutput> {
        let result = match self.lease(connection).await {
            Ok(mut lease) => {
                let result = lease.adapter().table_schema(table, scope).await;
                lease.release().await;
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(columns) => Envelope::Success(TableSchemaOutput {
                table: table.to_string(),
                columns,
            }),
            Err(err) => self.fail(table, err),
        }
    }

    pub async fn get_server_version(
        &self,
        connection: Option<&str>,
    ) -> Envelope<ServerVersionOutput> {
        let result = match self.lease(connection).await {
            Ok(mut lease) => {
                let result = lease.adapter().server_version().await;
                lease.release().await;
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(version) => Envelope::Success(ServerVersionOutput { version }),
            Err(err) => {
                warn!(error = %err, "get_server_version failed");
                Envelope::from_error(None, err)
            }
        }
    }

    /// Probe a connection: lease, run a trivial query, report the endpoint
    /// and server version. Secrets are never included in the output.
    pub async fn test_connection(
        &self,
        connection: Option<&str>,
    ) -> Envelope<ConnectionProbeOutput> {
        let (name, descriptor) = match self.registry.resolve(connection) {
            Ok((name, descriptor)) => (name.to_string(), descriptor.clone()),
            Err(err) => {
                warn!(error = %err, "test_connection failed to resolve");
                return Envelope::from_error(None, err);
            }
        };

        let result = match self.lease(connection).await {
            Ok(mut lease) => {
                let result = async {
                    let adapter = lease.adapter();
                    adapter.fetch_one("SELECT 1 AS probe", &[]).await?;
                    adapter.server_version().await
                }
                .await;
                lease.release().await;
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(version) => {
                info!(connection = %name, "Connection probe succeeded");
                Envelope::Success(ConnectionProbeOutput {
                    connection: name,
                    host: descriptor.host,
                    port: descriptor.port,
                    database: descriptor.database,
                    server_version: version,
                })
            }
            Err(err) => {
                warn!(connection = %name, error = %err, "Connection probe failed");
                Envelope::from_error(None, err)
            }
        }
    }
}

// =============================================================================
// Statement Helpers
// =============================================================================
//
// Each helper builds one statement against a leased adapter. Kept free of
// the service so the lease bookkeeping above stays uniform.

async fn insert_on(
    adapter: &mut EngineAdapter,
    table: &str,
    data: &ValueMap,
) -> DbResult<(u64, Option<u64>)> {
    let mut builder = QueryBuilder::new(adapter.engine());
    let (sql, params) = builder.insert_statement(table, data);
    let rows_affected = adapter.execute(&sql, &params).await?;
    Ok((rows_affected, adapter.last_insert_id()))
}

async fn select_on(
    adapter: &mut EngineAdapter,
    table: &str,
    options: &SelectOptions,
) -> DbResult<Vec<ValueMap>> {
    let mut builder = QueryBuilder::new(adapter.engine());

    let projection = match &options.columns {
        Some(columns) if !columns.is_empty() => columns.join(", "),
        _ => "*".to_string(),
    };
    let mut sql = format!("SELECT {} FROM {}", projection, table);

    let mut params = Vec::new();
    if let Some(filter) = &options.filter {
        let (fragment, filter_params) = builder.where_fragment(filter);
        if !fragment.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&fragment);
            params = filter_params;
        }
    }
    if let Some(order_by) = &options.order_by {
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
    }
    if let Some(limit) = options.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    adapter.fetch_all(&sql, &params).await
}

async fn fetch_by_id_on(
    adapter: &mut EngineAdapter,
    table: &str,
    id_column: &str,
    id_value: SqlValue,
) -> DbResult<Option<ValueMap>> {
    let mut builder = QueryBuilder::new(adapter.engine());
    let sql = format!(
        "SELECT * FROM {} WHERE {} = {}",
        table,
        id_column,
        builder.placeholder()
    );
    let params = [id_value];
    adapter.fetch_one(&sql, &params).await
}

/// COUNT(*) with an optional equality filter.
async fn count_rows(
    adapter: &mut EngineAdapter,
    table: &str,
    filter: Option<&ValueMap>,
) -> DbResult<i64> {
    let mut builder = QueryBuilder::new(adapter.engine());
    let mut sql = format!("SELECT COUNT(*) AS total FROM {}", table);
    let mut params = Vec::new();
    if let Some(filter) = filter {
        let (fragment, filter_params) = builder.where_fragment(filter);
        if !fragment.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&fragment);
            params = filter_params;
        }
    }
    let row = adapter.fetch_one(&sql, &params).await?;
    Ok(row
        .as_ref()
        .and_then(|r| r.get("total"))
        .and_then(|v| v.as_int())
        .unwrap_or(0))
}

async fn update_by_id_on(
    adapter: &mut EngineAdapter,
    table: &str,
    id_column: &str,
    id_value: SqlValue,
    data: &ValueMap,
) -> DbResult<u64> {
    let mut builder = QueryBuilder::new(adapter.engine());
    let (set_fragment, mut params) = builder.set_fragment(data);
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        table,
        set_fragment,
        id_column,
        builder.placeholder()
    );
    params.push(id_value);
    adapter.execute(&sql, &params).await
}

async fn update_many_on(
    adapter: &mut EngineAdapter,
    table: &str,
    data: &ValueMap,
    filter: &ValueMap,
) -> DbResult<u64> {
    let mut builder = QueryBuilder::new(adapter.engine());
    let (set_fragment, mut params) = builder.set_fragment(data);
    let (where_fragment, where_params) = builder.where_fragment(filter);
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        table, set_fragment, where_fragment
    );
    params.extend(where_params);
    adapter.execute(&sql, &params).await
}

async fn delete_by_id_on(
    adapter: &mut EngineAdapter,
    table: &str,
    id_column: &str,
    id_value: SqlValue,
) -> DbResult<u64> {
    let mut builder = QueryBuilder::new(adapter.engine());
    let sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        table,
        id_column,
        builder.placeholder()
    );
    let params = [id_value];
    adapter.execute(&sql, &params).await
}

/// Count the matching rows, then delete them. A zero count short-circuits
/// without executing the DELETE.
async fn delete_many_on(
    adapter: &mut EngineAdapter,
    table: &str,
    filter: &ValueMap,
) -> DbResult<u64> {
    let matched = count_rows(adapter, table, Some(filter)).await?;
    if matched == 0 {
        return Ok(0);
    }
    let mut builder = QueryBuilder::new(adapter.engine());
    let (fragment, params) = builder.where_fragment(filter);
    let sql = format!("DELETE FROM {} WHERE {}", table, fragment);
    adapter.execute(&sql, &params).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionDescriptor, EngineKind, ServerSettings};

    // Port 1 is never listening; any accidental connection attempt fails
    // with a connection error instead of a validation error, so these
    // tests also prove which checks run before the pool is touched.
    fn unreachable_service(settings: ServerSettings) -> CrudService {
        let mut registry = ConnectionRegistry::new(settings).unwrap();
        registry
            .add(
                "shop",
                ConnectionDescriptor::new(EngineKind::MySql, "127.0.0.1", 1, "root", "sekret")
                    .unwrap()
                    .with_database("shop"),
            )
            .unwrap();
        CrudService::new(registry)
    }

    fn service() -> CrudService {
        unreachable_service(ServerSettings::default())
    }

    #[tokio::test]
    async fn test_update_records_empty_filter_is_validation_error() {
        let envelope = service()
            .update_records(
                "orders",
                ValueMap::new().with("status", "closed"),
                &ValueMap::new(),
                None,
            )
            .await;
        assert!(envelope.is_error());
        let message = envelope.error_message().unwrap();
        assert!(message.contains("Validation error"), "got: {}", message);
        assert!(message.contains("WHERE filter"));
    }

    #[tokio::test]
    async fn test_delete_records_empty_filter_is_validation_error() {
        let envelope = service()
            .delete_records("orders", ValueMap::new(), true, None)
            .await;
        assert!(envelope.is_error());
        assert!(
            envelope
                .error_message()
                .unwrap()
                .contains("Validation error")
        );
    }

    #[tokio::test]
    async fn test_delete_records_requires_confirmation() {
        let filter = ValueMap::new().with("status", "stale");
        let envelope = service().delete_records("orders", filter, false, None).await;

        // Gated before any lease is taken: an unreachable host would have
        // produced a connection error instead
        assert!(envelope.is_confirmation_required());
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"status\":\"confirmation_required\""));
        assert!(json.contains("\"filter\":{\"status\":\"stale\"}"));
    }

    #[tokio::test]
    async fn test_delete_records_gate_disabled_by_settings() {
        let settings = ServerSettings {
            confirm_destructive_operations: false,
            ..Default::default()
        };
        let envelope = unreachable_service(settings)
            .delete_records("orders", ValueMap::new().with("status", "stale"), false, None)
            .await;

        // With the gate off the delete proceeds to the pool and hits the
        // unreachable host
        assert!(envelope.is_error());
        assert!(
            envelope
                .error_message()
                .unwrap()
                .contains("Connection failed")
        );
    }

    #[tokio::test]
    async fn test_insert_record_empty_data_is_validation_error() {
        let envelope = service().insert_record("orders", ValueMap::new(), None).await;
        assert!(envelope.is_error());
        assert!(
            envelope
                .error_message()
                .unwrap()
                .contains("at least one column")
        );
    }

    #[tokio::test]
    async fn test_bulk_insert_empty_records_is_validation_error() {
        let envelope = service().bulk_insert("orders", Vec::new(), None).await;
        assert!(envelope.is_error());
        assert!(
            envelope
                .error_message()
                .unwrap()
                .contains("at least one record")
        );
    }

    #[tokio::test]
    async fn test_bulk_insert_inconsistent_columns_is_validation_error() {
        let records = vec![
            ValueMap::new().with("name", "a").with("email", "a@x.y"),
            ValueMap::new().with("name", "b"),
        ];
        let envelope = service().bulk_insert("users", records, None).await;
        assert!(envelope.is_error());
        let message = envelope.error_message().unwrap();
        assert!(message.contains("Record 1"), "got: {}", message);
    }

    #[tokio::test]
    async fn test_unknown_connection_becomes_error_envelope() {
        let envelope = service()
            .count_records("orders", None, Some("warehouse"))
            .await;
        assert!(envelope.is_error());
        assert!(envelope.error_message().unwrap().contains("warehouse"));
    }

    #[tokio::test]
    async fn test_no_default_connection() {
        let registry = ConnectionRegistry::new(ServerSettings::default()).unwrap();
        let service = CrudService::new(registry);
        let envelope = service.get_server_version(None).await;
        assert!(envelope.is_error());
        assert!(
            envelope
                .error_message()
                .unwrap()
                .contains("No default connection")
        );
    }

    #[tokio::test]
    async fn test_error_envelope_never_contains_secret() {
        let envelope = service()
            .insert_record("orders", ValueMap::new().with("total", 9.99), None)
            .await;
        assert!(envelope.is_error());
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("sekret"), "secret leaked: {}", json);
    }

    #[test]
    fn test_select_options_default_is_unrestricted() {
        let options = SelectOptions::default();
        assert!(options.columns.is_none());
        assert!(options.filter.is_none());
        assert!(options.limit.is_none());
    }
}
