//! Integration tests against a live PostgreSQL server.
//!
//! These tests skip unless TEST_POSTGRES_HOST is set. Optional variables:
//! TEST_POSTGRES_PORT (5432), TEST_POSTGRES_USER (postgres),
//! TEST_POSTGRES_PASSWORD (empty), TEST_POSTGRES_DATABASE (postgres).
//!
//! Example:
//!   TEST_POSTGRES_HOST=localhost TEST_POSTGRES_PASSWORD=postgres \
//!   cargo test --test postgres_crud_test

use db_connect::{
    ConnectionDescriptor, ConnectionRegistry, CrudService, DbError, EngineAdapter, EngineKind,
    SelectOptions, ServerSettings, SqlValue, TransactionScope, ValueMap,
};

fn postgres_descriptor() -> Option<ConnectionDescriptor> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let host = match std::env::var("TEST_POSTGRES_HOST") {
        Ok(host) => host,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_HOST not set");
            return None;
        }
    };
    let port = std::env::var("TEST_POSTGRES_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5432);
    let user = std::env::var("TEST_POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = std::env::var("TEST_POSTGRES_PASSWORD").unwrap_or_default();
    let database =
        std::env::var("TEST_POSTGRES_DATABASE").unwrap_or_else(|_| "postgres".to_string());

    Some(
        ConnectionDescriptor::new(EngineKind::Postgres, host, port, user, password)
            .unwrap()
            .with_database(database),
    )
}

fn registry(descriptor: ConnectionDescriptor) -> ConnectionRegistry {
    let mut registry = ConnectionRegistry::new(ServerSettings::default()).unwrap();
    registry.add("it_postgres", descriptor).unwrap();
    registry
}

async fn setup_table(descriptor: &ConnectionDescriptor, table: &str, ddl: &str) {
    let mut adapter = EngineAdapter::new(descriptor.clone());
    adapter.connect().await.unwrap();
    adapter.execute(ddl, &[]).await.unwrap();
    adapter
        .execute(&format!("DELETE FROM {}", table), &[])
        .await
        .unwrap();
    adapter.disconnect().await;
}

#[tokio::test]
async fn test_crud_end_to_end() {
    let Some(descriptor) = postgres_descriptor() else {
        return;
    };
    setup_table(
        &descriptor,
        "dbc_orders",
        "CREATE TABLE IF NOT EXISTS dbc_orders (
            id SERIAL PRIMARY KEY,
            customer_id INT NOT NULL,
            total NUMERIC(10,2) NOT NULL,
            status VARCHAR(32) NOT NULL DEFAULT 'open'
        )",
    )
    .await;

    let service = CrudService::new(registry(descriptor));

    let data = ValueMap::new()
        .with("customer_id", 1)
        .with("total", 9.99)
        .with("status", "open");
    let inserted = service.insert_record("dbc_orders", data, None).await;
    let payload = inserted.payload().unwrap_or_else(|| {
        panic!("insert failed: {:?}", inserted.error_message());
    });
    assert_eq!(payload.rows_affected, 1);
    // PostgreSQL has no session last-insert-id; RETURNING is the native way
    assert!(payload.last_insert_id.is_none());

    let selected = service
        .select_records(
            "dbc_orders",
            SelectOptions {
                columns: Some(vec!["customer_id".to_string(), "total".to_string()]),
                filter: Some(ValueMap::new().with("customer_id", 1)),
                order_by: Some("customer_id ASC".to_string()),
                limit: Some(10),
            },
            None,
        )
        .await;
    let selection = selected.payload().unwrap();
    assert_eq!(selection.count, 1);
    // NUMERIC comes back as its exact text representation
    assert_eq!(
        selection.records[0].get("total").unwrap().as_text(),
        Some("9.99")
    );
    // Projection drops the unlisted columns
    assert!(selection.records[0].get("status").is_none());

    let counted = service
        .count_records("dbc_orders", Some(&ValueMap::new().with("customer_id", 1)), None)
        .await;
    assert_eq!(counted.payload().unwrap().count, 1);

    let updated = service
        .update_records(
            "dbc_orders",
            ValueMap::new().with("status", "closed"),
            &ValueMap::new().with("customer_id", 1),
            None,
        )
        .await;
    assert_eq!(updated.payload().unwrap().rows_affected, 1);

    let missing = service
        .get_record_by_id("dbc_orders", SqlValue::Int(999_999_999), None, None)
        .await;
    assert!(!missing.payload().unwrap().found);

    let deleted = service
        .delete_records("dbc_orders", ValueMap::new().with("status", "closed"), true, None)
        .await;
    assert_eq!(deleted.payload().unwrap().rows_affected, 1);

    service.shutdown().await;
}

#[tokio::test]
async fn test_transaction_scope_and_execute_many() {
    let Some(descriptor) = postgres_descriptor() else {
        return;
    };
    setup_table(
        &descriptor,
        "dbc_tx",
        "CREATE TABLE IF NOT EXISTS dbc_tx (
            id INT PRIMARY KEY,
            name VARCHAR(50) NOT NULL
        )",
    )
    .await;

    let mut adapter = EngineAdapter::new(descriptor);
    adapter.connect().await.unwrap();

    let result: Result<(), DbError> = TransactionScope::run(&mut adapter, |adapter| {
        Box::pin(async move {
            adapter
                .execute("INSERT INTO dbc_tx (id, name) VALUES ($1, $2)", &[
                    SqlValue::Int(1),
                    SqlValue::Text("ghost".to_string()),
                ])
                .await?;
            Err(DbError::validation("caller changed its mind"))
        })
    })
    .await;
    assert!(result.is_err());

    let row = adapter
        .fetch_one("SELECT COUNT(*) AS total FROM dbc_tx", &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("total").unwrap().as_int(), Some(0));

    // Batch with a duplicate key: all-or-nothing
    let sets = vec![
        vec![SqlValue::Int(5), SqlValue::Text("a".to_string())],
        vec![SqlValue::Int(5), SqlValue::Text("b".to_string())],
    ];
    let result = adapter
        .execute_many("INSERT INTO dbc_tx (id, name) VALUES ($1, $2)", &sets)
        .await;
    assert!(result.is_err());

    let row = adapter
        .fetch_one("SELECT COUNT(*) AS total FROM dbc_tx", &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get("total").unwrap().as_int(), Some(0));

    // Clean batch applies fully
    let sets = vec![
        vec![SqlValue::Int(6), SqlValue::Text("a".to_string())],
        vec![SqlValue::Int(7), SqlValue::Text("b".to_string())],
    ];
    let total = adapter
        .execute_many("INSERT INTO dbc_tx (id, name) VALUES ($1, $2)", &sets)
        .await
        .unwrap();
    assert_eq!(total, 2);

    adapter.disconnect().await;
}

#[tokio::test]
async fn test_introspection_is_schema_scoped() {
    let Some(descriptor) = postgres_descriptor() else {
        return;
    };
    setup_table(
        &descriptor,
        "dbc_schema_probe",
        "CREATE TABLE IF NOT EXISTS dbc_schema_probe (
            id SERIAL PRIMARY KEY,
            label VARCHAR(64)
        )",
    )
    .await;

    let service = CrudService::new(registry(descriptor));

    // Default scope is the public schema
    let tables = service.list_tables(None, None).await;
    assert!(
        tables
            .payload()
            .unwrap()
            .tables
            .contains(&"dbc_schema_probe".to_string())
    );

    // An explicit scope names a schema; an empty one lists nothing
    let tables = service.list_tables(Some("no_such_schema"), None).await;
    assert_eq!(tables.payload().unwrap().count, 0);

    let schema = service.get_table_schema("dbc_schema_probe", None, None).await;
    let columns = &schema.payload().unwrap().columns;
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[0].name, "id");
    assert!(!columns[0].nullable);
    assert!(columns[0].default_value.is_some(), "serial has a default");
    assert_eq!(columns[1].max_length, Some(64));

    let version = service.get_server_version(None).await;
    assert!(version.payload().unwrap().version.contains("PostgreSQL"));

    let databases = service.list_databases(None).await;
    assert!(databases.payload().unwrap().count > 0);

    service.shutdown().await;
}
