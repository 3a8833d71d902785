//! Parameter binding for database queries.
//!
//! These functions attach [`SqlValue`] parameters to engine-specific query
//! objects in positional order.

use crate::models::SqlValue;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::{MySql, Postgres};

/// Bind a value to a MySQL query.
pub(crate) fn bind_mysql_value<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Timestamp(v) => query.bind(*v),
    }
}

/// Bind a value to a PostgreSQL query.
pub(crate) fn bind_postgres_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Timestamp(v) => query.bind(*v),
    }
}
