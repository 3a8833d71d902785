//! Error types for the database abstraction layer.
//!
//! All fallible operations in this crate return [`DbResult`]. The variants
//! follow the failure surface of the adapters: connection setup, statement
//! execution, transaction control, and input validation. Transaction errors
//! are fatal - once commit or rollback fails, the adapter's transactional
//! state can no longer be trusted and the connection should be discarded.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// e.g. "42P01" for undefined table
        sql_state: Option<String>,
    },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Connection '{name}' is not configured")]
    UnknownConnection { name: String },

    #[error("Connection pool for '{name}' is exhausted ({max} leases in use)")]
    PoolExhausted { name: String, max: usize },
}

impl DbError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a query error without a SQLSTATE code.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql_state: None,
        }
    }

    /// Create a query error carrying the engine's SQLSTATE code.
    pub fn query_with_state(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an unknown-connection error.
    pub fn unknown_connection(name: impl Into<String>) -> Self {
        Self::UnknownConnection { name: name.into() }
    }

    /// Create a pool-exhausted error.
    pub fn pool_exhausted(name: impl Into<String>, max: usize) -> Self {
        Self::PoolExhausted {
            name: name.into(),
            max,
        }
    }

    /// Fatal errors leave the adapter in an untrustworthy state; the holder
    /// must discard the connection rather than keep using it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transaction { .. })
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::PoolExhausted { .. })
    }

    /// Get the SQLSTATE code, if the engine reported one.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Query { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query_with_state(db_err.message(), code)
            }
            sqlx::Error::Io(io_err) => DbError::connection(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => DbError::connection(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => DbError::connection(format!("Protocol error: {}", msg)),
            sqlx::Error::PoolTimedOut => DbError::connection("Driver connection timed out"),
            sqlx::Error::PoolClosed => DbError::connection("Connection is closed"),
            sqlx::Error::RowNotFound => DbError::query("No rows returned"),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::query(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::query(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::query(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::query(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::query(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::connection("Database worker crashed"),
            _ => DbError::query(format!("Database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("host unreachable");
        assert!(err.to_string().contains("Connection failed"));

        let err = DbError::unknown_connection("analytics");
        assert!(err.to_string().contains("analytics"));
    }

    #[test]
    fn test_query_error_sql_state() {
        let err = DbError::query_with_state("syntax error", Some("42601".to_string()));
        assert_eq!(err.sql_state(), Some("42601"));
        assert_eq!(DbError::query("plain").sql_state(), None);
    }

    #[test]
    fn test_transaction_errors_are_fatal() {
        assert!(DbError::transaction("rollback failed").is_fatal());
        assert!(!DbError::query("bad sql").is_fatal());
        assert!(!DbError::validation("empty filter").is_fatal());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::connection("refused").is_retryable());
        assert!(DbError::pool_exhausted("main", 5).is_retryable());
        assert!(!DbError::query("bad sql").is_retryable());
    }

    #[test]
    fn test_from_sqlx_row_not_found() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::Query { .. }));
    }

    #[test]
    fn test_from_sqlx_pool_closed() {
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::Connection { .. }));
    }
}
