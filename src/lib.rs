//! db-connect
//!
//! A uniform CRUD and schema-introspection layer over MySQL- and
//! PostgreSQL-compatible engines, so callers need no engine-specific code.
//!
//! The pieces, bottom up:
//! - [`EngineAdapter`]: one live connection per instance, with a single
//!   capability set across both engines
//! - [`TransactionScope`]: guaranteed commit-or-rollback around a body of
//!   statements
//! - [`ConnectionPool`]: bounded, name-keyed reuse via exclusive leases
//! - [`QueryBuilder`]: ordered column/value maps to parameterized SQL
//! - [`CrudService`]: the nine CRUD/introspection operations, returning
//!   structured result envelopes

pub mod config;
pub mod crud;
pub mod db;
pub mod error;
pub mod models;

pub use config::{ConnectionDescriptor, ConnectionRegistry, EngineKind, ServerSettings};
pub use crud::{CrudService, SelectOptions};
pub use db::{
    AdapterLease, ConnectionPool, EngineAdapter, QueryBuilder, TransactionScope, TransactionState,
};
pub use error::{DbError, DbResult};
pub use models::{ColumnInfo, Envelope, SqlValue, ValueMap};
