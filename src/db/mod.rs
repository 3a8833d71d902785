//! Database abstraction layer.
//!
//! This module provides the engine-facing half of the crate:
//! - Engine adapters over single live connections (MySQL, PostgreSQL)
//! - Scoped transaction execution
//! - Bounded connection pooling with exclusive leases
//! - The structured query builder
//! - Parameter binding and row decoding

pub mod adapter;
pub(crate) mod bind;
pub mod builder;
pub(crate) mod decode;
pub mod mysql;
pub mod pool;
pub mod postgres;
pub mod transaction;

pub use adapter::{EngineAdapter, TransactionState};
pub use builder::{ParamStyle, QueryBuilder};
pub use mysql::MySqlAdapter;
pub use pool::{AdapterLease, ConnectionPool, PoolEntryStats, PoolStats};
pub use postgres::PostgresAdapter;
pub use transaction::TransactionScope;
