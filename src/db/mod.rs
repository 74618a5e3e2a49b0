//! Database module for PostgreSQL connection and operations
//!
//! Plan estimation, read-only execution and the query history store

pub mod connection;
pub mod postgres;
pub mod query_history;

pub use connection::init_pool;
pub use postgres::{Database, PgDatabase};
pub use query_history::{ExecutionAudit, HistoryStore, PgHistoryStore};
