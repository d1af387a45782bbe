//! SQLite connection pool and pragma setup for dedupctl.
//!
//! This crate owns exactly one concern: turning a database URL into a
//! ready-to-use `sqlx::SqlitePool` with the pragmas the control plane
//! requires (WAL journaling, NORMAL synchronous, in-memory temp store,
//! foreign keys on). Schema/migrations and query logic live in
//! `dedupctl_core`.

pub mod error;
pub mod pool;

pub use error::{DbError, Result};
pub use pool::{create_pool, DbConfig, DbPool};
