//! SQLite pool creation.
//!
//! Uses a concrete `SqlitePool` rather than `sqlx::AnyPool` so that
//! `#[derive(FromRow)]` works against custom types (enums, `DateTime`)
//! without an extra abstraction layer.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

use crate::error::{DbError, Result};

/// Database pool type alias.
pub type DbPool = sqlx::SqlitePool;

/// SQLite connection configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL, e.g. `sqlite:///state/dedupctl.sqlite3?mode=rwc`.
    pub url: String,
    /// Maximum connections in the pool.
    pub max_connections: u32,
}

impl DbConfig {
    /// Create configuration for a file-backed SQLite database, creating it if absent.
    pub fn sqlite(path: impl AsRef<str>) -> Self {
        Self {
            url: format!("sqlite:{}?mode=rwc", path.as_ref()),
            max_connections: 5,
        }
    }

    /// Create configuration for an in-memory SQLite database (for tests).
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }

    /// Create configuration from an already-formed URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
        }
    }

    /// Set maximum connections.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Create a SQLite pool. The pragmas the control plane relies on (WAL
/// journaling, NORMAL synchronous, in-memory temp store, foreign keys on)
/// are connection-scoped, so they're set on `SqliteConnectOptions` itself
/// rather than run once against an arbitrary pooled connection — every
/// connection the pool opens, now or later, gets them (spec §13: "on every
/// connection").
pub async fn create_pool(config: DbConfig) -> Result<DbPool> {
    let connect_options = SqliteConnectOptions::from_str(&config.url)
        .map_err(DbError::Sqlx)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .pragma("temp_store", "memory");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(connect_options)
        .await
        .map_err(DbError::Sqlx)?;

    info!(url = %redact_url(&config.url), "connected to SQLite database");
    Ok(pool)
}

fn redact_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_memory_pool_connects() {
        let config = DbConfig::sqlite_memory();
        let pool = create_pool(config).await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn file_backed_pool_enables_wal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("test.sqlite3");
        let config = DbConfig::sqlite(db_path.to_str().unwrap());
        let pool = create_pool(config).await.expect("pool");
        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("pragma read");
        assert_eq!(mode.0.to_lowercase(), "wal");
    }

    /// Regression test: pragmas set once against an arbitrary pooled
    /// connection only land on that one connection. Acquire several
    /// connections out of a multi-connection pool and check `foreign_keys`
    /// is on for each, proving the pragmas are attached to connection
    /// establishment rather than run post-hoc against the pool.
    #[tokio::test]
    async fn foreign_keys_enabled_on_every_pooled_connection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("fk.sqlite3");
        let config = DbConfig::sqlite(db_path.to_str().unwrap()).with_max_connections(5);
        let pool = create_pool(config).await.expect("pool");

        let mut conns = Vec::new();
        for _ in 0..5 {
            conns.push(pool.acquire().await.expect("acquire connection"));
        }
        for conn in &mut conns {
            let enabled: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
                .fetch_one(&mut **conn)
                .await
                .expect("pragma read");
            assert_eq!(enabled.0, 1);
        }
    }
}
