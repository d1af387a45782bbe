//! Schema/migration engine (spec §4.5, C3).
//!
//! Migrations are an ordered, versioned list of idempotent steps recorded
//! in `schema_migrations`. Each migration runs in its own transaction,
//! committed independently — unlike a single big transaction wrapping the
//! whole run, a later migration's failure does not roll back the ones
//! that already landed. Every `CREATE TABLE`/`CREATE INDEX` below is
//! `IF NOT EXISTS`, so on a store seeded by an older binary a migration
//! degenerates to a no-op once its object already exists, and becomes a
//! genuine repair only when it doesn't.

use dedupctl_db::DbPool;
use tracing::info;

use crate::error::{CoreError, Result};

struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

/// Keeps the single oldest `running` scan/hash job, demoting any other
/// `running` scan/hash rows to `retryable`. Run before the partial unique
/// index is (re)built, since the index creation itself would fail against
/// pre-existing duplicates. A no-op on a store with zero or one such row.
const MUTEX_RECOVERY_SQL: &str = r#"
UPDATE jobs
SET status = 'retryable',
    error_code = 'MIGRATION_MUTEX_RECOVERY',
    error_message = 'Demoted by schema migration: duplicate running scan/hash job',
    worker_id = NULL,
    worker_heartbeat_at = NULL,
    lease_expires_at = NULL,
    finished_at = strftime('%Y-%m-%dT%H:%M:%fZ','now'),
    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
WHERE kind IN ('scan', 'hash')
  AND status = 'running'
  AND id NOT IN (
      SELECT id FROM jobs
      WHERE kind IN ('scan', 'hash') AND status = 'running'
      ORDER BY created_at ASC, id ASC
      LIMIT 1
  )
"#;

/// Keeps a single winner among `pending`/`running` scan/hash jobs per kind
/// (preferring `running` over `pending`, then the oldest), demoting the
/// rest to `retryable`. Runs after `MUTEX_RECOVERY_SQL` so at most one
/// `running` row per kind remains before this ranks pending against it.
const ACTIVE_RECOVERY_SQL: &str = r#"
WITH ranked AS (
    SELECT id, ROW_NUMBER() OVER (
        PARTITION BY kind
        ORDER BY CASE status WHEN 'running' THEN 0 ELSE 1 END, created_at ASC, id ASC
    ) AS rn
    FROM jobs
    WHERE kind IN ('scan', 'hash') AND status IN ('pending', 'running')
)
UPDATE jobs
SET status = 'retryable',
    error_code = 'MIGRATION_ACTIVE_RECOVERY',
    error_message = 'Demoted by schema migration: duplicate active scan/hash job',
    worker_id = NULL,
    worker_heartbeat_at = NULL,
    lease_expires_at = NULL,
    finished_at = strftime('%Y-%m-%dT%H:%M:%fZ','now'),
    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
WHERE id IN (SELECT id FROM ranked WHERE rn > 1)
"#;

/// One-time-per-run normalization of historically mixed-case enum columns
/// (spec §9 "Enum storage drift"). Idempotent: already-lowercase values are
/// unaffected by `LOWER(x) = x` being true, and the `WHERE` guard means the
/// `UPDATE` touches zero rows on a clean store.
const ENUM_NORMALIZATION_SQL: &[&str] = &[
    "UPDATE jobs SET kind = LOWER(kind) WHERE kind <> LOWER(kind)",
    "UPDATE jobs SET status = LOWER(status) WHERE status <> LOWER(status)",
    "UPDATE scan_sessions SET status = LOWER(status) WHERE status <> LOWER(status)",
    "UPDATE library_files SET hash_algorithm = LOWER(hash_algorithm) \
     WHERE hash_algorithm IS NOT NULL AND hash_algorithm <> LOWER(hash_algorithm)",
    "UPDATE thumbnails SET status = LOWER(status) WHERE status <> LOWER(status)",
    "UPDATE thumbnails SET format = LOWER(format) WHERE format <> LOWER(format)",
    "UPDATE thumbnail_cleanup_jobs SET status = LOWER(status) WHERE status <> LOWER(status)",
    "UPDATE wal_maintenance_jobs SET status = LOWER(status) WHERE status <> LOWER(status)",
    "UPDATE wal_maintenance_jobs SET requested_mode = LOWER(requested_mode) \
     WHERE requested_mode <> LOWER(requested_mode)",
];

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core_tables",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                dry_run INTEGER NOT NULL DEFAULT 1,
                worker_id TEXT,
                worker_heartbeat_at TEXT,
                lease_expires_at TEXT,
                progress REAL NOT NULL DEFAULT 0.0,
                total_items INTEGER,
                processed_items INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL DEFAULT '{}',
                error_code TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                started_at TEXT,
                finished_at TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_jobs_kind_status ON jobs(kind, status)",
            "CREATE INDEX IF NOT EXISTS ix_jobs_running_lease ON jobs(status, lease_expires_at)",
            "CREATE INDEX IF NOT EXISTS ix_jobs_created_at ON jobs(created_at)",
            "CREATE INDEX IF NOT EXISTS ix_jobs_created_id ON jobs(created_at, id)",
            "CREATE INDEX IF NOT EXISTS ix_jobs_status_updated ON jobs(status, updated_at)",
        ],
    },
    Migration {
        version: 2,
        name: "single_active_scan_hash_mutex",
        statements: &[
            MUTEX_RECOVERY_SQL,
            ACTIVE_RECOVERY_SQL,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS ix_jobs_single_active_scan_hash
            ON jobs((1))
            WHERE kind IN ('scan', 'hash') AND status IN ('pending', 'running', 'retryable')
            "#,
        ],
    },
    Migration {
        version: 3,
        name: "library_roots_and_scan_sessions",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS library_roots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                root_path TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                last_scanned_at TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_library_roots_last_scanned_at ON library_roots(last_scanned_at)",
            r#"
            CREATE TABLE IF NOT EXISTS scan_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL DEFAULT 'running',
                started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                finished_at TEXT,
                error_message TEXT,
                files_seen INTEGER NOT NULL DEFAULT 0,
                directories_seen INTEGER NOT NULL DEFAULT 0,
                bytes_seen INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_scan_sessions_status_started ON scan_sessions(status, started_at)",
            "CREATE INDEX IF NOT EXISTS ix_scan_sessions_finished_at ON scan_sessions(finished_at)",
        ],
    },
    Migration {
        version: 4,
        name: "library_files",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS library_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                library_id INTEGER NOT NULL REFERENCES library_roots(id) ON DELETE CASCADE,
                relative_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                mtime_ns INTEGER NOT NULL,
                inode INTEGER,
                device INTEGER,
                is_missing INTEGER NOT NULL DEFAULT 0,
                needs_hash INTEGER NOT NULL DEFAULT 1,
                last_seen_scan_id INTEGER REFERENCES scan_sessions(id) ON DELETE SET NULL,
                hash_algorithm TEXT,
                content_hash BLOB,
                hashed_size_bytes INTEGER,
                hashed_mtime_ns INTEGER,
                hashed_at TEXT,
                hash_error_count INTEGER NOT NULL DEFAULT 0,
                hash_last_error TEXT,
                hash_last_error_at TEXT,
                hash_retry_after TEXT,
                hash_claim_token TEXT,
                hash_claimed_at TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                UNIQUE(library_id, relative_path)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_library_files_library_seen ON library_files(library_id, last_seen_scan_id)",
            "CREATE INDEX IF NOT EXISTS ix_library_files_needs_hash ON library_files(needs_hash, is_missing, id)",
            "CREATE INDEX IF NOT EXISTS ix_library_files_hash_lookup ON library_files(hash_algorithm, content_hash, size_bytes, is_missing)",
            "CREATE INDEX IF NOT EXISTS ix_library_files_dedup_group ON library_files(is_missing, needs_hash, hash_algorithm, content_hash, id)",
            "CREATE INDEX IF NOT EXISTS ix_library_files_library_path ON library_files(library_id, relative_path)",
            "CREATE INDEX IF NOT EXISTS ix_library_files_library_mtime_size ON library_files(library_id, mtime_ns, size_bytes)",
            "CREATE INDEX IF NOT EXISTS ix_library_files_hash_retry ON library_files(needs_hash, is_missing, hash_retry_after, id)",
            "CREATE INDEX IF NOT EXISTS ix_library_files_hash_claimed ON library_files(hash_claim_token, hash_claimed_at)",
        ],
    },
    Migration {
        version: 5,
        name: "thumbnails_and_cleanup",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS thumbnails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thumb_key TEXT NOT NULL UNIQUE,
                file_id INTEGER NOT NULL REFERENCES library_files(id) ON DELETE CASCADE,
                group_key TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                media_type TEXT NOT NULL,
                format TEXT NOT NULL DEFAULT 'jpeg',
                max_dimension INTEGER NOT NULL DEFAULT 256,
                version INTEGER NOT NULL DEFAULT 1,
                source_size_bytes INTEGER NOT NULL,
                source_mtime_ns INTEGER NOT NULL,
                output_relpath TEXT,
                width INTEGER,
                height INTEGER,
                bytes_size INTEGER,
                error_code TEXT,
                error_message TEXT,
                error_count INTEGER NOT NULL DEFAULT 0,
                retry_after TEXT,
                worker_id TEXT,
                worker_heartbeat_at TEXT,
                lease_expires_at TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                started_at TEXT,
                finished_at TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_thumbnails_status_retry ON thumbnails(status, retry_after, id)",
            "CREATE INDEX IF NOT EXISTS ix_thumbnails_file_variant ON thumbnails(file_id, max_dimension, format)",
            "CREATE INDEX IF NOT EXISTS ix_thumbnails_group_status ON thumbnails(group_key, status)",
            "CREATE INDEX IF NOT EXISTS ix_thumbnails_running_lease ON thumbnails(status, lease_expires_at)",
            "CREATE INDEX IF NOT EXISTS ix_thumbnails_updated ON thumbnails(updated_at)",
            r#"
            CREATE TABLE IF NOT EXISTS thumbnail_cleanup_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_key TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending',
                execute_after TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                worker_id TEXT,
                worker_heartbeat_at TEXT,
                lease_expires_at TEXT,
                error_code TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                finished_at TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_thumbnail_cleanup_status_execute ON thumbnail_cleanup_jobs(status, execute_after)",
            "CREATE INDEX IF NOT EXISTS ix_thumbnail_cleanup_running_lease ON thumbnail_cleanup_jobs(status, lease_expires_at)",
            "CREATE INDEX IF NOT EXISTS ix_thumbnail_cleanup_updated ON thumbnail_cleanup_jobs(updated_at)",
        ],
    },
    Migration {
        version: 6,
        name: "mutex_repair_rerun",
        statements: &[MUTEX_RECOVERY_SQL, ACTIVE_RECOVERY_SQL],
    },
    Migration {
        version: 7,
        name: "wal_maintenance_jobs",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS wal_maintenance_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                requested_mode TEXT NOT NULL DEFAULT 'passive',
                status TEXT NOT NULL DEFAULT 'pending',
                requested_by TEXT,
                reason TEXT,
                execute_after TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                retry_count INTEGER NOT NULL DEFAULT 0,
                retry_after TEXT,
                worker_id TEXT,
                worker_heartbeat_at TEXT,
                lease_expires_at TEXT,
                checkpoint_busy INTEGER,
                checkpoint_log_frames INTEGER,
                checkpointed_frames INTEGER,
                error_code TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                started_at TEXT,
                finished_at TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS ix_wal_jobs_status_execute ON wal_maintenance_jobs(status, execute_after, id)",
            "CREATE INDEX IF NOT EXISTS ix_wal_jobs_retry_after ON wal_maintenance_jobs(status, retry_after, id)",
            "CREATE INDEX IF NOT EXISTS ix_wal_jobs_running_lease ON wal_maintenance_jobs(status, lease_expires_at)",
            "CREATE INDEX IF NOT EXISTS ix_wal_jobs_created_at ON wal_maintenance_jobs(created_at)",
        ],
    },
    Migration {
        version: 8,
        name: "io_rate_limits",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS io_rate_limits (
                bucket_key TEXT PRIMARY KEY,
                next_available_at_ms INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            )
            "#,
        ],
    },
    Migration {
        version: 9,
        name: "enum_normalization",
        statements: ENUM_NORMALIZATION_SQL,
    },
];

/// Run every migration that has not yet been recorded in
/// `schema_migrations`, each in its own transaction, in ascending version
/// order.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    ensure_migrations_table(pool).await?;

    for migration in MIGRATIONS {
        if is_applied(pool, migration.version).await? {
            continue;
        }

        let mut tx = pool.begin().await.map_err(dedupctl_db::DbError::Sqlx)?;
        for statement in migration.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(dedupctl_db::DbError::Sqlx)?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await
            .map_err(dedupctl_db::DbError::Sqlx)?;
        tx.commit().await.map_err(dedupctl_db::DbError::Sqlx)?;

        info!(version = migration.version, name = migration.name, "applied migration");
    }

    Ok(())
}

async fn ensure_migrations_table(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(dedupctl_db::DbError::Sqlx)?;
    Ok(())
}

async fn is_applied(pool: &DbPool, version: i64) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM schema_migrations WHERE version = ?")
        .bind(version)
        .fetch_optional(pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;
    Ok(row.is_some())
}

/// Highest applied migration version, or `CoreError::QueryError` if the
/// table somehow holds no rows after `run_migrations` succeeded.
pub async fn current_version(pool: &DbPool) -> Result<i64> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT MAX(version) FROM schema_migrations")
        .fetch_optional(pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;
    row.map(|(v,)| v)
        .ok_or_else(|| CoreError::query_error("no migrations have been applied"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupctl_db::{create_pool, DbConfig};

    #[tokio::test]
    async fn fresh_database_applies_every_migration() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let version = current_version(&pool).await.unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn repair_demotes_duplicate_running_scan_jobs() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();

        // Seed a pre-v2 store: two "running" scan jobs, no mutex index yet.
        sqlx::query(
            r#"
            CREATE TABLE jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                dry_run INTEGER NOT NULL DEFAULT 1,
                worker_id TEXT,
                worker_heartbeat_at TEXT,
                lease_expires_at TEXT,
                progress REAL NOT NULL DEFAULT 0.0,
                total_items INTEGER,
                processed_items INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL DEFAULT '{}',
                error_code TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
                started_at TEXT,
                finished_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO jobs (id, kind, status, created_at) VALUES \
             ('older', 'scan', 'running', '2020-01-01T00:00:00Z'), \
             ('newer', 'scan', 'running', '2020-01-02T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        run_migrations(&pool).await.unwrap();

        let older_status: (String,) = sqlx::query_as("SELECT status FROM jobs WHERE id = 'older'")
            .fetch_one(&pool)
            .await
            .unwrap();
        let newer: (String, Option<String>) =
            sqlx::query_as("SELECT status, error_code FROM jobs WHERE id = 'newer'")
                .fetch_one(&pool)
                .await
                .unwrap();

        assert_eq!(older_status.0, "running");
        assert_eq!(newer.0, "retryable");
        assert_eq!(newer.1.as_deref(), Some("MIGRATION_MUTEX_RECOVERY"));
    }

    #[tokio::test]
    async fn admission_mutex_rejects_second_active_scan_job() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO jobs (id, kind, status) VALUES ('a', 'scan', 'pending')")
            .execute(&pool)
            .await
            .unwrap();

        let second = sqlx::query("INSERT INTO jobs (id, kind, status) VALUES ('b', 'scan', 'running')")
            .execute(&pool)
            .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn admission_mutex_spans_scan_and_hash_kinds() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO jobs (id, kind, status) VALUES ('a', 'scan', 'pending')")
            .execute(&pool)
            .await
            .unwrap();

        let second = sqlx::query("INSERT INTO jobs (id, kind, status) VALUES ('b', 'hash', 'pending')")
            .execute(&pool)
            .await;
        assert!(second.is_err());
    }
}
