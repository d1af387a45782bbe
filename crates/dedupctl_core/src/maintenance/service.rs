//! WAL maintenance scheduler (spec §4.3, C6).

use chrono::{DateTime, Duration, Utc};
use dedupctl_db::DbPool;
use sqlx::Row;

use crate::error::{CoreError, Result};
use crate::maintenance::types::{WalCheckpointMode, WalMaintenanceMetrics, WalMaintenanceSnapshot, WalMaintenanceStatus};

pub struct WalMaintenanceService {
    pool: DbPool,
    default_mode: WalCheckpointMode,
    allow_truncate: bool,
    min_interval_seconds: i64,
}

struct WalMaintenanceRow {
    id: i64,
    requested_mode: String,
    status: String,
    requested_by: Option<String>,
    reason: Option<String>,
    execute_after: DateTime<Utc>,
    retry_count: i64,
    retry_after: Option<DateTime<Utc>>,
    worker_id: Option<String>,
    worker_heartbeat_at: Option<DateTime<Utc>>,
    lease_expires_at: Option<DateTime<Utc>>,
    checkpoint_busy: Option<i64>,
    checkpoint_log_frames: Option<i64>,
    checkpointed_frames: Option<i64>,
    error_code: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl WalMaintenanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            requested_mode: row.try_get("requested_mode")?,
            status: row.try_get("status")?,
            requested_by: row.try_get("requested_by")?,
            reason: row.try_get("reason")?,
            execute_after: row.try_get("execute_after")?,
            retry_count: row.try_get("retry_count")?,
            retry_after: row.try_get("retry_after")?,
            worker_id: row.try_get("worker_id")?,
            worker_heartbeat_at: row.try_get("worker_heartbeat_at")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            checkpoint_busy: row.try_get("checkpoint_busy")?,
            checkpoint_log_frames: row.try_get("checkpoint_log_frames")?,
            checkpointed_frames: row.try_get("checkpointed_frames")?,
            error_code: row.try_get("error_code")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_snapshot(self) -> Result<WalMaintenanceSnapshot> {
        Ok(WalMaintenanceSnapshot {
            id: self.id,
            requested_mode: self
                .requested_mode
                .parse()
                .map_err(|e| CoreError::query_error(format!("corrupt checkpoint mode: {e}")))?,
            status: self
                .status
                .parse()
                .map_err(|e| CoreError::query_error(format!("corrupt maintenance status: {e}")))?,
            requested_by: self.requested_by,
            reason: self.reason,
            execute_after: self.execute_after,
            retry_count: self.retry_count,
            retry_after: self.retry_after,
            worker_id: self.worker_id,
            worker_heartbeat_at: self.worker_heartbeat_at,
            lease_expires_at: self.lease_expires_at,
            checkpoint_busy: self.checkpoint_busy,
            checkpoint_log_frames: self.checkpoint_log_frames,
            checkpointed_frames: self.checkpointed_frames,
            error_code: self.error_code,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

impl WalMaintenanceService {
    pub fn new(pool: DbPool, default_mode: WalCheckpointMode, allow_truncate: bool, min_interval_seconds: i64) -> Self {
        Self {
            pool,
            default_mode,
            allow_truncate,
            min_interval_seconds,
        }
    }

    fn normalize_mode(&self, raw: Option<&str>) -> Result<WalCheckpointMode> {
        match raw {
            None => Ok(self.default_mode),
            Some(value) => value
                .trim()
                .to_lowercase()
                .parse()
                .map_err(|_| CoreError::validation(format!("invalid WAL checkpoint mode: {value}"))),
        }
    }

    pub async fn request_checkpoint(
        &self,
        mode: Option<&str>,
        reason: Option<&str>,
        requested_by: Option<&str>,
        force: bool,
    ) -> Result<WalMaintenanceSnapshot> {
        let normalized_mode = self.normalize_mode(mode)?;
        if normalized_mode == WalCheckpointMode::Truncate && !self.allow_truncate {
            return Err(CoreError::policy("WAL truncate checkpoint is disabled by policy"));
        }

        let now = Utc::now();

        if let Some(active) = self.find_active().await? {
            return Ok(active);
        }

        if !force {
            if let Some(latest_finished_at) = self.latest_completed_finished_at().await? {
                let next_allowed = latest_finished_at + Duration::seconds(self.min_interval_seconds);
                if now < next_allowed {
                    let wait_seconds = (next_allowed - now).num_seconds();
                    return Err(CoreError::rate_limited(
                        format!("WAL checkpoint is rate-limited by policy, retry after {wait_seconds} seconds"),
                        wait_seconds,
                    ));
                }
            }
        }

        let requested_by = requested_by
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .unwrap_or("api");
        let requested_by: String = requested_by.chars().take(64).collect();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO wal_maintenance_jobs \
                 (requested_mode, status, requested_by, reason, execute_after, retry_after, retry_count, created_at, updated_at) \
             VALUES (?, 'pending', ?, ?, ?, ?, 0, ?, ?) \
             RETURNING id",
        )
        .bind(normalized_mode.as_str())
        .bind(&requested_by)
        .bind(reason)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;

        self.get_by_id(id).await
    }

    async fn find_active(&self) -> Result<Option<WalMaintenanceSnapshot>> {
        let row = sqlx::query(
            "SELECT * FROM wal_maintenance_jobs WHERE status IN ('pending', 'running', 'retryable') \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;
        match row {
            Some(row) => Ok(Some(
                WalMaintenanceRow::from_row(&row)
                    .map_err(dedupctl_db::DbError::Sqlx)?
                    .into_snapshot()?,
            )),
            None => Ok(None),
        }
    }

    async fn latest_completed_finished_at(&self) -> Result<Option<DateTime<Utc>>> {
        let value: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT finished_at FROM wal_maintenance_jobs WHERE status = 'completed' \
             ORDER BY finished_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?
        .flatten();
        Ok(value)
    }

    async fn get_by_id(&self, id: i64) -> Result<WalMaintenanceSnapshot> {
        let row = sqlx::query("SELECT * FROM wal_maintenance_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(dedupctl_db::DbError::Sqlx)?
            .ok_or_else(|| CoreError::not_found(format!("WAL maintenance job not found: {id}")))?;
        WalMaintenanceRow::from_row(&row)
            .map_err(dedupctl_db::DbError::Sqlx)?
            .into_snapshot()
    }

    pub async fn get_latest(&self) -> Result<WalMaintenanceSnapshot> {
        let row = sqlx::query("SELECT * FROM wal_maintenance_jobs ORDER BY created_at DESC, id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(dedupctl_db::DbError::Sqlx)?
            .ok_or_else(|| CoreError::not_found("no WAL maintenance jobs found"))?;
        WalMaintenanceRow::from_row(&row)
            .map_err(dedupctl_db::DbError::Sqlx)?
            .into_snapshot()
    }

    pub async fn get_metrics(&self) -> Result<WalMaintenanceMetrics> {
        let now = Utc::now();

        let mut pending = 0i64;
        let mut running = 0i64;
        let mut retryable = 0i64;
        let mut failed = 0i64;
        let mut completed = 0i64;

        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM wal_maintenance_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(dedupctl_db::DbError::Sqlx)?;

        for (status, count) in rows {
            match status.parse::<WalMaintenanceStatus>() {
                Ok(WalMaintenanceStatus::Pending) => pending = count,
                Ok(WalMaintenanceStatus::Running) => running = count,
                Ok(WalMaintenanceStatus::Retryable) => retryable = count,
                Ok(WalMaintenanceStatus::Failed) => failed = count,
                Ok(WalMaintenanceStatus::Completed) => completed = count,
                Err(_) => {}
            }
        }

        let latest_completed_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(finished_at) FROM wal_maintenance_jobs WHERE status = 'completed'")
                .fetch_optional(&self.pool)
                .await
                .map_err(dedupctl_db::DbError::Sqlx)?
                .flatten();

        Ok(WalMaintenanceMetrics {
            generated_at: now,
            pending,
            running,
            retryable,
            failed,
            completed,
            latest_completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;
    use dedupctl_db::{create_pool, DbConfig};

    async fn service() -> WalMaintenanceService {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        WalMaintenanceService::new(pool, WalCheckpointMode::Passive, false, 900)
    }

    #[tokio::test]
    async fn request_then_get_latest() {
        let svc = service().await;
        let requested = svc.request_checkpoint(None, None, None, false).await.unwrap();
        assert_eq!(requested.status, WalMaintenanceStatus::Pending);
        let latest = svc.get_latest().await.unwrap();
        assert_eq!(latest.id, requested.id);
    }

    #[tokio::test]
    async fn truncate_blocked_by_policy() {
        let svc = service().await;
        let result = svc.request_checkpoint(Some("truncate"), None, None, false).await;
        assert!(matches!(result, Err(CoreError::Policy(_))));
    }

    #[tokio::test]
    async fn second_request_coalesces_with_active() {
        let svc = service().await;
        let first = svc.request_checkpoint(None, None, None, false).await.unwrap();
        let second = svc.request_checkpoint(None, None, None, false).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn metrics_reflect_pending_count() {
        let svc = service().await;
        svc.request_checkpoint(None, None, None, false).await.unwrap();
        let metrics = svc.get_metrics().await.unwrap();
        assert_eq!(metrics.pending, 1);
    }
}
