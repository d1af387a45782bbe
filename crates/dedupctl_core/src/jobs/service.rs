//! Job coordinator (spec §4.1, C4).

use chrono::{DateTime, Duration, Utc};
use dedupctl_db::DbPool;
use sqlx::Row;

use crate::error::{CoreError, Result};
use crate::jobs::types::{JobKind, JobListResult, JobSnapshot, JobStatus};

pub struct JobService {
    pool: DbPool,
    job_lock_ttl_seconds: i64,
    global_dry_run: bool,
    allow_real_delete: bool,
}

struct JobRow {
    id: String,
    kind: String,
    status: String,
    dry_run: bool,
    worker_id: Option<String>,
    worker_heartbeat_at: Option<DateTime<Utc>>,
    lease_expires_at: Option<DateTime<Utc>>,
    progress: f64,
    total_items: Option<i64>,
    processed_items: i64,
    payload: String,
    error_code: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl JobRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            dry_run: row.try_get("dry_run")?,
            worker_id: row.try_get("worker_id")?,
            worker_heartbeat_at: row.try_get("worker_heartbeat_at")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            progress: row.try_get("progress")?,
            total_items: row.try_get("total_items")?,
            processed_items: row.try_get("processed_items")?,
            payload: row.try_get("payload")?,
            error_code: row.try_get("error_code")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_snapshot(self) -> Result<JobSnapshot> {
        Ok(JobSnapshot {
            id: self.id,
            kind: self
                .kind
                .parse()
                .map_err(|e| CoreError::query_error(format!("corrupt job kind: {e}")))?,
            status: self
                .status
                .parse()
                .map_err(|e| CoreError::query_error(format!("corrupt job status: {e}")))?,
            dry_run: self.dry_run,
            worker_id: self.worker_id,
            worker_heartbeat_at: self.worker_heartbeat_at,
            lease_expires_at: self.lease_expires_at,
            progress: self.progress,
            total_items: self.total_items,
            processed_items: self.processed_items,
            payload: serde_json::from_str(&self.payload)
                .map_err(|e| CoreError::query_error(format!("corrupt job payload: {e}")))?,
            error_code: self.error_code,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

impl JobService {
    pub fn new(
        pool: DbPool,
        job_lock_ttl_seconds: u64,
        global_dry_run: bool,
        allow_real_delete: bool,
    ) -> Self {
        Self {
            pool,
            job_lock_ttl_seconds: job_lock_ttl_seconds as i64,
            global_dry_run,
            allow_real_delete,
        }
    }

    fn lease_delta(&self) -> Duration {
        Duration::seconds(self.job_lock_ttl_seconds)
    }

    fn enforce_job_policy(&self, kind: JobKind, dry_run: bool) -> Result<()> {
        if self.global_dry_run && !dry_run {
            return Err(CoreError::policy("global dry-run mode forbids real-run jobs"));
        }
        if kind == JobKind::Delete && !dry_run && !self.allow_real_delete {
            return Err(CoreError::policy("real delete is disabled by configuration"));
        }
        Ok(())
    }

    fn enforce_transition(&self, from: JobStatus, to: JobStatus) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(CoreError::invalid_state(format!(
                "illegal transition: {from} -> {to}"
            )));
        }
        Ok(())
    }

    pub async fn create_job(
        &self,
        kind: JobKind,
        payload: serde_json::Value,
        dry_run: Option<bool>,
    ) -> Result<JobSnapshot> {
        let effective_dry_run = dry_run.unwrap_or(self.global_dry_run);
        self.enforce_job_policy(kind, effective_dry_run)?;

        if kind.requires_scan_hash_mutex() {
            self.recover_stale_jobs().await?;
        }

        let job_id = dedupctl_ids::JobId::new().to_string();
        let payload_text = serde_json::to_string(&payload)
            .map_err(|e| CoreError::validation(format!("invalid payload: {e}")))?;

        let insert = sqlx::query(
            "INSERT INTO jobs (id, kind, status, dry_run, payload) VALUES (?, ?, 'pending', ?, ?)",
        )
        .bind(&job_id)
        .bind(kind.as_str())
        .bind(effective_dry_run)
        .bind(&payload_text)
        .execute(&self.pool)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &insert {
            let is_unique_violation = matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation);
            if is_unique_violation && kind.requires_scan_hash_mutex() {
                return Err(CoreError::conflict("a scan/hash job is already active"));
            }
        }
        insert.map_err(dedupctl_db::DbError::Sqlx)?;

        self.get_job(&job_id).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<JobSnapshot> {
        self.recover_stale_jobs().await?;
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(dedupctl_db::DbError::Sqlx)?
            .ok_or_else(|| CoreError::not_found(format!("job not found: {job_id}")))?;
        JobRow::from_row(&row)
            .map_err(dedupctl_db::DbError::Sqlx)?
            .into_snapshot()
    }

    pub async fn list_jobs(&self, limit: i64, cursor: Option<&str>) -> Result<JobListResult> {
        let bounded_limit = limit.clamp(1, 200);
        self.recover_stale_jobs().await?;

        let rows = if let Some(cursor) = cursor {
            let anchor = sqlx::query("SELECT created_at FROM jobs WHERE id = ?")
                .bind(cursor)
                .fetch_optional(&self.pool)
                .await
                .map_err(dedupctl_db::DbError::Sqlx)?
                .ok_or_else(|| CoreError::validation(format!("invalid pagination cursor: {cursor}")))?;
            let anchor_created_at: DateTime<Utc> = anchor
                .try_get("created_at")
                .map_err(dedupctl_db::DbError::Sqlx)?;

            sqlx::query(
                "SELECT * FROM jobs \
                 WHERE created_at < ? OR (created_at = ? AND id < ?) \
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(anchor_created_at)
            .bind(anchor_created_at)
            .bind(cursor)
            .bind(bounded_limit + 1)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?")
                .bind(bounded_limit + 1)
                .fetch_all(&self.pool)
                .await
        }
        .map_err(dedupctl_db::DbError::Sqlx)?;

        let has_more = rows.len() as i64 > bounded_limit;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows.iter().take(bounded_limit as usize) {
            items.push(JobRow::from_row(row).map_err(dedupctl_db::DbError::Sqlx)?.into_snapshot()?);
        }
        let next_cursor = if has_more {
            items.last().map(|j| j.id.clone())
        } else {
            None
        };

        Ok(JobListResult { items, next_cursor })
    }

    pub async fn claim_pending_scan_hash_job(&self, worker_id: &str) -> Result<Option<JobSnapshot>> {
        let normalized_worker_id = worker_id.trim();
        if normalized_worker_id.is_empty() {
            return Err(CoreError::validation("worker_id cannot be blank"));
        }

        self.recover_stale_jobs().await?;
        let now = Utc::now();
        let lease_expires_at = now + self.lease_delta();

        let claimed: Option<(String,)> = sqlx::query_as(
            "WITH candidate AS ( \
                 SELECT id FROM jobs \
                 WHERE kind IN ('scan', 'hash') AND status = 'pending' \
                 ORDER BY created_at ASC, id ASC LIMIT 1 \
             ) \
             UPDATE jobs SET status = 'running', \
                 started_at = COALESCE(started_at, ?), \
                 worker_id = ?, \
                 worker_heartbeat_at = ?, \
                 lease_expires_at = ?, \
                 updated_at = ? \
             WHERE id IN (SELECT id FROM candidate) AND status = 'pending' \
             RETURNING id",
        )
        .bind(now)
        .bind(normalized_worker_id)
        .bind(now)
        .bind(lease_expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;

        match claimed {
            Some((id,)) => Ok(Some(self.get_job(&id).await?)),
            None => Ok(None),
        }
    }

    pub async fn heartbeat(
        &self,
        job_id: &str,
        worker_id: &str,
        progress: Option<f64>,
        processed_items: Option<i64>,
    ) -> Result<JobSnapshot> {
        let normalized_worker_id = worker_id.trim();
        if normalized_worker_id.is_empty() {
            return Err(CoreError::validation("worker_id cannot be blank"));
        }

        let snapshot = self.get_job_raw(job_id).await?;
        if snapshot.status != JobStatus::Running {
            return Err(CoreError::invalid_state(format!("job {job_id} is not running")));
        }

        let now = Utc::now();
        if snapshot.lease_expires_at.map(|exp| exp <= now).unwrap_or(true) {
            self.enforce_transition(snapshot.status, JobStatus::Retryable)?;
            sqlx::query(
                "UPDATE jobs SET status = 'retryable', error_code = 'LEASE_EXPIRED', \
                 error_message = 'Lease expired before heartbeat', finished_at = ?, updated_at = ?, \
                 worker_id = NULL, worker_heartbeat_at = NULL, lease_expires_at = NULL \
                 WHERE id = ?",
            )
            .bind(now)
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(dedupctl_db::DbError::Sqlx)?;
            return Err(CoreError::conflict("lease expired"));
        }

        if let Some(current_owner) = &snapshot.worker_id {
            if current_owner != normalized_worker_id {
                return Err(CoreError::conflict("job is already bound to a different worker"));
            }
        }

        if let Some(p) = progress {
            if !(0.0..=1.0).contains(&p) {
                return Err(CoreError::validation("progress must be in [0.0, 1.0]"));
            }
        }
        if let Some(n) = processed_items {
            if n < 0 {
                return Err(CoreError::validation("processed_items must be >= 0"));
            }
        }

        let lease_expires_at = now + self.lease_delta();
        sqlx::query(
            "UPDATE jobs SET \
                 progress = COALESCE(?, progress), \
                 processed_items = COALESCE(?, processed_items), \
                 worker_id = ?, worker_heartbeat_at = ?, lease_expires_at = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(progress)
        .bind(processed_items)
        .bind(normalized_worker_id)
        .bind(now)
        .bind(lease_expires_at)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;

        self.get_job(job_id).await
    }

    pub async fn finish_job(
        &self,
        job_id: &str,
        worker_id: &str,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<JobSnapshot> {
        let normalized_worker_id = worker_id.trim();
        if normalized_worker_id.is_empty() {
            return Err(CoreError::validation("worker_id cannot be blank"));
        }

        let snapshot = self.get_job_raw(job_id).await?;
        if snapshot.status != JobStatus::Running {
            return Err(CoreError::invalid_state(format!("job {job_id} is not running")));
        }
        if snapshot.worker_id.as_deref() != Some(normalized_worker_id) {
            return Err(CoreError::conflict("only the current lease owner can finish the job"));
        }

        let next_status = if success { JobStatus::Completed } else { JobStatus::Failed };
        self.enforce_transition(snapshot.status, next_status)?;

        let now = Utc::now();
        let progress = if success { 1.0 } else { snapshot.progress };
        let error_code = if success { None } else { Some("WORKER_FAILURE") };

        sqlx::query(
            "UPDATE jobs SET status = ?, progress = ?, error_message = ?, error_code = ?, \
                 finished_at = ?, worker_heartbeat_at = ?, lease_expires_at = NULL, updated_at = ? \
             WHERE id = ?",
        )
        .bind(next_status.as_str())
        .bind(progress)
        .bind(error_message)
        .bind(error_code)
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;

        self.get_job(job_id).await
    }

    pub async fn reset_retryable_job(&self, job_id: &str) -> Result<JobSnapshot> {
        let snapshot = self.get_job_raw(job_id).await?;
        self.enforce_transition(snapshot.status, JobStatus::Pending)?;

        let now = Utc::now();
        sqlx::query(
            "UPDATE jobs SET status = 'pending', worker_id = NULL, worker_heartbeat_at = NULL, \
                 lease_expires_at = NULL, error_code = NULL, error_message = NULL, \
                 finished_at = NULL, updated_at = ? \
             WHERE id = ?",
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;

        self.get_job(job_id).await
    }

    pub async fn cancel_job(&self, job_id: &str, error_message: Option<&str>) -> Result<JobSnapshot> {
        let snapshot = self.get_job_raw(job_id).await?;
        self.enforce_transition(snapshot.status, JobStatus::Cancelled)?;

        let now = Utc::now();
        sqlx::query(
            "UPDATE jobs SET status = 'cancelled', finished_at = ?, updated_at = ?, \
                 lease_expires_at = NULL, \
                 error_message = COALESCE(?, error_message) \
             WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(error_message)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;

        self.get_job(job_id).await
    }

    /// Move running scan/hash jobs whose lease has expired (or was never
    /// set) into `retryable`. Returns the number of jobs recovered.
    pub async fn recover_stale_jobs(&self) -> Result<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'retryable', error_code = 'LEASE_EXPIRED', \
                 error_message = 'Lease expired and recovered by control plane', \
                 finished_at = ?, updated_at = ?, worker_id = NULL, worker_heartbeat_at = NULL, \
                 lease_expires_at = NULL \
             WHERE status = 'running' AND kind IN ('scan', 'hash') \
               AND (lease_expires_at IS NULL OR lease_expires_at <= ?)",
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;

        Ok(result.rows_affected())
    }

    async fn get_job_raw(&self, job_id: &str) -> Result<JobSnapshot> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(dedupctl_db::DbError::Sqlx)?
            .ok_or_else(|| CoreError::not_found(format!("job not found: {job_id}")))?;
        JobRow::from_row(&row)
            .map_err(dedupctl_db::DbError::Sqlx)?
            .into_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;
    use dedupctl_db::{create_pool, DbConfig};

    async fn service() -> JobService {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        JobService::new(pool, 300, true, false)
    }

    #[tokio::test]
    async fn create_and_get_round_trips() {
        let svc = service().await;
        let job = svc
            .create_job(JobKind::Scan, serde_json::json!({"root": "a"}), None)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        let fetched = svc.get_job(&job.id).await.unwrap();
        assert_eq!(fetched.id, job.id);
    }

    #[tokio::test]
    async fn second_scan_job_conflicts() {
        let svc = service().await;
        svc.create_job(JobKind::Scan, serde_json::json!({}), None)
            .await
            .unwrap();
        let second = svc.create_job(JobKind::Hash, serde_json::json!({}), None).await;
        assert!(matches!(second, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn real_delete_blocked_without_allow_flag() {
        let svc = service().await;
        let result = svc
            .create_job(JobKind::Delete, serde_json::json!({}), Some(false))
            .await;
        assert!(matches!(result, Err(CoreError::Policy(_))));
    }

    #[tokio::test]
    async fn claim_then_heartbeat_then_finish() {
        let svc = service().await;
        let job = svc.create_job(JobKind::Scan, serde_json::json!({}), None).await.unwrap();
        let claimed = svc.claim_pending_scan_hash_job("worker-1").await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Running);

        let beat = svc
            .heartbeat(&job.id, "worker-1", Some(0.5), Some(10))
            .await
            .unwrap();
        assert_eq!(beat.progress, 0.5);

        let finished = svc.finish_job(&job.id, "worker-1", true, None).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress, 1.0);
    }

    #[tokio::test]
    async fn heartbeat_from_wrong_worker_conflicts() {
        let svc = service().await;
        let job = svc.create_job(JobKind::Scan, serde_json::json!({}), None).await.unwrap();
        svc.claim_pending_scan_hash_job("worker-1").await.unwrap();
        let result = svc.heartbeat(&job.id, "worker-2", None, None).await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn cancel_is_terminal() {
        let svc = service().await;
        let job = svc.create_job(JobKind::Scan, serde_json::json!({}), None).await.unwrap();
        svc.cancel_job(&job.id, Some("operator request")).await.unwrap();
        let result = svc.cancel_job(&job.id, None).await;
        assert!(matches!(result, Err(CoreError::InvalidState(_))));
    }

    /// S2: a heartbeat that lands after `lease_expires_at` flips the job to
    /// retryable, clears the lease fields, and raises Conflict instead of
    /// silently accepting a heartbeat from a worker that already lost its lease.
    #[tokio::test]
    async fn heartbeat_past_lease_expiry_demotes_to_retryable() {
        let svc = service().await;
        let job = svc.create_job(JobKind::Scan, serde_json::json!({}), None).await.unwrap();
        svc.claim_pending_scan_hash_job("worker-1").await.unwrap();

        sqlx::query("UPDATE jobs SET lease_expires_at = datetime('now', '-10 seconds') WHERE id = ?")
            .bind(&job.id)
            .execute(&svc.pool)
            .await
            .unwrap();

        let result = svc.heartbeat(&job.id, "worker-1", None, None).await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));

        let fetched = svc.get_job(&job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Retryable);
        assert_eq!(fetched.error_code.as_deref(), Some("LEASE_EXPIRED"));
        assert!(fetched.worker_id.is_none());
        assert!(fetched.lease_expires_at.is_none());
    }
}
