//! Thumbnail queue (spec §4.2, C5).

use chrono::{DateTime, Duration, Utc};
use dedupctl_db::DbPool;
use sha2::{Digest, Sha256};
use sqlx::Row;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::path_safety::{resolve_under_libraries, validate_library_relative_path};
use crate::thumbs::types::{
    ThumbnailCleanupSnapshot, ThumbnailCleanupStatus, ThumbnailFormat, ThumbnailMediaType,
    ThumbnailMetricsSnapshot, ThumbnailSnapshot, ThumbnailStatus,
};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "mkv", "webm", "mpeg", "mpg", "wmv"];

pub struct ThumbnailService {
    pool: DbPool,
    libraries_root: PathBuf,
    thumbs_root: PathBuf,
    default_format: ThumbnailFormat,
    max_dimension: i64,
    queue_capacity: i64,
    cleanup_delay_seconds: i64,
}

struct LibraryFileRow {
    id: i64,
    library_id: i64,
    relative_path: String,
    size_bytes: i64,
    mtime_ns: i64,
    is_missing: bool,
    hash_algorithm: Option<String>,
    content_hash: Option<Vec<u8>>,
}

struct ThumbnailRow {
    id: i64,
    thumb_key: String,
    file_id: i64,
    group_key: Option<String>,
    status: String,
    media_type: String,
    format: String,
    max_dimension: i64,
    version: i64,
    source_size_bytes: i64,
    source_mtime_ns: i64,
    output_relpath: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    bytes_size: Option<i64>,
    error_code: Option<String>,
    error_message: Option<String>,
    error_count: i64,
    retry_after: Option<DateTime<Utc>>,
    worker_id: Option<String>,
    worker_heartbeat_at: Option<DateTime<Utc>>,
    lease_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl ThumbnailRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            thumb_key: row.try_get("thumb_key")?,
            file_id: row.try_get("file_id")?,
            group_key: row.try_get("group_key")?,
            status: row.try_get("status")?,
            media_type: row.try_get("media_type")?,
            format: row.try_get("format")?,
            max_dimension: row.try_get("max_dimension")?,
            version: row.try_get("version")?,
            source_size_bytes: row.try_get("source_size_bytes")?,
            source_mtime_ns: row.try_get("source_mtime_ns")?,
            output_relpath: row.try_get("output_relpath")?,
            width: row.try_get("width")?,
            height: row.try_get("height")?,
            bytes_size: row.try_get("bytes_size")?,
            error_code: row.try_get("error_code")?,
            error_message: row.try_get("error_message")?,
            error_count: row.try_get("error_count")?,
            retry_after: row.try_get("retry_after")?,
            worker_id: row.try_get("worker_id")?,
            worker_heartbeat_at: row.try_get("worker_heartbeat_at")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_snapshot(self) -> Result<ThumbnailSnapshot> {
        Ok(ThumbnailSnapshot {
            id: self.id,
            thumb_key: self.thumb_key,
            file_id: self.file_id,
            group_key: self.group_key,
            status: self
                .status
                .parse()
                .map_err(|e| CoreError::query_error(format!("corrupt thumbnail status: {e}")))?,
            media_type: self
                .media_type
                .parse()
                .map_err(|e| CoreError::query_error(format!("corrupt media type: {e}")))?,
            format: self
                .format
                .parse()
                .map_err(|e| CoreError::query_error(format!("corrupt thumbnail format: {e}")))?,
            max_dimension: self.max_dimension,
            version: self.version,
            source_size_bytes: self.source_size_bytes,
            source_mtime_ns: self.source_mtime_ns,
            output_relpath: self.output_relpath,
            width: self.width,
            height: self.height,
            bytes_size: self.bytes_size,
            error_code: self.error_code,
            error_message: self.error_message,
            error_count: self.error_count,
            retry_after: self.retry_after,
            worker_id: self.worker_id,
            worker_heartbeat_at: self.worker_heartbeat_at,
            lease_expires_at: self.lease_expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

impl ThumbnailService {
    pub fn new(
        pool: DbPool,
        libraries_root: PathBuf,
        thumbs_root: PathBuf,
        default_format: ThumbnailFormat,
        max_dimension: i64,
        queue_capacity: i64,
        cleanup_delay_seconds: i64,
    ) -> Self {
        Self {
            pool,
            libraries_root,
            thumbs_root,
            default_format,
            max_dimension,
            queue_capacity,
            cleanup_delay_seconds,
        }
    }

    fn normalize_format(&self, raw: Option<&str>) -> Result<ThumbnailFormat> {
        match raw {
            None => Ok(self.default_format),
            Some(value) => value
                .trim()
                .to_lowercase()
                .parse()
                .map_err(|_| CoreError::policy(format!("unsupported thumbnail format: {value}"))),
        }
    }

    fn normalize_dimension(&self, requested: Option<i64>) -> Result<i64> {
        match requested {
            None => Ok(self.max_dimension),
            Some(value) if value <= 0 => {
                Err(CoreError::policy("max_dimension must be greater than zero"))
            }
            Some(value) if value > self.max_dimension => Err(CoreError::policy(format!(
                "max_dimension exceeds configured limit {}",
                self.max_dimension
            ))),
            Some(value) => Ok(value),
        }
    }

    fn infer_media_type(&self, relative_path: &str) -> Result<ThumbnailMediaType> {
        let extension = Path::new(relative_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match extension.as_deref() {
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => Ok(ThumbnailMediaType::Image),
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => Ok(ThumbnailMediaType::Video),
            other => Err(CoreError::policy(format!(
                "unsupported media type for thumbnail generation: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    fn validate_source_path(&self, root_path: &str, relative_path: &str) -> Result<()> {
        let root = Path::new(root_path);
        if root != self.libraries_root && !root.starts_with(&self.libraries_root) {
            return Err(CoreError::policy("library root path escapes /libraries"));
        }
        resolve_under_libraries(root, relative_path)
            .map_err(|e| CoreError::policy(e.to_string()))?;
        Ok(())
    }

    fn build_group_key(&self, hash_algorithm: &Option<String>, content_hash: &Option<Vec<u8>>) -> Option<String> {
        match (hash_algorithm, content_hash) {
            (Some(algo), Some(hash)) => Some(format!("{algo}:{}", hex::encode(hash))),
            _ => None,
        }
    }

    fn build_thumb_key(
        &self,
        file: &LibraryFileRow,
        max_dimension: i64,
        output_format: ThumbnailFormat,
    ) -> String {
        let source_fingerprint = match (&file.hash_algorithm, &file.content_hash) {
            (Some(algo), Some(hash)) => format!("{algo}:{}", hex::encode(hash)),
            _ => format!("meta:{}:{}", file.size_bytes, file.mtime_ns),
        };
        let material = format!(
            "{}:{source_fingerprint}:{max_dimension}:{}:thumb-v2",
            file.id,
            output_format.as_str()
        );
        let digest = Sha256::digest(material.as_bytes());
        hex::encode(digest)
    }

    fn build_output_relpath(&self, thumb_key: &str, output_format: ThumbnailFormat) -> String {
        format!(
            "{}/{}/{thumb_key}.{}",
            &thumb_key[0..2],
            &thumb_key[2..4],
            output_format.extension()
        )
    }

    pub async fn request_thumbnail(
        &self,
        file_id: i64,
        max_dimension: Option<i64>,
        output_format: Option<&str>,
    ) -> Result<ThumbnailSnapshot> {
        let normalized_format = self.normalize_format(output_format)?;
        let normalized_dimension = self.normalize_dimension(max_dimension)?;
        let now = Utc::now();

        let file_row = sqlx::query(
            "SELECT id, library_id, relative_path, size_bytes, mtime_ns, is_missing, hash_algorithm, content_hash \
             FROM library_files WHERE id = ?",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?
        .ok_or_else(|| CoreError::not_found(format!("file not found: {file_id}")))?;

        let file = LibraryFileRow {
            id: file_row.try_get("id").map_err(dedupctl_db::DbError::Sqlx)?,
            library_id: file_row.try_get("library_id").map_err(dedupctl_db::DbError::Sqlx)?,
            relative_path: file_row.try_get("relative_path").map_err(dedupctl_db::DbError::Sqlx)?,
            size_bytes: file_row.try_get("size_bytes").map_err(dedupctl_db::DbError::Sqlx)?,
            mtime_ns: file_row.try_get("mtime_ns").map_err(dedupctl_db::DbError::Sqlx)?,
            is_missing: file_row.try_get("is_missing").map_err(dedupctl_db::DbError::Sqlx)?,
            hash_algorithm: file_row.try_get("hash_algorithm").map_err(dedupctl_db::DbError::Sqlx)?,
            content_hash: file_row.try_get("content_hash").map_err(dedupctl_db::DbError::Sqlx)?,
        };

        if file.is_missing {
            return Err(CoreError::policy("missing files cannot be thumbnailed"));
        }

        let root_path: Option<String> = sqlx::query_scalar("SELECT root_path FROM library_roots WHERE id = ?")
            .bind(file.library_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(dedupctl_db::DbError::Sqlx)?;
        let root_path =
            root_path.ok_or_else(|| CoreError::policy(format!("library root missing for file {file_id}")))?;

        self.validate_source_path(&root_path, &file.relative_path)?;
        validate_library_relative_path(&file.relative_path).map_err(|e| CoreError::policy(e.to_string()))?;

        let media_type = self.infer_media_type(&file.relative_path)?;
        let thumb_key = self.build_thumb_key(&file, normalized_dimension, normalized_format);
        let output_relpath = self.build_output_relpath(&thumb_key, normalized_format);
        let group_key = self.build_group_key(&file.hash_algorithm, &file.content_hash);

        if let Some(existing) = self.find_by_thumb_key(&thumb_key).await? {
            if existing.status == ThumbnailStatus::Failed {
                let should_retry = existing.retry_after.map(|r| r <= now).unwrap_or(true);
                if should_retry {
                    sqlx::query(
                        "UPDATE thumbnails SET status = 'pending', error_code = NULL, error_message = NULL, \
                             retry_after = NULL, worker_id = NULL, worker_heartbeat_at = NULL, \
                             lease_expires_at = NULL, started_at = NULL, finished_at = NULL, updated_at = ? \
                         WHERE thumb_key = ?",
                    )
                    .bind(now)
                    .bind(&thumb_key)
                    .execute(&self.pool)
                    .await
                    .map_err(dedupctl_db::DbError::Sqlx)?;
                    return self.get_thumbnail(&thumb_key).await;
                }
            }
            return Ok(existing);
        }

        let insert = sqlx::query(
            "INSERT INTO thumbnails (
                 thumb_key, file_id, group_key, status, media_type, format, max_dimension,
                 version, source_size_bytes, source_mtime_ns, output_relpath, error_count
             )
             SELECT ?, ?, ?, 'pending', ?, ?, ?, 2, ?, ?, ?, 0
             WHERE (SELECT COUNT(1) FROM thumbnails WHERE status IN ('pending', 'running')) < ?",
        )
        .bind(&thumb_key)
        .bind(file.id)
        .bind(&group_key)
        .bind(media_type.as_str())
        .bind(normalized_format.as_str())
        .bind(normalized_dimension)
        .bind(file.size_bytes)
        .bind(file.mtime_ns)
        .bind(&output_relpath)
        .bind(self.queue_capacity)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(result) if result.rows_affected() == 1 => self.get_thumbnail(&thumb_key).await,
            Ok(_) => {
                if let Some(existing) = self.find_by_thumb_key(&thumb_key).await? {
                    Ok(existing)
                } else {
                    Err(CoreError::queue_full("thumbnail queue is at capacity; please retry later"))
                }
            }
            Err(sqlx::Error::Database(db_err))
                if matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                self.find_by_thumb_key(&thumb_key)
                    .await?
                    .ok_or_else(|| CoreError::queue_full("thumbnail queue is at capacity; please retry later"))
            }
            Err(e) => Err(dedupctl_db::DbError::Sqlx(e).into()),
        }
    }

    async fn find_by_thumb_key(&self, thumb_key: &str) -> Result<Option<ThumbnailSnapshot>> {
        match sqlx::query("SELECT * FROM thumbnails WHERE thumb_key = ?")
            .bind(thumb_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(dedupctl_db::DbError::Sqlx)?
        {
            Some(row) => Ok(Some(
                ThumbnailRow::from_row(&row)
                    .map_err(dedupctl_db::DbError::Sqlx)?
                    .into_snapshot()?,
            )),
            None => Ok(None),
        }
    }

    pub async fn get_thumbnail(&self, thumb_key: &str) -> Result<ThumbnailSnapshot> {
        self.find_by_thumb_key(thumb_key)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("thumbnail not found: {thumb_key}")))
    }

    pub fn resolve_thumbnail_output_path(&self, snapshot: &ThumbnailSnapshot) -> Result<PathBuf> {
        let relpath = snapshot
            .output_relpath
            .as_deref()
            .ok_or_else(|| CoreError::policy("thumbnail output path is empty"))?;
        validate_library_relative_path(relpath).map_err(|e| CoreError::policy(e.to_string()))?;
        resolve_under_libraries(&self.thumbs_root, relpath).map_err(|e| CoreError::policy(e.to_string()))
    }

    pub async fn schedule_group_cleanup(
        &self,
        group_key: &str,
        delay_seconds: Option<i64>,
    ) -> Result<ThumbnailCleanupSnapshot> {
        let normalized_group = group_key.trim();
        if normalized_group.is_empty() {
            return Err(CoreError::validation("group_key cannot be blank"));
        }
        if let Some(d) = delay_seconds {
            if d < 0 {
                return Err(CoreError::validation("delay_seconds cannot be negative"));
            }
        }

        let delay = delay_seconds.unwrap_or(self.cleanup_delay_seconds);
        let now = Utc::now();
        let execute_after = now + Duration::seconds(delay);

        sqlx::query(
            "INSERT INTO thumbnail_cleanup_jobs (group_key, status, execute_after) VALUES (?, 'pending', ?) \
             ON CONFLICT(group_key) DO UPDATE SET \
                 status = 'pending', execute_after = excluded.execute_after, \
                 worker_id = NULL, worker_heartbeat_at = NULL, lease_expires_at = NULL, \
                 error_code = NULL, error_message = NULL, finished_at = NULL, updated_at = ?",
        )
        .bind(normalized_group)
        .bind(execute_after)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;

        let row = sqlx::query("SELECT * FROM thumbnail_cleanup_jobs WHERE group_key = ?")
            .bind(normalized_group)
            .fetch_one(&self.pool)
            .await
            .map_err(dedupctl_db::DbError::Sqlx)?;

        Ok(ThumbnailCleanupSnapshot {
            id: row.try_get("id").map_err(dedupctl_db::DbError::Sqlx)?,
            group_key: row.try_get("group_key").map_err(dedupctl_db::DbError::Sqlx)?,
            status: row
                .try_get::<String, _>("status")
                .map_err(dedupctl_db::DbError::Sqlx)?
                .parse()
                .map_err(|e: String| CoreError::query_error(e))?,
            execute_after: row.try_get("execute_after").map_err(dedupctl_db::DbError::Sqlx)?,
            worker_id: row.try_get("worker_id").map_err(dedupctl_db::DbError::Sqlx)?,
            worker_heartbeat_at: row.try_get("worker_heartbeat_at").map_err(dedupctl_db::DbError::Sqlx)?,
            lease_expires_at: row.try_get("lease_expires_at").map_err(dedupctl_db::DbError::Sqlx)?,
            error_code: row.try_get("error_code").map_err(dedupctl_db::DbError::Sqlx)?,
            error_message: row.try_get("error_message").map_err(dedupctl_db::DbError::Sqlx)?,
            created_at: row.try_get("created_at").map_err(dedupctl_db::DbError::Sqlx)?,
            updated_at: row.try_get("updated_at").map_err(dedupctl_db::DbError::Sqlx)?,
            finished_at: row.try_get("finished_at").map_err(dedupctl_db::DbError::Sqlx)?,
        })
    }

    /// Best-effort unlink of ready/failed thumbnail files for a group,
    /// then delete their rows. Idempotent: a missing file is not an error.
    pub async fn prune_group_thumbnails(&self, group_key: &str) -> Result<u64> {
        let normalized_group = group_key.trim();
        if normalized_group.is_empty() {
            return Err(CoreError::validation("group_key cannot be blank"));
        }

        let rows = sqlx::query(
            "SELECT * FROM thumbnails WHERE group_key = ? AND status IN ('ready', 'failed')",
        )
        .bind(normalized_group)
        .fetch_all(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;

        for row in &rows {
            let snapshot = ThumbnailRow::from_row(row)
                .map_err(dedupctl_db::DbError::Sqlx)?
                .into_snapshot()?;
            if snapshot.output_relpath.is_none() {
                continue;
            }
            if let Ok(path) = self.resolve_thumbnail_output_path(&snapshot) {
                let _ = std::fs::remove_file(path);
            }
        }

        let result = sqlx::query(
            "DELETE FROM thumbnails WHERE group_key = ? AND status IN ('ready', 'failed')",
        )
        .bind(normalized_group)
        .execute(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;

        Ok(result.rows_affected())
    }

    pub async fn get_metrics(&self) -> Result<ThumbnailMetricsSnapshot> {
        let now = Utc::now();

        let queue_pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM thumbnails WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(dedupctl_db::DbError::Sqlx)?;
        let queue_running: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM thumbnails WHERE status = 'running'")
            .fetch_one(&self.pool)
            .await
            .map_err(dedupctl_db::DbError::Sqlx)?;
        let retry_backlog: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM thumbnails WHERE status = 'failed' AND retry_after IS NOT NULL AND retry_after > ?",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;
        let retry_ready: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM thumbnails WHERE status = 'failed' AND COALESCE(retry_after, ?) <= ?",
        )
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;
        let cleanup_pending: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM thumbnail_cleanup_jobs WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(dedupctl_db::DbError::Sqlx)?;
        let cleanup_running: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM thumbnail_cleanup_jobs WHERE status = 'running'")
                .fetch_one(&self.pool)
                .await
                .map_err(dedupctl_db::DbError::Sqlx)?;
        let cleanup_overdue: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM thumbnail_cleanup_jobs WHERE status = 'pending' AND execute_after <= ?",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;
        let oldest_due: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MIN(execute_after) FROM thumbnail_cleanup_jobs WHERE status = 'pending' AND execute_after <= ?",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(dedupctl_db::DbError::Sqlx)?;

        let cleanup_max_lag_seconds = oldest_due
            .map(|oldest| (now - oldest).num_seconds().max(0))
            .unwrap_or(0);

        Ok(ThumbnailMetricsSnapshot {
            generated_at: now,
            queue_depth: queue_pending + queue_running,
            queue_pending,
            queue_running,
            retry_backlog,
            retry_ready,
            cleanup_pending,
            cleanup_running,
            cleanup_overdue,
            cleanup_max_lag_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::run_migrations;
    use dedupctl_db::{create_pool, DbConfig};

    async fn seeded_pool() -> DbPool {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        sqlx::query("INSERT INTO library_roots (id, name, root_path) VALUES (1, 'main', '/libraries/main')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO library_files (id, library_id, relative_path, size_bytes, mtime_ns, is_missing, needs_hash) \
             VALUES (1, 1, 'photos/a.jpg', 1000, 1, 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    fn service(pool: DbPool) -> ThumbnailService {
        ThumbnailService::new(
            pool,
            PathBuf::from("/libraries"),
            PathBuf::from("/state/thumbs"),
            ThumbnailFormat::Jpeg,
            256,
            50_000,
            600,
        )
    }

    #[tokio::test]
    async fn requests_and_dedupes_identical_thumbnail() {
        let svc = service(seeded_pool().await);
        let first = svc.request_thumbnail(1, None, None).await.unwrap();
        let second = svc.request_thumbnail(1, None, None).await.unwrap();
        assert_eq!(first.thumb_key, second.thumb_key);
    }

    #[tokio::test]
    async fn rejects_unsupported_extension() {
        let pool = seeded_pool().await;
        sqlx::query(
            "INSERT INTO library_files (id, library_id, relative_path, size_bytes, mtime_ns, is_missing, needs_hash) \
             VALUES (2, 1, 'docs/readme.txt', 10, 1, 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        let svc = service(pool);
        let result = svc.request_thumbnail(2, None, None).await;
        assert!(matches!(result, Err(CoreError::Policy(_))));
    }

    #[tokio::test]
    async fn queue_full_rejects_new_request() {
        let pool = seeded_pool().await;
        sqlx::query(
            "INSERT INTO library_files (id, library_id, relative_path, size_bytes, mtime_ns, is_missing, needs_hash) \
             VALUES (2, 1, 'photos/b.jpg', 1000, 1, 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        let svc = ThumbnailService::new(
            pool,
            PathBuf::from("/libraries"),
            PathBuf::from("/state/thumbs"),
            ThumbnailFormat::Jpeg,
            256,
            1,
            600,
        );
        svc.request_thumbnail(1, None, None).await.unwrap();
        let result = svc.request_thumbnail(2, None, None).await;
        assert!(matches!(result, Err(CoreError::QueueFull(_))));
    }

    #[tokio::test]
    async fn cleanup_schedule_and_metrics() {
        let svc = service(seeded_pool().await);
        svc.request_thumbnail(1, None, None).await.unwrap();
        let cleanup = svc.schedule_group_cleanup("blake3:deadbeef", Some(0)).await.unwrap();
        assert_eq!(cleanup.status, ThumbnailCleanupStatus::Pending);
        let metrics = svc.get_metrics().await.unwrap();
        assert_eq!(metrics.queue_pending, 1);
    }
}
