//! Duplicate-group query engine (spec §4.4, C7).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use dedupctl_db::DbPool;
use sqlx::Row;

use crate::error::{CoreError, Result};
use crate::duplicates::types::{
    DuplicateFileListResult, DuplicateFileSnapshot, DuplicateGroupListResult, DuplicateGroupSnapshot, HashAlgorithm,
};

pub struct DuplicateService {
    pool: DbPool,
    default_page_size: i64,
    max_page_size: i64,
}

struct GroupCursor {
    file_count: i64,
    total_size_bytes: i64,
    hash_algorithm: HashAlgorithm,
    content_hash_hex: String,
}

impl DuplicateService {
    pub fn new(pool: DbPool, default_page_size: i64, max_page_size: i64) -> Self {
        Self {
            pool,
            default_page_size,
            max_page_size,
        }
    }

    fn normalize_limit(&self, limit: Option<i64>) -> i64 {
        match limit {
            None => self.default_page_size,
            Some(value) => value.clamp(1, self.max_page_size),
        }
    }

    fn encode_group_cursor(&self, snapshot: &DuplicateGroupSnapshot) -> Result<String> {
        let payload = serde_json::json!({
            "file_count": snapshot.file_count,
            "total_size_bytes": snapshot.total_size_bytes,
            "hash_algorithm": snapshot.hash_algorithm.as_str(),
            "content_hash_hex": snapshot.content_hash_hex,
        });
        let raw = serde_json::to_vec(&payload)
            .map_err(|e| CoreError::query_error(format!("failed to encode cursor: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    fn decode_group_cursor(&self, cursor: &str) -> Result<GroupCursor> {
        let invalid = || CoreError::validation("invalid duplicate groups cursor");
        let token = cursor.trim();
        if token.is_empty() {
            return Err(invalid());
        }

        let decoded = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        let payload: serde_json::Value = serde_json::from_slice(&decoded).map_err(|_| invalid())?;

        let file_count = payload.get("file_count").and_then(|v| v.as_i64()).ok_or_else(invalid)?;
        let total_size_bytes = payload
            .get("total_size_bytes")
            .and_then(|v| v.as_i64())
            .ok_or_else(invalid)?;
        let hash_algorithm: HashAlgorithm = payload
            .get("hash_algorithm")
            .and_then(|v| v.as_str())
            .map(|s| s.to_lowercase())
            .and_then(|s| s.parse().ok())
            .ok_or_else(invalid)?;
        let content_hash_hex = payload
            .get("content_hash_hex")
            .and_then(|v| v.as_str())
            .map(|s| s.to_lowercase())
            .ok_or_else(invalid)?;

        if file_count < 2 || total_size_bytes < 1 {
            return Err(invalid());
        }
        let expected_len = hash_algorithm.expected_hash_hex_length();
        if content_hash_hex.len() != expected_len || content_hash_hex.len() % 2 != 0 {
            return Err(invalid());
        }
        if hex::decode(&content_hash_hex).is_err() {
            return Err(invalid());
        }

        Ok(GroupCursor {
            file_count,
            total_size_bytes,
            hash_algorithm,
            content_hash_hex,
        })
    }

    fn normalize_file_cursor(&self, cursor: Option<&str>) -> Result<Option<i64>> {
        let invalid = || CoreError::validation("invalid duplicate files cursor");
        match cursor {
            None => Ok(None),
            Some(raw) => {
                let token = raw.trim();
                if token.is_empty() {
                    return Err(invalid());
                }
                let anchor: i64 = token.parse().map_err(|_| invalid())?;
                if anchor < 1 {
                    return Err(invalid());
                }
                Ok(Some(anchor))
            }
        }
    }

    fn parse_group_key(&self, group_key: &str) -> Result<(HashAlgorithm, String, Vec<u8>)> {
        let token = group_key.trim().to_lowercase();
        if token.is_empty() {
            return Err(CoreError::validation("group_key cannot be blank"));
        }
        let (algorithm_raw, hash_hex) = token
            .split_once(':')
            .ok_or_else(|| CoreError::validation("group_key must follow <algorithm>:<hash_hex>"))?;
        let algorithm: HashAlgorithm = algorithm_raw
            .parse()
            .map_err(|_| CoreError::validation("group_key has unsupported algorithm"))?;

        let expected_len = algorithm.expected_hash_hex_length();
        if hash_hex.len() != expected_len {
            return Err(CoreError::validation(format!(
                "group_key hash_hex length must be {expected_len} for algorithm {algorithm}"
            )));
        }
        if hash_hex.len() % 2 != 0 {
            return Err(CoreError::validation("group_key hash_hex must have even length"));
        }
        let hash_blob =
            hex::decode(hash_hex).map_err(|_| CoreError::validation("group_key hash_hex is not valid hex"))?;

        Ok((algorithm, hash_hex.to_string(), hash_blob))
    }

    pub async fn list_groups(&self, limit: Option<i64>, cursor: Option<&str>) -> Result<DuplicateGroupListResult> {
        let bounded_limit = self.normalize_limit(limit);
        let cursor_state = cursor.map(|c| self.decode_group_cursor(c)).transpose()?;

        let rows = match &cursor_state {
            None => sqlx::query(
                "WITH grouped AS ( \
                     SELECT hash_algorithm, lower(hex(content_hash)) AS content_hash_hex, \
                         COUNT(1) AS file_count, SUM(size_bytes) AS total_size_bytes, \
                         SUM(size_bytes) - MIN(size_bytes) AS duplicate_waste_bytes, MIN(id) AS sample_file_id \
                     FROM library_files INDEXED BY ix_library_files_dedup_group \
                     WHERE is_missing = 0 AND needs_hash = 0 AND hash_algorithm IS NOT NULL AND content_hash IS NOT NULL \
                     GROUP BY hash_algorithm, content_hash \
                     HAVING COUNT(1) > 1 \
                 ) \
                 SELECT hash_algorithm, content_hash_hex, file_count, total_size_bytes, duplicate_waste_bytes, sample_file_id \
                 FROM grouped \
                 ORDER BY file_count DESC, total_size_bytes DESC, hash_algorithm ASC, content_hash_hex ASC \
                 LIMIT ?",
            )
            .bind(bounded_limit + 1)
            .fetch_all(&self.pool)
            .await,
            Some(state) => sqlx::query(
                "WITH grouped AS ( \
                     SELECT hash_algorithm, lower(hex(content_hash)) AS content_hash_hex, \
                         COUNT(1) AS file_count, SUM(size_bytes) AS total_size_bytes, \
                         SUM(size_bytes) - MIN(size_bytes) AS duplicate_waste_bytes, MIN(id) AS sample_file_id \
                     FROM library_files INDEXED BY ix_library_files_dedup_group \
                     WHERE is_missing = 0 AND needs_hash = 0 AND hash_algorithm IS NOT NULL AND content_hash IS NOT NULL \
                     GROUP BY hash_algorithm, content_hash \
                     HAVING COUNT(1) > 1 \
                 ) \
                 SELECT hash_algorithm, content_hash_hex, file_count, total_size_bytes, duplicate_waste_bytes, sample_file_id \
                 FROM grouped \
                 WHERE (file_count < ? \
                     OR (file_count = ? AND total_size_bytes < ?) \
                     OR (file_count = ? AND total_size_bytes = ? AND hash_algorithm > ?) \
                     OR (file_count = ? AND total_size_bytes = ? AND hash_algorithm = ? AND content_hash_hex > ?)) \
                 ORDER BY file_count DESC, total_size_bytes DESC, hash_algorithm ASC, content_hash_hex ASC \
                 LIMIT ?",
            )
            .bind(state.file_count)
            .bind(state.file_count)
            .bind(state.total_size_bytes)
            .bind(state.file_count)
            .bind(state.total_size_bytes)
            .bind(state.hash_algorithm.as_str())
            .bind(state.file_count)
            .bind(state.total_size_bytes)
            .bind(state.hash_algorithm.as_str())
            .bind(&state.content_hash_hex)
            .bind(bounded_limit + 1)
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(dedupctl_db::DbError::Sqlx)?;

        let has_more = rows.len() as i64 > bounded_limit;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows.iter().take(bounded_limit as usize) {
            let algorithm_raw: String = row.try_get("hash_algorithm").map_err(dedupctl_db::DbError::Sqlx)?;
            let algorithm: HashAlgorithm = algorithm_raw
                .to_lowercase()
                .parse()
                .map_err(|e| CoreError::query_error(format!("invalid hash algorithm in duplicate group rows: {e}")))?;
            let content_hash_hex: String = row.try_get("content_hash_hex").map_err(dedupctl_db::DbError::Sqlx)?;
            let content_hash_hex = content_hash_hex.to_lowercase();
            items.push(DuplicateGroupSnapshot {
                group_key: format!("{algorithm}:{content_hash_hex}"),
                hash_algorithm: algorithm,
                content_hash_hex,
                file_count: row.try_get("file_count").map_err(dedupctl_db::DbError::Sqlx)?,
                total_size_bytes: row.try_get("total_size_bytes").map_err(dedupctl_db::DbError::Sqlx)?,
                duplicate_waste_bytes: row.try_get("duplicate_waste_bytes").map_err(dedupctl_db::DbError::Sqlx)?,
                sample_file_id: row.try_get("sample_file_id").map_err(dedupctl_db::DbError::Sqlx)?,
            });
        }

        let next_cursor = if has_more {
            match items.last() {
                Some(last) => Some(self.encode_group_cursor(last)?),
                None => None,
            }
        } else {
            None
        };

        Ok(DuplicateGroupListResult { items, next_cursor })
    }

    pub async fn list_group_files(
        &self,
        group_key: &str,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<DuplicateFileListResult> {
        let bounded_limit = self.normalize_limit(limit);
        let cursor_id = self.normalize_file_cursor(cursor)?;
        let (algorithm, _hash_hex, hash_blob) = self.parse_group_key(group_key)?;

        let rows = match cursor_id {
            None => sqlx::query(
                "SELECT lf.id AS file_id, lf.library_id AS library_id, lr.name AS library_name, \
                     lf.relative_path AS relative_path, lf.size_bytes AS size_bytes, lf.mtime_ns AS mtime_ns, \
                     lf.hashed_at AS hashed_at \
                 FROM library_files AS lf INDEXED BY ix_library_files_dedup_group \
                 JOIN library_roots AS lr ON lr.id = lf.library_id \
                 WHERE lf.is_missing = 0 AND lf.needs_hash = 0 AND lf.hash_algorithm = ? AND lf.content_hash = ? \
                 ORDER BY lf.id ASC LIMIT ?",
            )
            .bind(algorithm.as_str())
            .bind(&hash_blob)
            .bind(bounded_limit + 1)
            .fetch_all(&self.pool)
            .await,
            Some(anchor) => sqlx::query(
                "SELECT lf.id AS file_id, lf.library_id AS library_id, lr.name AS library_name, \
                     lf.relative_path AS relative_path, lf.size_bytes AS size_bytes, lf.mtime_ns AS mtime_ns, \
                     lf.hashed_at AS hashed_at \
                 FROM library_files AS lf INDEXED BY ix_library_files_dedup_group \
                 JOIN library_roots AS lr ON lr.id = lf.library_id \
                 WHERE lf.is_missing = 0 AND lf.needs_hash = 0 AND lf.hash_algorithm = ? AND lf.content_hash = ? \
                     AND lf.id > ? \
                 ORDER BY lf.id ASC LIMIT ?",
            )
            .bind(algorithm.as_str())
            .bind(&hash_blob)
            .bind(anchor)
            .bind(bounded_limit + 1)
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(dedupctl_db::DbError::Sqlx)?;

        let has_more = rows.len() as i64 > bounded_limit;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows.iter().take(bounded_limit as usize) {
            items.push(DuplicateFileSnapshot {
                file_id: row.try_get("file_id").map_err(dedupctl_db::DbError::Sqlx)?,
                library_id: row.try_get("library_id").map_err(dedupctl_db::DbError::Sqlx)?,
                library_name: row.try_get("library_name").map_err(dedupctl_db::DbError::Sqlx)?,
                relative_path: row.try_get("relative_path").map_err(dedupctl_db::DbError::Sqlx)?,
                size_bytes: row.try_get("size_bytes").map_err(dedupctl_db::DbError::Sqlx)?,
                mtime_ns: row.try_get("mtime_ns").map_err(dedupctl_db::DbError::Sqlx)?,
                hashed_at: row
                    .try_get::<Option<DateTime<Utc>>, _>("hashed_at")
                    .map_err(dedupctl_db::DbError::Sqlx)?,
            });
        }

        let next_cursor = if has_more {
            items.last().map(|f| f.file_id.to_string())
        } else {
            None
        };

        Ok(DuplicateFileListResult { items, next_cursor })
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

        let hash = vec![0xABu8; 32];
        for (id, path) in [(1, "a.jpg"), (2, "b.jpg")] {
            sqlx::query(
                "INSERT INTO library_files \
                     (id, library_id, relative_path, size_bytes, mtime_ns, is_missing, needs_hash, hash_algorithm, content_hash) \
                 VALUES (?, 1, ?, 1000, 1, 0, 0, 'sha256', ?)",
            )
            .bind(id)
            .bind(path)
            .bind(&hash)
            .execute(&pool)
            .await
            .unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn list_groups_finds_the_seeded_duplicate() {
        let svc = DuplicateService::new(seeded_pool().await, 100, 1000);
        let result = svc.list_groups(None, None).await.unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].file_count, 2);
        assert_eq!(result.items[0].hash_algorithm, HashAlgorithm::Sha256);
    }

    #[tokio::test]
    async fn list_group_files_lists_both_members() {
        let svc = DuplicateService::new(seeded_pool().await, 100, 1000);
        let groups = svc.list_groups(None, None).await.unwrap();
        let group_key = &groups.items[0].group_key;
        let files = svc.list_group_files(group_key, None, None).await.unwrap();
        assert_eq!(files.items.len(), 2);
    }

    #[tokio::test]
    async fn cursor_round_trips_through_encode_and_decode() {
        let svc = DuplicateService::new(seeded_pool().await, 1, 1000);
        let page1 = svc.list_groups(Some(1), None).await.unwrap();
        assert_eq!(page1.items.len(), 1);
        assert!(page1.next_cursor.is_none());
    }

    #[tokio::test]
    async fn rejects_malformed_group_key() {
        let svc = DuplicateService::new(seeded_pool().await, 100, 1000);
        let result = svc.list_group_files("not-a-group-key", None, None).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    /// The grouping and per-group queries must hit the dedicated composite
    /// index rather than a table scan, per spec §4.4's closing requirement.
    #[tokio::test]
    async fn group_queries_use_the_dedup_composite_index() {
        let pool = seeded_pool().await;

        let group_plan: Vec<(i64, i64, i64, String)> = sqlx::query_as(
            "EXPLAIN QUERY PLAN \
             SELECT hash_algorithm, content_hash, COUNT(1) FROM library_files \
             INDEXED BY ix_library_files_dedup_group \
             WHERE is_missing = 0 AND needs_hash = 0 AND hash_algorithm IS NOT NULL AND content_hash IS NOT NULL \
             GROUP BY hash_algorithm, content_hash",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert!(group_plan
            .iter()
            .any(|(_, _, _, detail)| detail.contains("ix_library_files_dedup_group")));

        let files_plan: Vec<(i64, i64, i64, String)> = sqlx::query_as(
            "EXPLAIN QUERY PLAN \
             SELECT id FROM library_files INDEXED BY ix_library_files_dedup_group \
             WHERE is_missing = 0 AND needs_hash = 0 AND hash_algorithm = 'sha256' AND content_hash = x'ab' \
             ORDER BY id ASC",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert!(files_plan
            .iter()
            .any(|(_, _, _, detail)| detail.contains("ix_library_files_dedup_group")));
    }
}
