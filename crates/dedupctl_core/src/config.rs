//! Runtime configuration (spec §6, §12).
//!
//! `Settings` doubles as both the CLI argument surface and the
//! environment-backed configuration object: every field is also settable
//! via a `DEDUPCTL_`-prefixed environment variable, following the
//! workspace's existing `clap` "derive + env" feature set.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::Parser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ConfigError {}

const HASH_ALGORITHMS: &[&str] = &["blake3", "sha256"];
const THUMBNAIL_FORMATS: &[&str] = &["jpeg", "webp"];
const WAL_MODES: &[&str] = &["passive", "restart", "truncate"];

#[derive(Parser, Debug, Clone)]
#[command(name = "dedupctl")]
pub struct Settings {
    #[arg(long, env = "DEDUPCTL_APP_NAME", default_value = "DedupCtl")]
    pub app_name: String,

    #[arg(long, env = "DEDUPCTL_ENVIRONMENT", default_value = "production")]
    pub environment: String,

    #[arg(long, env = "DEDUPCTL_API_HOST", default_value = "0.0.0.0")]
    pub api_host: String,

    #[arg(long, env = "DEDUPCTL_API_PORT", default_value_t = 8080)]
    pub api_port: u16,

    #[arg(long, env = "DEDUPCTL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "DEDUPCTL_DRY_RUN", default_value_t = true)]
    pub dry_run: bool,

    #[arg(long, env = "DEDUPCTL_ALLOW_REAL_DELETE", default_value_t = false)]
    pub allow_real_delete: bool,

    #[arg(long, env = "DEDUPCTL_LIBRARIES_ROOT", default_value = "/libraries")]
    pub libraries_root: PathBuf,

    #[arg(long, env = "DEDUPCTL_STATE_ROOT", default_value = "/state")]
    pub state_root: PathBuf,

    #[arg(long, env = "DEDUPCTL_DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "DEDUPCTL_THUMBS_ROOT", default_value = "/state/thumbs")]
    pub thumbs_root: PathBuf,

    #[arg(long, env = "DEDUPCTL_JOB_LOCK_TTL_SECONDS", default_value_t = 300)]
    pub job_lock_ttl_seconds: u64,

    #[arg(long, env = "DEDUPCTL_JOB_LOCK_HEARTBEAT_SECONDS", default_value_t = 30)]
    pub job_lock_heartbeat_seconds: u64,

    #[arg(long, env = "DEDUPCTL_SCAN_WRITE_BATCH_SIZE", default_value_t = 2000)]
    pub scan_write_batch_size: u32,

    #[arg(long, env = "DEDUPCTL_HASH_FETCH_BATCH_SIZE", default_value_t = 512)]
    pub hash_fetch_batch_size: u32,

    #[arg(long, env = "DEDUPCTL_HASH_READ_CHUNK_BYTES", default_value_t = 4_194_304)]
    pub hash_read_chunk_bytes: u64,

    #[arg(long, env = "DEDUPCTL_HASH_CLAIM_TTL_SECONDS", default_value_t = 600)]
    pub hash_claim_ttl_seconds: u64,

    #[arg(long, env = "DEDUPCTL_HASH_RETRY_BASE_SECONDS", default_value_t = 30)]
    pub hash_retry_base_seconds: u64,

    #[arg(long, env = "DEDUPCTL_HASH_RETRY_MAX_SECONDS", default_value_t = 3600)]
    pub hash_retry_max_seconds: u64,

    #[arg(long, env = "DEDUPCTL_DEFAULT_HASH_ALGORITHM", default_value = "blake3")]
    pub default_hash_algorithm: String,

    #[arg(long, env = "DEDUPCTL_THUMBNAIL_MAX_DIMENSION", default_value_t = 256)]
    pub thumbnail_max_dimension: u32,

    #[arg(long, env = "DEDUPCTL_THUMBNAIL_DEFAULT_FORMAT", default_value = "jpeg")]
    pub thumbnail_default_format: String,

    #[arg(long, env = "DEDUPCTL_THUMBNAIL_IMAGE_CONCURRENCY", default_value_t = 2)]
    pub thumbnail_image_concurrency: u32,

    #[arg(long, env = "DEDUPCTL_THUMBNAIL_VIDEO_CONCURRENCY", default_value_t = 1)]
    pub thumbnail_video_concurrency: u32,

    #[arg(long, env = "DEDUPCTL_THUMBNAIL_QUEUE_CAPACITY", default_value_t = 50_000)]
    pub thumbnail_queue_capacity: u32,

    #[arg(long, env = "DEDUPCTL_THUMBNAIL_IO_RATE_LIMIT_MIB_PER_SEC")]
    pub thumbnail_io_rate_limit_mib_per_sec: Option<u32>,

    #[arg(long, env = "DEDUPCTL_THUMBNAIL_RETRY_BASE_SECONDS", default_value_t = 30)]
    pub thumbnail_retry_base_seconds: u64,

    #[arg(long, env = "DEDUPCTL_THUMBNAIL_RETRY_MAX_SECONDS", default_value_t = 1800)]
    pub thumbnail_retry_max_seconds: u64,

    #[arg(
        long,
        env = "DEDUPCTL_THUMBNAIL_CLEANUP_DELAY_SECONDS",
        default_value_t = 600
    )]
    pub thumbnail_cleanup_delay_seconds: u64,

    #[arg(long, env = "DEDUPCTL_THUMBNAIL_FFMPEG_BIN", default_value = "ffmpeg")]
    pub thumbnail_ffmpeg_bin: String,

    #[arg(
        long,
        env = "DEDUPCTL_THUMBNAIL_FFMPEG_TIMEOUT_SECONDS",
        default_value_t = 120
    )]
    pub thumbnail_ffmpeg_timeout_seconds: u64,

    #[arg(long, env = "DEDUPCTL_DEFAULT_PAGE_SIZE", default_value_t = 100)]
    pub default_page_size: u32,

    #[arg(long, env = "DEDUPCTL_MAX_PAGE_SIZE", default_value_t = 1000)]
    pub max_page_size: u32,

    #[arg(long, env = "DEDUPCTL_RUST_WORKER_CONCURRENCY", default_value_t = 4)]
    pub rust_worker_concurrency: u32,

    #[arg(long, env = "DEDUPCTL_RUST_WORKER_POLL_SECONDS", default_value_t = 5)]
    pub rust_worker_poll_seconds: u64,

    #[arg(long, env = "DEDUPCTL_RUST_WORKER_IO_RATE_LIMIT_MIB_PER_SEC")]
    pub rust_worker_io_rate_limit_mib_per_sec: Option<u32>,

    #[arg(
        long,
        env = "DEDUPCTL_WAL_CHECKPOINT_DEFAULT_MODE",
        default_value = "passive"
    )]
    pub wal_checkpoint_default_mode: String,

    #[arg(
        long,
        env = "DEDUPCTL_WAL_CHECKPOINT_MIN_INTERVAL_SECONDS",
        default_value_t = 900
    )]
    pub wal_checkpoint_min_interval_seconds: u64,

    #[arg(
        long,
        env = "DEDUPCTL_WAL_CHECKPOINT_RETRY_SECONDS",
        default_value_t = 120
    )]
    pub wal_checkpoint_retry_seconds: u64,

    #[arg(
        long,
        env = "DEDUPCTL_WAL_CHECKPOINT_ALLOW_TRUNCATE",
        default_value_t = false
    )]
    pub wal_checkpoint_allow_truncate: bool,
}

impl Settings {
    /// Validate cross-field constraints and normalize paths. Consumes and
    /// returns `self` so callers write `Settings::parse().validated()?`.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        normalize_path(&self.libraries_root)?;
        normalize_path(&self.state_root)?;
        normalize_path(&self.thumbs_root)?;

        if self.libraries_root != Path::new("/libraries") {
            return Err(ConfigError::new(
                "libraries_root must resolve to exactly /libraries",
            ));
        }

        if self.thumbs_root == PathBuf::from("/state/thumbs") {
            self.thumbs_root = self.state_root.join("thumbs");
        }
        if !self.thumbs_root.starts_with(&self.state_root) {
            return Err(ConfigError::new(
                "thumbs_root must be the state root or a descendant of it",
            ));
        }

        if self.allow_real_delete && self.dry_run {
            return Err(ConfigError::new(
                "allow_real_delete cannot be set while dry_run is enabled",
            ));
        }

        if self.max_page_size < self.default_page_size {
            return Err(ConfigError::new(
                "max_page_size must be greater than or equal to default_page_size",
            ));
        }

        if !HASH_ALGORITHMS.contains(&self.default_hash_algorithm.as_str()) {
            return Err(ConfigError::new(format!(
                "default_hash_algorithm must be one of {:?}",
                HASH_ALGORITHMS
            )));
        }
        if self.hash_retry_max_seconds < self.hash_retry_base_seconds {
            return Err(ConfigError::new(
                "hash_retry_max_seconds must be >= hash_retry_base_seconds",
            ));
        }

        if !THUMBNAIL_FORMATS.contains(&self.thumbnail_default_format.as_str()) {
            return Err(ConfigError::new(format!(
                "thumbnail_default_format must be one of {:?}",
                THUMBNAIL_FORMATS
            )));
        }
        if self.thumbnail_retry_max_seconds < self.thumbnail_retry_base_seconds {
            return Err(ConfigError::new(
                "thumbnail_retry_max_seconds must be >= thumbnail_retry_base_seconds",
            ));
        }

        if !WAL_MODES.contains(&self.wal_checkpoint_default_mode.as_str()) {
            return Err(ConfigError::new(format!(
                "wal_checkpoint_default_mode must be one of {:?}",
                WAL_MODES
            )));
        }

        Ok(self)
    }

    /// The database URL actually used: `database_url` if set, otherwise a
    /// SQLite file derived from `state_root`.
    pub fn effective_database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite://{}/dedupctl.sqlite3?mode=rwc",
                self.state_root.display()
            ),
        }
    }

    /// The thumbnails root actually used, after `validated()` has resolved
    /// the default-under-state_root case.
    pub fn effective_thumbs_root(&self) -> &Path {
        &self.thumbs_root
    }
}

fn normalize_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.contains('~') {
        return Err(ConfigError::new(format!(
            "path must not contain '~': {text}"
        )));
    }
    if text.contains('$') {
        return Err(ConfigError::new(format!(
            "path must not contain '$': {text}"
        )));
    }
    if !path.is_absolute() {
        return Err(ConfigError::new(format!("path must be absolute: {text}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> Settings {
        Settings::parse_from(["dedupctl"])
    }

    #[test]
    fn defaults_validate_cleanly() {
        let settings = base_settings().validated().unwrap();
        assert_eq!(settings.thumbs_root, Path::new("/state/thumbs"));
        assert_eq!(
            settings.effective_database_url(),
            "sqlite:///state/dedupctl.sqlite3?mode=rwc"
        );
    }

    #[test]
    fn rejects_real_delete_with_dry_run() {
        let mut settings = base_settings();
        settings.allow_real_delete = true;
        assert!(settings.validated().is_err());
    }

    #[test]
    fn rejects_libraries_root_mismatch() {
        let mut settings = base_settings();
        settings.libraries_root = PathBuf::from("/data/libraries");
        assert!(settings.validated().is_err());
    }

    #[test]
    fn rejects_home_relative_paths() {
        let mut settings = base_settings();
        settings.state_root = PathBuf::from("~/state");
        assert!(settings.validated().is_err());
    }

    #[test]
    fn rejects_unknown_hash_algorithm() {
        let mut settings = base_settings();
        settings.default_hash_algorithm = "md5".to_string();
        assert!(settings.validated().is_err());
    }

    #[test]
    fn rejects_inverted_retry_bounds() {
        let mut settings = base_settings();
        settings.hash_retry_base_seconds = 100;
        settings.hash_retry_max_seconds = 10;
        assert!(settings.validated().is_err());
    }

    #[test]
    fn custom_thumbs_root_must_stay_under_state_root() {
        let mut settings = base_settings();
        settings.thumbs_root = PathBuf::from("/elsewhere/thumbs");
        assert!(settings.validated().is_err());
    }
}
