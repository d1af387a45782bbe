//! Thumbnail domain types (spec §4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailStatus {
    Pending,
    Running,
    Ready,
    Failed,
}

impl ThumbnailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailStatus::Pending => "pending",
            ThumbnailStatus::Running => "running",
            ThumbnailStatus::Ready => "ready",
            ThumbnailStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ThumbnailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ThumbnailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ThumbnailStatus::Pending),
            "running" => Ok(ThumbnailStatus::Running),
            "ready" => Ok(ThumbnailStatus::Ready),
            "failed" => Ok(ThumbnailStatus::Failed),
            other => Err(format!("unknown thumbnail status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailMediaType {
    Image,
    Video,
}

impl ThumbnailMediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailMediaType::Image => "image",
            ThumbnailMediaType::Video => "video",
        }
    }
}

impl fmt::Display for ThumbnailMediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ThumbnailMediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(ThumbnailMediaType::Image),
            "video" => Ok(ThumbnailMediaType::Video),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailFormat {
    Jpeg,
    Webp,
}

impl ThumbnailFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailFormat::Jpeg => "jpeg",
            ThumbnailFormat::Webp => "webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ThumbnailFormat::Jpeg => "jpg",
            ThumbnailFormat::Webp => "webp",
        }
    }
}

impl fmt::Display for ThumbnailFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ThumbnailFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jpeg" => Ok(ThumbnailFormat::Jpeg),
            "webp" => Ok(ThumbnailFormat::Webp),
            other => Err(format!("unknown thumbnail format: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailCleanupStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ThumbnailCleanupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailCleanupStatus::Pending => "pending",
            ThumbnailCleanupStatus::Running => "running",
            ThumbnailCleanupStatus::Completed => "completed",
            ThumbnailCleanupStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ThumbnailCleanupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ThumbnailCleanupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ThumbnailCleanupStatus::Pending),
            "running" => Ok(ThumbnailCleanupStatus::Running),
            "completed" => Ok(ThumbnailCleanupStatus::Completed),
            "failed" => Ok(ThumbnailCleanupStatus::Failed),
            other => Err(format!("unknown cleanup status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailSnapshot {
    pub id: i64,
    pub thumb_key: String,
    pub file_id: i64,
    pub group_key: Option<String>,
    pub status: ThumbnailStatus,
    pub media_type: ThumbnailMediaType,
    pub format: ThumbnailFormat,
    pub max_dimension: i64,
    pub version: i64,
    pub source_size_bytes: i64,
    pub source_mtime_ns: i64,
    pub output_relpath: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub bytes_size: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub error_count: i64,
    pub retry_after: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub worker_heartbeat_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailCleanupSnapshot {
    pub id: i64,
    pub group_key: String,
    pub status: ThumbnailCleanupStatus,
    pub execute_after: DateTime<Utc>,
    pub worker_id: Option<String>,
    pub worker_heartbeat_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailMetricsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub queue_depth: i64,
    pub queue_pending: i64,
    pub queue_running: i64,
    pub retry_backlog: i64,
    pub retry_ready: i64,
    pub cleanup_pending: i64,
    pub cleanup_running: i64,
    pub cleanup_overdue: i64,
    pub cleanup_max_lag_seconds: i64,
}
