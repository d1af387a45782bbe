//! WAL maintenance domain types (spec §4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalCheckpointMode {
    Passive,
    Restart,
    Truncate,
}

impl WalCheckpointMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalCheckpointMode::Passive => "passive",
            WalCheckpointMode::Restart => "restart",
            WalCheckpointMode::Truncate => "truncate",
        }
    }
}

impl fmt::Display for WalCheckpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WalCheckpointMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passive" => Ok(WalCheckpointMode::Passive),
            "restart" => Ok(WalCheckpointMode::Restart),
            "truncate" => Ok(WalCheckpointMode::Truncate),
            other => Err(format!("invalid WAL checkpoint mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalMaintenanceStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Retryable,
}

impl WalMaintenanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalMaintenanceStatus::Pending => "pending",
            WalMaintenanceStatus::Running => "running",
            WalMaintenanceStatus::Completed => "completed",
            WalMaintenanceStatus::Failed => "failed",
            WalMaintenanceStatus::Retryable => "retryable",
        }
    }
}

impl fmt::Display for WalMaintenanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WalMaintenanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WalMaintenanceStatus::Pending),
            "running" => Ok(WalMaintenanceStatus::Running),
            "completed" => Ok(WalMaintenanceStatus::Completed),
            "failed" => Ok(WalMaintenanceStatus::Failed),
            "retryable" => Ok(WalMaintenanceStatus::Retryable),
            other => Err(format!("unknown WAL maintenance status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalMaintenanceSnapshot {
    pub id: i64,
    pub requested_mode: WalCheckpointMode,
    pub status: WalMaintenanceStatus,
    pub requested_by: Option<String>,
    pub reason: Option<String>,
    pub execute_after: DateTime<Utc>,
    pub retry_count: i64,
    pub retry_after: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub worker_heartbeat_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub checkpoint_busy: Option<i64>,
    pub checkpoint_log_frames: Option<i64>,
    pub checkpointed_frames: Option<i64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalMaintenanceMetrics {
    pub generated_at: DateTime<Utc>,
    pub pending: i64,
    pub running: i64,
    pub retryable: i64,
    pub failed: i64,
    pub completed: i64,
    pub latest_completed_at: Option<DateTime<Utc>>,
}
