//! Taxonomic error kinds for the control plane (spec §7).
//!
//! Each operation declares which of these it may produce; `dedupctl_http`
//! maps every variant to an HTTP status code uniformly, in one place,
//! rather than letting individual handlers choose status codes ad hoc.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A job, thumbnail, or WAL maintenance row was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation attempted an FSM transition outside the allowed table.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Admission mutex violation, wrong worker, expired lease.
    #[error("conflict: {0}")]
    Conflict(String),

    /// WAL checkpoint is rate-limited by policy; `wait_seconds` is advisory.
    #[error("rate limited: {message}")]
    RateLimited { message: String, wait_seconds: i64 },

    /// Thumbnail queue is at capacity.
    #[error("queue full: {0}")]
    QueueFull(String),

    /// dry_run blocks real-run jobs, delete disabled, truncate disabled,
    /// unsupported media type, path escape.
    #[error("policy violation: {0}")]
    Policy(String),

    /// Bad cursor, bad progress, blank worker_id, bad mode.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Data corruption discovered during a read (e.g. unknown hash
    /// algorithm string surfacing out of a duplicate-group aggregate).
    #[error("query error: {0}")]
    QueryError(String),

    /// Unexpected store-level failure, folded in rather than leaked raw.
    #[error("store error: {0}")]
    Store(#[from] dedupctl_db::DbError),
}

impl CoreError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>, wait_seconds: i64) -> Self {
        Self::RateLimited {
            message: msg.into(),
            wait_seconds,
        }
    }

    pub fn queue_full(msg: impl Into<String>) -> Self {
        Self::QueueFull(msg.into())
    }

    pub fn policy(msg: impl Into<String>) -> Self {
        Self::Policy(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn query_error(msg: impl Into<String>) -> Self {
        Self::QueryError(msg.into())
    }
}
