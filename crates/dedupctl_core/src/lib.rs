//! Control-plane core for dedupctl: schema migrations, job coordination,
//! the thumbnail queue, the WAL maintenance scheduler, and the duplicate-
//! group query engine (spec §3-§4).
//!
//! `dedupctl_http` and the `dedupctl` binary depend on this crate and
//! never touch SQL directly; every statement that can mutate state lives
//! in one of the service modules below.

pub mod config;
pub mod duplicates;
pub mod error;
pub mod jobs;
pub mod maintenance;
pub mod path_safety;
pub mod schema;
pub mod thumbs;

pub use config::{ConfigError, Settings};
pub use error::{CoreError, Result};
