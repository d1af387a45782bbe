//! Job coordinator (spec §3, §4.1, C4).

mod service;
mod types;

pub use service::JobService;
pub use types::{JobKind, JobListResult, JobSnapshot, JobStatus};
