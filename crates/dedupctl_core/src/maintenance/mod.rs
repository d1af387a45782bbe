//! WAL maintenance scheduler (spec §4.3, C6).

mod service;
mod types;

pub use service::WalMaintenanceService;
pub use types::{WalCheckpointMode, WalMaintenanceMetrics, WalMaintenanceSnapshot, WalMaintenanceStatus};
