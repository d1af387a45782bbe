//! Shared application state threaded through every handler (spec §9
//! "Global mutable singletons... replace with an explicit application
//! container created once at startup").

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dedupctl_core::duplicates::DuplicateService;
use dedupctl_core::jobs::JobService;
use dedupctl_core::maintenance::WalMaintenanceService;
use dedupctl_core::thumbs::ThumbnailService;
use dedupctl_core::Settings;

pub struct AppStateInner {
    pub settings: Settings,
    pub jobs: JobService,
    pub thumbs: ThumbnailService,
    pub maintenance: WalMaintenanceService,
    pub duplicates: DuplicateService,
    pub started_at: DateTime<Utc>,
}

pub type AppState = Arc<AppStateInner>;
