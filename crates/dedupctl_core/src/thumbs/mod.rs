//! Thumbnail queue (spec §4.2, C5).

mod service;
mod types;

pub use service::ThumbnailService;
pub use types::{
    ThumbnailCleanupSnapshot, ThumbnailCleanupStatus, ThumbnailFormat, ThumbnailMediaType,
    ThumbnailMetricsSnapshot, ThumbnailSnapshot, ThumbnailStatus,
};
