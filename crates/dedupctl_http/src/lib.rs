//! HTTP adapter for dedupctl (spec §6, §9, §13).
//!
//! `build_router` is the single place the REST surface is assembled; every
//! handler lives in `routes` and reaches the domain only through
//! [`state::AppState`].

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::{AppState, AppStateInner};

pub fn build_router(state: AppState) -> Router {
    let jobs = Router::new()
        .route("/", post(routes::jobs::create_job).get(routes::jobs::list_jobs))
        .route("/scan-hash/claim", post(routes::jobs::claim_job))
        .route("/recover-stale", post(routes::jobs::recover_stale))
        .route("/:id", get(routes::jobs::get_job))
        .route("/:id/heartbeat", post(routes::jobs::heartbeat))
        .route("/:id/finish", post(routes::jobs::finish_job))
        .route("/:id/cancel", post(routes::jobs::cancel_job))
        .route("/:id/reset", post(routes::jobs::reset_job));

    let thumbs = Router::new()
        .route("/request", post(routes::thumbs::request_thumbnail))
        .route("/metrics", get(routes::thumbs::metrics))
        .route("/cleanup/group", post(routes::thumbs::cleanup_group))
        .route("/:key", get(routes::thumbs::get_thumbnail))
        .route("/:key/content", get(routes::thumbs::get_thumbnail_content));

    let maintenance = Router::new()
        .route("/wal/checkpoint", post(routes::maintenance::request_checkpoint))
        .route("/wal/checkpoint/latest", get(routes::maintenance::latest_checkpoint))
        .route("/wal/metrics", get(routes::maintenance::metrics));

    let duplicates = Router::new()
        .route("/groups", get(routes::duplicates::list_groups))
        .route("/groups/:group_key/files", get(routes::duplicates::list_group_files));

    let api = Router::new()
        .nest("/jobs", jobs)
        .nest("/thumbs", thumbs)
        .nest("/maintenance", maintenance)
        .nest("/duplicates", duplicates);

    Router::new()
        .route("/health", get(routes::health::health))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dedupctl_core::duplicates::DuplicateService;
    use dedupctl_core::jobs::JobService;
    use dedupctl_core::maintenance::WalMaintenanceService;
    use dedupctl_core::thumbs::ThumbnailService;
    use clap::Parser;
    use dedupctl_core::{schema, Settings};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let pool = dedupctl_db::create_pool(dedupctl_db::DbConfig::sqlite_memory())
            .await
            .unwrap();
        schema::run_migrations(&pool).await.unwrap();

        let settings = Settings::try_parse_from(["dedupctl"]).unwrap();
        let jobs = JobService::new(pool.clone(), 300, true, false);
        let thumbs = ThumbnailService::new(
            pool.clone(),
            std::path::PathBuf::from("/tmp/libraries"),
            std::path::PathBuf::from("/tmp/thumbs"),
            dedupctl_core::thumbs::ThumbnailFormat::Webp,
            512,
            100,
            300,
        );
        let maintenance = WalMaintenanceService::new(
            pool.clone(),
            dedupctl_core::maintenance::WalCheckpointMode::Passive,
            true,
            60,
        );
        let duplicates = DuplicateService::new(pool, 100, 1000);

        Arc::new(AppStateInner {
            settings,
            jobs,
            thumbs,
            maintenance,
            duplicates,
            started_at: chrono::Utc::now(),
        })
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let router = build_router(test_state().await);
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_job_returns_404() {
        let router = build_router(test_state().await);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/jobs/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_and_fetch_job_round_trips() {
        let router = build_router(test_state().await);
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"kind":"scan"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    /// S1: a second concurrent scan/hash job conflicts, and a claim with no
    /// pending job returns 404.
    #[tokio::test]
    async fn scan_hash_admission_mutex_conflicts_over_http() {
        let router = build_router(test_state().await);

        let create_scan = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"kind":"scan"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create_scan.status(), StatusCode::CREATED);

        let create_hash = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"kind":"hash"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create_hash.status(), StatusCode::CONFLICT);

        let claim = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/jobs/scan-hash/claim")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"worker_id":"w1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(claim.status(), StatusCode::OK);

        let second_claim = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/jobs/scan-hash/claim")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"worker_id":"w2"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second_claim.status(), StatusCode::NOT_FOUND);
    }

    /// S8: a well-formed but semantically invalid duplicate-groups cursor
    /// (hex the wrong length for its claimed algorithm) is rejected as 422.
    #[tokio::test]
    async fn malformed_duplicate_groups_cursor_is_unprocessable() {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;

        let router = build_router(test_state().await);
        let payload = serde_json::json!({
            "file_count": 3,
            "total_size_bytes": 300,
            "hash_algorithm": "sha256",
            "content_hash_hex": "aa",
        });
        let cursor = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());

        let response = router
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/duplicates/groups?cursor={cursor}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    /// A thumbnail request against a non-existent file_id is a 404, and an
    /// invalid job-list cursor is a 422.
    #[tokio::test]
    async fn thumbnail_not_found_and_invalid_job_cursor() {
        let router = build_router(test_state().await);

        let thumb_response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/thumbs/request")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"file_id":999}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(thumb_response.status(), StatusCode::NOT_FOUND);

        let jobs_response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/jobs?cursor=does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(jobs_response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
