//! `dedupctl` binary: schema migration and the control-plane HTTP server.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dedupctl_core::duplicates::DuplicateService;
use dedupctl_core::jobs::JobService;
use dedupctl_core::maintenance::{WalCheckpointMode, WalMaintenanceService};
use dedupctl_core::thumbs::{ThumbnailFormat, ThumbnailService};
use dedupctl_core::{schema, Settings};
use dedupctl_db::{create_pool, DbConfig};
use dedupctl_http::{build_router, AppStateInner};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "dedupctl")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run pending schema migrations and exit.
    Migrate,
    /// Run the control-plane HTTP server (default).
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings.validated()?;

    dedupctl_logging::init_logging(dedupctl_logging::LogConfig {
        app_name: &settings.app_name,
        state_root: &settings.state_root,
        verbose: settings.log_level.eq_ignore_ascii_case("debug")
            || settings.log_level.eq_ignore_ascii_case("trace"),
    })?;

    let pool = create_pool(DbConfig::from_url(settings.effective_database_url())).await?;
    schema::run_migrations(&pool).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            tracing::info!("schema migrations applied, exiting");
            Ok(())
        }
        Command::Serve => serve(settings, pool).await,
    }
}

async fn serve(settings: Settings, pool: dedupctl_db::DbPool) -> anyhow::Result<()> {
    let wal_mode = WalCheckpointMode::from_str(&settings.wal_checkpoint_default_mode)
        .map_err(anyhow::Error::msg)?;
    let thumbnail_format = ThumbnailFormat::from_str(&settings.thumbnail_default_format)
        .map_err(anyhow::Error::msg)?;

    let jobs = JobService::new(
        pool.clone(),
        settings.job_lock_ttl_seconds,
        settings.dry_run,
        settings.allow_real_delete,
    );
    let thumbs = ThumbnailService::new(
        pool.clone(),
        settings.libraries_root.clone(),
        settings.effective_thumbs_root().to_path_buf(),
        thumbnail_format,
        settings.thumbnail_max_dimension as i64,
        settings.thumbnail_queue_capacity as i64,
        settings.thumbnail_cleanup_delay_seconds as i64,
    );
    let maintenance = WalMaintenanceService::new(
        pool.clone(),
        wal_mode,
        settings.wal_checkpoint_allow_truncate,
        settings.wal_checkpoint_min_interval_seconds as i64,
    );
    let duplicates = DuplicateService::new(
        pool.clone(),
        settings.default_page_size as i64,
        settings.max_page_size as i64,
    );

    let heartbeat_interval = Duration::from_secs(settings.job_lock_heartbeat_seconds.max(1));
    let bind_addr = format!("{}:{}", settings.api_host, settings.api_port);

    let state = Arc::new(AppStateInner {
        settings,
        jobs,
        thumbs,
        maintenance,
        duplicates,
        started_at: chrono::Utc::now(),
    });

    let (shutdown_tx, _) = tokio::sync::watch::channel(false);
    spawn_stale_job_recovery(state.clone(), heartbeat_interval, shutdown_tx.subscribe());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "dedupctl control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    Ok(())
}

/// Periodically demotes scan/hash jobs whose lease has expired, mirroring
/// the idempotent recovery `JobService` already runs inline on read paths
/// so a crashed worker's lease is reclaimed even without incoming traffic.
fn spawn_stale_job_recovery(
    state: dedupctl_http::AppState,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match state.jobs.recover_stale_jobs().await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!(recovered = n, "recovered stale jobs"),
                        Err(err) => tracing::warn!(error = %err, "stale job recovery failed"),
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    });
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining connections");
    let _ = shutdown_tx.send(true);
}
