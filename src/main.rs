use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::settings::AppConfig;
use crate::infrastructure::db::pool;
use crate::infrastructure::storage::s3::StorageService;
use crate::modules::recording::repository::RecordingRepository;
use crate::state::AppState;
use crate::workers::recorder::RecorderWorker;
use crate::workers::recorder::ffmpeg::{FfmpegCapture, SigintSignaller};
use crate::workers::recorder::status::StatusBoard;

mod app;
mod common;
mod config;
mod infrastructure;
mod modules;
mod routes;
mod state;
mod workers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting recorder worker...");

    let config = AppConfig::new().context("missing required environment variable")?;
    let settings = config.recorder.clone();

    let db = pool::connect_to_db(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    if config.run_migrations {
        pool::run_migrations(&db).await.context("failed to run migrations")?;
    }

    tokio::fs::create_dir_all(&settings.scratch_dir)
        .await
        .with_context(|| format!("cannot create scratch dir {}", settings.scratch_dir.display()))?;

    let storage = StorageService::new(
        &config.minio_url,
        &config.minio_region,
        &config.minio_bucket,
        &config.minio_access_key,
        &config.minio_secret_key,
    );
    storage.ensure_bucket().await;

    let status = StatusBoard::new(&settings.worker_id);
    let worker = RecorderWorker::new(
        settings.clone(),
        Arc::new(RecordingRepository::new(db.clone())),
        Arc::new(storage),
        Arc::new(FfmpegCapture::new(settings.ffmpeg_path.clone())),
        Arc::new(SigintSignaller),
        status.clone(),
    );
    info!(worker_id = worker.worker_id(), "Recorder configured");

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let state = AppState::new(config.clone(), db.clone(), status);
    let app = app::create_app(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Health endpoint on http://{}", addr);

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    worker.run(shutdown.clone()).await;

    // the worker may also stop on its own; take the server down with it
    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("health server failed: {}", e),
        Err(e) => error!("health server task panicked: {}", e),
    }

    db.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received SIGTERM"),
    }
    token.cancel();
}
