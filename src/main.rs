use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use transcode_service::app;
use transcode_service::config::settings::AppConfig;
use transcode_service::modules::jobs::service::JobManager;
use transcode_service::state::AppState;
use transcode_service::workers::probe::tool_available;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    info!("Starting server...");

    let config = AppConfig::new().context("Invalid configuration")?;

    for (name, path) in [("ffmpeg", &config.ffmpeg_path), ("ffprobe", &config.ffprobe_path)] {
        if !tool_available(path) {
            warn!("⚠️ {} not found at {}; jobs will fail until it is installed", name, path.display());
        }
    }

    let jobs = JobManager::from_config(&config)
        .await
        .context("Failed to prepare workspace root")?;
    jobs.store()
        .recover()
        .await
        .context("Failed to clear stale workspaces")?;

    let sweeper = jobs.spawn_retention_sweeper(sweep_interval(config.result_retention()));

    let state = AppState::new(config.clone(), jobs.clone());
    let app = app::create_app(state).await;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🚀 Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down, cancelling running jobs");
    sweeper.abort();
    jobs.shutdown().await;
    Ok(())
}

fn sweep_interval(retention: Duration) -> Duration {
    (retention / 4).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
