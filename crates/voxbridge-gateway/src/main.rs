//! voxbridge gateway: voice sessions over WebSocket plus the HTTP routes around them.
//! Bare metal, no Docker. Configuration from `config/voxbridge.toml`, `VOXBRIDGE__*` and `.env`.

mod playback;
mod routes;
mod state;
mod ws;

use anyhow::Context;
use state::AppState;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use voxbridge_core::config::ServerConfig;
use voxbridge_core::VoxConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env first so provider keys can live outside the config file.
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[voxbridge-gateway] .env not loaded: {} (using system environment)", e);
    }

    let config = VoxConfig::load().context("loading configuration")?;
    let _log_guard = init_tracing(&config.server);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::from_config(config).context("building gateway state")?;
    let app = routes::router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(version = voxbridge_core::version(), %addr, "voxbridge gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    for id in state.registry.ids() {
        if let Some(handle) = state.registry.remove(&id) {
            handle.stop();
        }
    }
    tracing::info!("voxbridge gateway stopped");
    Ok(())
}

/// stdout always; a daily-rolling file as well when `server.log_dir` is set.
fn init_tracing(server: &ServerConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let (file_layer, guard) = match &server.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "voxbridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Ctrl+C handler failed: {}", e);
    }
    tracing::info!("shutdown requested");
}
