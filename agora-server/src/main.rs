//! agora discussion server
//!
//! # Environment variables
//!
//! - `BIND_HOST`: host to bind to (default `0.0.0.0`)
//! - `BIND_PORT`: port to bind to (default `8080`)
//! - `AGORA_DATA_DIR`: room storage root (default: platform data dir)
//! - `AGORA_SETTINGS_PATH`: settings TOML path (default: `<data dir>/settings.toml`)

use agora_core::EngineConfig;
use agora_runtime::FrameworkManager;
use agora_server::hub::ClientHub;
use agora_server::settings::SettingsManager;
use agora_server::{AppState, router};
use agora_store::FsRoomStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora_server=info,agora_runtime=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::default();

    let data_dir = std::env::var("AGORA_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("agora")
                .join("rooms")
        });
    let settings_path = std::env::var("AGORA_SETTINGS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            data_dir
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."))
                .join("settings.toml")
        });

    let store = FsRoomStore::new(data_dir.clone());
    if let Err(error) = store.init().await {
        tracing::error!(%error, "could not initialize room storage");
        std::process::exit(1);
    }

    let settings = Arc::new(SettingsManager::new(settings_path, config.think_timeout));
    if let Err(error) = settings.load().await {
        tracing::warn!(%error, "could not load settings; using defaults");
    }

    let manager = Arc::new(FrameworkManager::new(
        config.clone(),
        Arc::new(store),
        settings.resolver(),
    ));
    let hub = Arc::new(ClientHub::new(config.publish_timeout));
    let state = AppState::new(Arc::clone(&manager), hub, settings);

    tracing::info!(
        data_dir = %data_dir.display(),
        server_restart_id = %state.server_restart_id,
        "starting agora server"
    );

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let host = std::env::var("BIND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("BIND_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .expect("Invalid host:port combination");

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_requested())
        .await
        .unwrap();

    // Cancel every live discussion and wait out the grace period.
    manager.shutdown().await;
    tracing::info!("all discussions drained, server exiting");
}

/// Resolves when the operator asks the server to stop (ctrl-c, or SIGTERM
/// on unix), after which live discussions get the grace period to drain.
async fn shutdown_requested() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("cannot listen for SIGTERM");
        let signal = tokio::select! {
            _ = tokio::signal::ctrl_c() => "ctrl-c",
            _ = sigterm.recv() => "SIGTERM",
        };
        tracing::info!(signal, "shutdown requested, draining discussions");
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(signal = "ctrl-c", "shutdown requested, draining discussions");
    }
}
