//! relogin API Server
//!
//! HTTP server for rotating-token persistent logins.
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use relogin_api::{create_router, state::AppState};
use relogin_core::config::{AppConfig, LoggingConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "relogin_api={level},relogin_core={level},audit=info,tower_http=info",
            level = logging.level
        )
        .into()
    });

    if logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration: RELOGIN_CONFIG file if set, env on top
    let config = match std::env::var("RELOGIN_CONFIG") {
        Ok(path) => AppConfig::from_file(&path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };

    init_tracing(&config.logging);

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create application state; an invalid login policy stops startup here
    let state = Arc::new(
        AppState::connect(config)
            .await
            .context("Failed to initialize application state")?,
    );
    tracing::info!(storage = state.storage_backend, "Persistent login service ready");

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("relogin API Server starting on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
