//! relogin API - HTTP server for persistent logins
//!
//! Exposes the persistent login protocol over HTTP:
//! - Session login and logout for principals vouched for by an upstream authenticator
//! - Transparent re-login from remember-me cookies
//! - Remembered device listing and revocation
//!
//! Author: hephaex@gmail.com

pub mod cookies;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod principals;
pub mod repository;
pub mod routes;
pub mod session;
pub mod state;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use state::AppState;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the CORS layer from configured origins
///
/// Cookies are credentials, so only explicitly listed origins are allowed.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    tracing::info!(allowed_origins = ?allowed, "CORS configured with {} allowed origins", allowed.len());

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
        .allow_credentials(true)
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Router over in-memory storage with principals `100` and `200`
///
/// Hashing runs at the lowest cost and cookies are not marked `Secure`.
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    create_router(Arc::new(create_state_for_testing()))
}

/// State behind [`create_router_for_testing`]
#[cfg(any(test, feature = "test-utils"))]
pub fn create_state_for_testing() -> AppState {
    use relogin_core::config::AppConfig;
    use relogin_core::{HashConfig, MemoryTokenRepository, StaticPrincipals};

    let mut config = AppConfig::default();
    config.hashing = HashConfig::low_cost();
    config.server.secure_cookies = false;

    AppState::new(
        config,
        Arc::new(MemoryTokenRepository::new()),
        principals::Principals::Static(StaticPrincipals::new([100i64, 200])),
        "memory",
    )
    .expect("default test configuration is valid")
}
