//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::handlers::{devices, session};
use crate::middleware::relogin_middleware;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

/// Create API v1 routes
///
/// Every route runs behind the persistent login middleware, which resolves
/// the caller once per request.
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/session",
            post(session::login)
                .get(session::current)
                .delete(session::logout),
        )
        .route("/logout-all", post(session::logout_all))
        .route("/devices", get(devices::list_devices))
        .route("/devices/:sequence", delete(devices::remove_device))
        .route_layer(middleware::from_fn_with_state(state, relogin_middleware))
}
