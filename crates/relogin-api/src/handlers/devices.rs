//! Remembered device handlers
//!
//! Author: hephaex@gmail.com

use crate::error::AppError;
use crate::middleware::AuthContext;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use relogin_core::DeviceSession;
use std::sync::Arc;

/// GET /api/v1/devices
///
/// Every remembered device of the caller, most recently used first.
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<DeviceSession>>, AppError> {
    let mut context = auth.lock().await;
    let devices = context.auth(&state.service).devices().await?;

    Ok(Json(devices))
}

/// DELETE /api/v1/devices/:sequence
///
/// Targeting the caller's own sequence logs this device out.
pub async fn remove_device(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(sequence): Path<String>,
) -> Result<StatusCode, AppError> {
    let mut context = auth.lock().await;
    context.auth(&state.service).logout(Some(&sequence)).await?;

    Ok(StatusCode::NO_CONTENT)
}
