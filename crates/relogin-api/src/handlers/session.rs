//! Session handlers: login, current principal, logout, logout everywhere
//!
//! Passwords are never seen here. Login trusts the principal named by the
//! upstream authenticator in the configured header and only establishes the
//! session and, optionally, the remember-me credential.
//!
//! Author: hephaex@gmail.com

use crate::error::AppError;
use crate::middleware::AuthContext;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use relogin_core::{Principal, PrincipalId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Login request body
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    /// Issue a persistent cookie credential
    #[serde(default)]
    pub remember: bool,
}

/// Current session description
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub principal_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remember: Option<bool>,
}

/// Logout-all result
#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutAllResponse {
    pub removed: u64,
}

fn authenticated_principal(headers: &HeaderMap, header: &str) -> Result<PrincipalId, AppError> {
    let value = headers.get(header).ok_or(AppError::Unauthorized)?;
    let value = value
        .to_str()
        .map_err(|_| AppError::BadRequest(format!("{header} is not valid text")))?
        .trim();

    if value.is_empty() {
        return Err(AppError::BadRequest(format!("{header} is empty")));
    }
    Ok(PrincipalId::new(value))
}

/// POST /api/v1/session
pub async fn login(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let principal_id = authenticated_principal(&headers, &state.config.server.principal_header)?;

    let mut context = auth.lock().await;
    context
        .auth(&state.service)
        .login(&principal_id, body.remember)
        .await?;

    Ok(Json(SessionResponse {
        principal_id: principal_id.to_string(),
        remember: Some(body.remember),
    }))
}

/// GET /api/v1/session
pub async fn current(
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<SessionResponse>, AppError> {
    let context = auth.lock().await;
    let principal = context.principal().ok_or(AppError::Unauthorized)?;

    Ok(Json(SessionResponse {
        principal_id: principal.principal_id().to_string(),
        remember: None,
    }))
}

/// DELETE /api/v1/session
///
/// Logs out this device. Succeeds even when nobody is logged in.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<StatusCode, AppError> {
    let mut context = auth.lock().await;
    context.auth(&state.service).logout(None).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/logout-all
pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<LogoutAllResponse>, AppError> {
    let mut context = auth.lock().await;
    let principal_id = context
        .principal()
        .map(Principal::principal_id)
        .ok_or(AppError::Unauthorized)?;

    let removed = context.auth(&state.service).logout_all(&principal_id).await?;

    Ok(Json(LogoutAllResponse { removed }))
}
