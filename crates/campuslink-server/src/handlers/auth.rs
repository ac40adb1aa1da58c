//! Authentication handlers (login, status, session, logout)

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use campuslink_core::{AuthError, Profile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::extractors::AuthSession;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub reused: bool,
    pub profile: Profile,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub username: String,
    pub profile: Profile,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub username: String,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
    pub last_renewed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /login
///
/// Log in through campus SSO and receive a bearer token for the session
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<LoginResponse>> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "username and password are required".to_string(),
        ));
    }

    let outcome = state.login.login(username, &req.password).await.map_err(|e| {
        warn!(username = %username, error = %e, "Login failed");
        ApiError::from(e)
    })?;

    Ok(Json(LoginResponse {
        token: outcome.token.token,
        token_type: "Bearer",
        expires_at: outcome.token.expires_at,
        reused: outcome.reused,
        profile: outcome.profile,
    }))
}

/// GET /status
///
/// Re-verify the bound session with the provider and return the fresh profile
pub async fn status(
    State(state): State<AppState>,
    auth: AuthSession,
) -> ApiResult<Json<StatusResponse>> {
    let profile = state.login.refresh_status(&auth.session).await?;
    Ok(Json(StatusResponse {
        username: auth.session.identity().to_string(),
        profile,
    }))
}

/// GET /session
///
/// In-memory session metadata; no upstream call
pub async fn session_info(auth: AuthSession) -> Json<SessionResponse> {
    let session = auth.session;
    Json(SessionResponse {
        username: session.identity().to_string(),
        profile: session.profile().clone(),
        created_at: session.created_at(),
        last_renewed_at: session.last_renewed_at(),
        expires_at: session.expires_at(),
    })
}

/// POST /logout
///
/// Drop the session behind the presented token
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthSession,
) -> ApiResult<Json<LogoutResponse>> {
    if !state.store.invalidate_by_token(&auth.token) {
        // Raced with another logout or the sweeper
        return Err(AuthError::TokenInvalid.into());
    }
    info!(username = %auth.session.identity(), "Logged out");
    Ok(Json(LogoutResponse { success: true }))
}
