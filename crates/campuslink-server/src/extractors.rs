//! Bearer-token authentication for session-scoped handlers.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use campuslink_core::{AuthError, Session};

use crate::error::ApiError;
use crate::state::AppState;

/// The live session a request's bearer token resolves to
pub struct AuthSession {
    pub session: Arc<Session>,
    pub token: String,
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::MissingToken)?;
        let session = state
            .store
            .resolve_token(token)
            .ok_or(ApiError::Auth(AuthError::TokenInvalid))?;
        Ok(Self {
            session,
            token: token.to_string(),
        })
    }
}
