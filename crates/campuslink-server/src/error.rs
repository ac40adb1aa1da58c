//! Error responses for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use campuslink_core::AuthError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Missing bearer token")]
    MissingToken,

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MissingToken => StatusCode::UNAUTHORIZED,
            Self::Auth(err) => match err {
                AuthError::Credentials(_)
                | AuthError::Verification { .. }
                | AuthError::TokenInvalid
                | AuthError::NoSession(_) => StatusCode::UNAUTHORIZED,
                AuthError::Protocol { .. } => StatusCode::BAD_GATEWAY,
                AuthError::Transport(_) | AuthError::Token(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::MissingToken => "MISSING_TOKEN",
            Self::Auth(err) => match err {
                AuthError::Credentials(_) => "INVALID_CREDENTIALS",
                AuthError::Verification { .. } => "VERIFICATION_FAILED",
                AuthError::TokenInvalid => "INVALID_TOKEN",
                AuthError::NoSession(_) => "NO_SESSION",
                AuthError::Protocol { .. } => "UPSTREAM_ERROR",
                AuthError::Transport(_) | AuthError::Token(_) => "INTERNAL_ERROR",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        // Upstream and internal details stay in the log
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal error".to_string(),
            StatusCode::BAD_GATEWAY => "Identity provider unavailable".to_string(),
            _ => self.to_string(),
        };

        let body = ErrorResponse {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
