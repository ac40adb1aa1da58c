use std::fmt;

use thiserror::Error;

/// Handshake step a protocol failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    LoginPage,
    SubmitCredentials,
    Landing,
    Verify,
}

impl fmt::Display for LoginStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginStep::LoginPage => "login page",
            LoginStep::SubmitCredentials => "credential submission",
            LoginStep::Landing => "post-login landing",
            LoginStep::Verify => "status verification",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("SSO protocol failure for {username} during {step}: {message}")]
    Protocol {
        username: String,
        step: LoginStep,
        message: String,
    },

    #[error("{0}")]
    Credentials(String),

    #[error("Login for {username} could not be verified")]
    Verification { username: String },

    #[error("No session for {0}")]
    NoSession(String),

    #[error("Token is invalid, expired, or no longer bound to a session")]
    TokenInvalid,

    #[error("Failed to build HTTP transport: {0}")]
    Transport(String),

    #[error("Failed to sign token: {0}")]
    Token(String),
}

/// Maximum length for upstream response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl AuthError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn protocol(username: &str, step: LoginStep, message: impl Into<String>) -> Self {
        AuthError::Protocol {
            username: username.to_string(),
            step,
            message: message.into(),
        }
    }

    /// Protocol failure for a non-success upstream status
    pub fn from_status(
        username: &str,
        step: LoginStep,
        status: reqwest::StatusCode,
        body: &str,
    ) -> Self {
        Self::protocol(
            username,
            step,
            format!("Status {}: {}", status, Self::truncate_body(body)),
        )
    }

    /// Protocol failure for a transport-level error (connect, timeout, body read)
    pub fn from_reqwest(username: &str, step: LoginStep, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("timed out: {}", err)
        } else {
            err.to_string()
        };
        Self::protocol(username, step, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_short() {
        assert_eq!(AuthError::truncate_body("oops"), "oops");
    }

    #[test]
    fn test_truncate_body_long_respects_char_boundaries() {
        let body = "密".repeat(400);
        let truncated = AuthError::truncate_body(&body);
        assert!(truncated.contains("truncated, 1200 total bytes"));
        assert!(truncated.len() < body.len());
    }

    #[test]
    fn test_protocol_message_names_user_and_step() {
        let err = AuthError::from_status(
            "u1",
            LoginStep::LoginPage,
            reqwest::StatusCode::BAD_GATEWAY,
            "gateway down",
        );
        let text = err.to_string();
        assert!(text.contains("u1"));
        assert!(text.contains("login page"));
        assert!(text.contains("502"));
        assert!(text.contains("gateway down"));
    }

    #[test]
    fn test_credentials_error_displays_banner_verbatim() {
        assert_eq!(AuthError::Credentials("密码错误".into()).to_string(), "密码错误");
    }
}
