//! HTTP front end for campuslink.
//!
//! Routes:
//! - `POST /login`: SSO login, returns a bearer token
//! - `GET /status`: re-verify the session upstream (bearer)
//! - `GET /session`: session metadata (bearer)
//! - `POST /logout`: drop the session (bearer)
//! - `GET /health`: liveness

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod state;

use axum::routing::{get, post};
use axum::Router;

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/login", post(handlers::login))
        .route("/status", get(handlers::status))
        .route("/session", get(handlers::session_info))
        .route("/logout", post(handlers::logout))
        .route("/health", get(handlers::health))
        .with_state(state)
}
