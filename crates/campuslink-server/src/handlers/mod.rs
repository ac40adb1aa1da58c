//! HTTP handlers

mod auth;
mod health;

pub use auth::{login, logout, session_info, status};
pub use health::health;
