//! Core library for campuslink.
//!
//! Authenticates a university member against the campus CAS single sign-on,
//! keeps the resulting cookie-bearing session in memory, and hands out short
//! lived bearer tokens that resolve back to it.
//!
//! - `SessionStore`: concurrent identity -> session map with TTL expiry and a
//!   token index
//! - `LoginFlow`: the SSO handshake, with reuse of still-valid sessions
//! - `TokenService`: HS256 bearer token issuance and validation
//! - `TunnelCipher`: URL rewriting for the off-campus tunnel gateway

pub mod config;
pub mod error;
pub mod login;
pub mod profile;
pub mod session;
pub mod token;
pub mod tunnel;

pub use config::{
    ConfigError, CoreConfig, HttpTimeouts, ProviderEndpoints, SessionConfig, TokenConfig,
    TunnelConfig,
};
pub use error::{AuthError, LoginStep};
pub use login::{LoginFlow, LoginOutcome};
pub use profile::Profile;
pub use session::{Candidate, Session, SessionStore};
pub use token::{CredentialClaims, IssuedToken, TokenService};
pub use tunnel::TunnelCipher;
