//! Server configuration: the listen address plus the core settings.

use std::net::SocketAddr;

use campuslink_core::{ConfigError, CoreConfig};

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub core: CoreConfig,
}

impl ServerConfig {
    /// Load configuration from `CAMPUSLINK_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_addr = std::env::var("CAMPUSLINK_HTTP_ADDR")
            .unwrap_or_else(|_| DEFAULT_HTTP_ADDR.to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("CAMPUSLINK_HTTP_ADDR".to_string()))?;

        Ok(Self {
            http_addr,
            core: CoreConfig::from_env()?,
        })
    }
}
