//! Runtime configuration.
//!
//! Everything is supplied through `CAMPUSLINK_*` environment variables; there
//! is no configuration file. Each struct is a plain value so tests can build
//! one directly.

use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Prefix for every environment variable read here
const ENV_PREFIX: &str = "CAMPUSLINK_";

/// Gateway host used when none is configured.
const DEFAULT_GATEWAY_HOST: &str = "webvpn.example.edu";

const DEFAULT_TOKEN_ISSUER: &str = "campuslink";
const DEFAULT_TOKEN_AUDIENCE: &str = "campuslink-clients";

/// Minimum signing secret length. HS256 wants at least 256 bits of key.
const MIN_SECRET_LEN: usize = 32;

/// Session lifetime in seconds.
/// Campus SSO cookies go stale after roughly 30 minutes of inactivity.
const DEFAULT_SESSION_TTL_SECS: u64 = 1800;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Connect timeout in seconds. Short, so an unreachable provider fails fast.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Total request timeout in seconds.
/// 30s allows for a slow provider while still bounding every handshake step.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(String),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub enabled: bool,
    /// Gateway host; URLs already on this host are never re-wrapped
    pub gateway_host: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gateway_host: DEFAULT_GATEWAY_HOST.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

impl TokenConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: DEFAULT_TOKEN_ISSUER.to_string(),
            audience: DEFAULT_TOKEN_AUDIENCE.to_string(),
        }
    }
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

/// Upstream identity-provider endpoints, as plain (untunnelled) URLs.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    /// CAS login page; the credential form is posted back here
    pub login_url: String,
    /// Post-login landing page that hands the identity to the application
    pub landing_url: String,
    /// JSON status endpoint used for verification
    pub status_url: String,
}

/// Timeouts applied to every outbound request of a session transport.
#[derive(Debug, Clone, Copy)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session TTL, also the lifetime of every token minted for it
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub timeouts: HttpTimeouts,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            timeouts: HttpTimeouts::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub tunnel: TunnelConfig,
    pub token: TokenConfig,
    pub session: SessionConfig,
    pub provider: ProviderEndpoints,
}

impl CoreConfig {
    /// Load configuration from `CAMPUSLINK_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let gateway_host = env
            .optional("TUNNEL_GATEWAY_HOST")
            .map(|host| host.trim().to_string())
            .unwrap_or_else(|| DEFAULT_GATEWAY_HOST.to_string());
        if !is_gateway_authority(&gateway_host) {
            return Err(ConfigError::Invalid(format!(
                "{}TUNNEL_GATEWAY_HOST must be host or host:port, got {:?}",
                ENV_PREFIX, gateway_host
            )));
        }
        let tunnel = TunnelConfig {
            enabled: env.parse_or("TUNNEL_ENABLED", false)?,
            gateway_host,
        };

        let secret = env.required("TOKEN_SECRET")?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "{}TOKEN_SECRET must be at least {} characters",
                ENV_PREFIX, MIN_SECRET_LEN
            )));
        }
        let token = TokenConfig {
            secret,
            issuer: env
                .optional("TOKEN_ISSUER")
                .unwrap_or_else(|| DEFAULT_TOKEN_ISSUER.to_string()),
            audience: env
                .optional("TOKEN_AUDIENCE")
                .unwrap_or_else(|| DEFAULT_TOKEN_AUDIENCE.to_string()),
        };

        let session = SessionConfig {
            ttl: Duration::from_secs(env.parse_or("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?),
            sweep_interval: Duration::from_secs(
                env.parse_or("SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?,
            ),
            timeouts: HttpTimeouts {
                connect: Duration::from_secs(
                    env.parse_or("CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
                ),
                request: Duration::from_secs(
                    env.parse_or("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
                ),
            },
        };

        let provider = ProviderEndpoints {
            login_url: env.required("SSO_LOGIN_URL")?,
            landing_url: env.required("SSO_LANDING_URL")?,
            status_url: env.required("SSO_STATUS_URL")?,
        };

        Ok(Self {
            tunnel,
            token,
            session,
            provider,
        })
    }
}

/// True for a bare `host` or `host:port` with no scheme, path or userinfo
fn is_gateway_authority(value: &str) -> bool {
    !value.contains(['/', '@', '?', '#'])
        && Url::parse(&format!("https://{value}/")).is_ok_and(|url| url.host_str().is_some())
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &str) -> Result<String, ConfigError> {
        self.optional(name)
            .ok_or_else(|| ConfigError::Missing(format!("{}{}", ENV_PREFIX, name)))
    }

    fn parse_or<T: std::str::FromStr>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        match self.optional(name) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{}{}", ENV_PREFIX, name))),
            None => Ok(default),
        }
    }
}
