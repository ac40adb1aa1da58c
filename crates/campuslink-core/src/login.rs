//! CAS single sign-on handshake.
//!
//! A login runs: reuse check -> candidate -> login page (execution token) ->
//! credential POST -> landing page -> status verification -> commit. Every
//! provider URL goes through the tunnel cipher, and every request is bounded
//! by the transport's connect and total timeouts.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use regex::Regex;
use reqwest::{header, Client, RequestBuilder};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ProviderEndpoints;
use crate::error::{AuthError, LoginStep};
use crate::profile::{parse_status, Profile};
use crate::session::{Candidate, Session, SessionStore};
use crate::token::IssuedToken;
use crate::tunnel::TunnelCipher;

// ============================================================================
// Constants
// ============================================================================

/// Name of the hidden login-form input carrying the one-time execution token
const EXECUTION_FIELD: &str = "execution";

/// Fixed form values the provider expects alongside the credentials
const SUBMIT_LABEL: &str = "登录";
const GRANT_TYPE: &str = "username_password";
const EVENT_ID: &str = "submit";

static INPUT_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<input\b[^>]*>").expect("INPUT_TAG_REGEX is a valid regex pattern")
});

static ATTRIBUTE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>/]+))"#)
        .expect("ATTRIBUTE_REGEX is a valid regex pattern")
});

/// Error banners, most specific first
static ERROR_BANNER_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?is)<span\b[^>]*class\s*=\s*["'][^"']*\btip-text\b[^"']*["'][^>]*>(.*?)</span>"#,
        r#"(?is)<[a-z]+\b[^>]*id\s*=\s*["']showErrorTip["'][^>]*>(.*?)</[a-z]+>"#,
        r#"(?is)<[a-z]+\b[^>]*id\s*=\s*["']msg["'][^>]*>(.*?)</[a-z]+>"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("ERROR_BANNER_REGEXES are valid regex patterns"))
    .collect()
});

static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("TAG_REGEX is a valid regex pattern"));

// ============================================================================
// Page scraping
// ============================================================================

fn attribute(tag: &str, name: &str) -> Option<String> {
    ATTRIBUTE_REGEX.captures_iter(tag).find_map(|caps| {
        if !caps[1].eq_ignore_ascii_case(name) {
            return None;
        }
        caps.get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().to_string())
    })
}

/// The execution token from the login form, if present and non-blank
pub fn extract_execution(html: &str) -> Option<String> {
    INPUT_TAG_REGEX
        .find_iter(html)
        .map(|m| m.as_str())
        .find(|tag| attribute(tag, "name").as_deref() == Some(EXECUTION_FIELD))
        .and_then(|tag| attribute(tag, "value"))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Human-readable error text the provider rendered into a page, if any
pub fn extract_error_banner(html: &str) -> Option<String> {
    ERROR_BANNER_REGEXES.iter().find_map(|regex| {
        regex.captures_iter(html).find_map(|caps| {
            let text = TAG_REGEX.replace_all(&caps[1], "");
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        })
    })
}

// ============================================================================
// Login flow
// ============================================================================

/// Result of a successful [`LoginFlow::login`]
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub profile: Profile,
    pub token: IssuedToken,
    /// True when an existing session was re-verified instead of logging in
    pub reused: bool,
}

/// Prunes an identity's entry from the login lock map once no other login
/// holds it. Runs on completion and when the login future is dropped mid-flight.
struct LockPrune<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    identity: &'a str,
}

impl Drop for LockPrune<'_> {
    fn drop(&mut self) {
        self.locks
            .remove_if(self.identity, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct LoginFlow {
    store: Arc<SessionStore>,
    tunnel: TunnelCipher,
    /// Provider endpoints as actually requested, already routed through the tunnel
    routes: ProviderEndpoints,
    /// Per-identity locks so overlapping logins for one identity run one at a time
    login_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LoginFlow {
    pub fn new(store: Arc<SessionStore>, tunnel: TunnelCipher, endpoints: ProviderEndpoints) -> Self {
        let routes = ProviderEndpoints {
            login_url: tunnel.to_tunnel_url(&endpoints.login_url),
            landing_url: tunnel.to_tunnel_url(&endpoints.landing_url),
            status_url: tunnel.to_tunnel_url(&endpoints.status_url),
        };
        Self {
            store,
            tunnel,
            routes,
            login_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn tunnel(&self) -> &TunnelCipher {
        &self.tunnel
    }

    /// The URLs every handshake and status request goes to
    pub fn routes(&self) -> &ProviderEndpoints {
        &self.routes
    }

    /// Log `identity` in, reusing a still-valid session when there is one.
    pub async fn login(&self, identity: &str, secret: &str) -> Result<LoginOutcome, AuthError> {
        // Declared first so it drops after the lock and its guard
        let _prune = LockPrune {
            locks: &self.login_locks,
            identity,
        };
        let lock = Arc::clone(
            self.login_locks
                .entry(identity.to_string())
                .or_default()
                .value(),
        );
        let _guard = lock.lock().await;
        self.login_serialized(identity, secret).await
    }

    async fn login_serialized(&self, identity: &str, secret: &str) -> Result<LoginOutcome, AuthError> {
        if let Some(session) = self.store.get(identity) {
            match self.verify(identity, session.client()).await {
                Ok(Some(_)) => {
                    session.renew();
                    let token = self.store.issue_token(&session)?;
                    debug!(username = %identity, "Reused verified session");
                    return Ok(LoginOutcome {
                        profile: session.profile().clone(),
                        token,
                        reused: true,
                    });
                }
                Ok(None) => {
                    warn!(username = %identity, "Cached session no longer verifies, logging in again");
                    self.store.invalidate_session(&session);
                }
                Err(e) => {
                    warn!(username = %identity, error = %e, "Cached session check failed, logging in again");
                    self.store.invalidate_session(&session);
                }
            }
        }

        // The candidate's transport is released on every early return below
        let candidate = self.store.prepare(identity)?;
        let profile = self.handshake(&candidate, identity, secret).await?;
        let (_, token) = self.store.commit_with_token(candidate, profile.clone())?;

        info!(username = %identity, "Login succeeded");
        Ok(LoginOutcome {
            profile,
            token,
            reused: false,
        })
    }

    async fn handshake(
        &self,
        candidate: &Candidate,
        identity: &str,
        secret: &str,
    ) -> Result<Profile, AuthError> {
        let client = candidate.client();
        let login_url = &self.routes.login_url;

        debug!(username = %identity, url = %login_url, "Fetching login page");
        let login_page = Self::fetch_text(client.get(login_url), identity, LoginStep::LoginPage).await?;
        let execution = extract_execution(&login_page).ok_or_else(|| {
            AuthError::protocol(identity, LoginStep::LoginPage, "execution token missing from login page")
        })?;

        debug!(username = %identity, "Submitting credentials");
        let form = [
            ("username", identity),
            ("password", secret),
            ("submit", SUBMIT_LABEL),
            ("type", GRANT_TYPE),
            (EXECUTION_FIELD, execution.as_str()),
            ("_eventId", EVENT_ID),
        ];
        // A rejected password comes back as a page, not a transport error,
        // so the status is left to verification to judge.
        let response = client
            .post(login_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::from_reqwest(identity, LoginStep::SubmitCredentials, e))?;
        let submit_status = response.status();
        let submit_page = response
            .text()
            .await
            .map_err(|e| AuthError::from_reqwest(identity, LoginStep::SubmitCredentials, e))?;
        debug!(username = %identity, status = %submit_status, "Credentials submitted");

        let landing = client
            .get(&self.routes.landing_url)
            .send()
            .await
            .map_err(|e| AuthError::from_reqwest(identity, LoginStep::Landing, e))?;
        if !landing.status().is_success() {
            debug!(username = %identity, status = %landing.status(), "Landing page returned non-success");
        }

        match self.verify(identity, client).await? {
            Some(profile) => Ok(profile),
            None => {
                let banner = extract_error_banner(&submit_page).or_else(|| extract_error_banner(&login_page));
                match banner {
                    Some(message) => {
                        info!(username = %identity, message = %message, "Provider rejected credentials");
                        Err(AuthError::Credentials(message))
                    }
                    None => Err(AuthError::Verification {
                        username: identity.to_string(),
                    }),
                }
            }
        }
    }

    /// Query the status endpoint with `client`. `Ok(None)` means the provider
    /// answered but did not confirm a logged-in user.
    async fn verify(&self, identity: &str, client: &Client) -> Result<Option<Profile>, AuthError> {
        let response = client
            .get(&self.routes.status_url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthError::from_reqwest(identity, LoginStep::Verify, e))?;

        if !response.status().is_success() {
            debug!(username = %identity, status = %response.status(), "Status endpoint returned non-success");
            return Ok(None);
        }
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::from_reqwest(identity, LoginStep::Verify, e))?;
        Ok(parse_status(&body))
    }

    /// Re-verify a committed session upstream, renewing it on success.
    /// A session the provider no longer recognises is invalidated.
    pub async fn refresh_status(&self, session: &Session) -> Result<Profile, AuthError> {
        let identity = session.identity();
        match self.verify(identity, session.client()).await? {
            Some(profile) => {
                session.renew();
                Ok(profile)
            }
            None => {
                warn!(username = %identity, "Session failed re-verification, invalidating");
                self.store.invalidate_session(session);
                Err(AuthError::Verification {
                    username: identity.to_string(),
                })
            }
        }
    }

    /// Send a request and return the body of a successful response
    async fn fetch_text(
        request: RequestBuilder,
        identity: &str,
        step: LoginStep,
    ) -> Result<String, AuthError> {
        let response = request
            .send()
            .await
            .map_err(|e| AuthError::from_reqwest(identity, step, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::from_reqwest(identity, step, e))?;
        if !status.is_success() {
            return Err(AuthError::from_status(identity, step, status, &body));
        }
        Ok(body)
    }
}
