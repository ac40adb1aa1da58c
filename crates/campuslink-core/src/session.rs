//! In-memory store of authenticated upstream sessions.
//!
//! A [`Session`] owns one cookie-bearing HTTP client that has completed SSO
//! verification for one identity. Login attempts build a [`Candidate`] first,
//! which only becomes visible once committed. Maps are sharded by key so
//! unrelated identities never contend on the same lock.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{HttpTimeouts, SessionConfig};
use crate::error::AuthError;
use crate::profile::Profile;
use crate::token::{IssuedToken, TokenService};

/// Floor for the background sweep period
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

// ============================================================================
// Transport
// ============================================================================

/// A private HTTP client with its own cookie jar and connection pool.
///
/// Counted in the store's live-transport gauge until dropped.
pub struct Transport {
    client: reqwest::Client,
    live: Arc<AtomicUsize>,
}

impl Transport {
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Candidate / Session
// ============================================================================

/// A login attempt in progress. Never visible through the store.
pub struct Candidate {
    identity: String,
    transport: Transport,
}

impl Candidate {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn client(&self) -> &reqwest::Client {
        self.transport.client()
    }
}

pub struct Session {
    id: u64,
    identity: String,
    transport: Transport,
    profile: Profile,
    created_at: DateTime<Utc>,
    last_renewed_ms: AtomicI64,
    ttl_ms: i64,
}

impl Session {
    /// Store-unique, increasing with every commit
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// The session's authenticated client, for downstream fetches
    pub fn client(&self) -> &reqwest::Client {
        self.transport.client()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_renewed_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_renewed_ms.load(Ordering::SeqCst))
            .single()
            .unwrap_or(self.created_at)
    }

    fn expires_ms(&self) -> i64 {
        self.last_renewed_ms
            .load(Ordering::SeqCst)
            .saturating_add(self.ttl_ms)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.expires_ms())
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp_millis() >= self.expires_ms()
    }

    /// Restart the TTL window
    pub fn renew(&self) {
        self.last_renewed_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("profile", &self.profile)
            .field("created_at", &self.created_at)
            .field("last_renewed_at", &self.last_renewed_at())
            .finish()
    }
}

#[derive(Debug, Clone)]
struct TokenBinding {
    identity: String,
    session_id: u64,
    expires_at: DateTime<Utc>,
}

// ============================================================================
// Store
// ============================================================================

pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    /// token id -> binding
    tokens: DashMap<String, TokenBinding>,
    token_service: TokenService,
    ttl: Duration,
    timeouts: HttpTimeouts,
    next_session_id: AtomicU64,
    live_transports: Arc<AtomicUsize>,
}

impl SessionStore {
    pub fn new(config: &SessionConfig, token_service: TokenService) -> Self {
        Self {
            sessions: DashMap::new(),
            tokens: DashMap::new(),
            token_service,
            ttl: config.ttl,
            timeouts: config.timeouts,
            next_session_id: AtomicU64::new(1),
            live_transports: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn token_service(&self) -> &TokenService {
        &self.token_service
    }

    /// Live session for `identity`; expired entries are evicted here
    pub fn get(&self, identity: &str) -> Option<Arc<Session>> {
        let session = self
            .sessions
            .get(identity)
            .map(|entry| Arc::clone(entry.value()))?;

        if session.is_expired() {
            if self
                .sessions
                .remove_if(identity, |_, current| Arc::ptr_eq(current, &session))
                .is_some()
            {
                self.purge_tokens(identity, session.id);
                debug!(username = %identity, "Evicted expired session on read");
            }
            return None;
        }
        Some(session)
    }

    /// Like [`get`](Self::get), for callers that assume an authenticated identity
    pub fn require(&self, identity: &str) -> Result<Arc<Session>, AuthError> {
        self.get(identity)
            .ok_or_else(|| AuthError::NoSession(identity.to_string()))
    }

    /// Open a fresh transport for a login attempt. The store is not modified.
    pub fn prepare(&self, identity: &str) -> Result<Candidate, AuthError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(self.timeouts.connect)
            .timeout(self.timeouts.request)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        self.live_transports.fetch_add(1, Ordering::SeqCst);
        Ok(Candidate {
            identity: identity.to_string(),
            transport: Transport {
                client,
                live: Arc::clone(&self.live_transports),
            },
        })
    }

    /// Publish a verified candidate, replacing any previous session for the
    /// identity. The replaced session's transport is released once its last
    /// holder lets go.
    pub fn commit(&self, candidate: Candidate, profile: Profile) -> Arc<Session> {
        let now = Utc::now();
        let Candidate {
            identity,
            transport,
        } = candidate;

        let session = Arc::new(Session {
            id: self.next_session_id.fetch_add(1, Ordering::SeqCst),
            identity: identity.clone(),
            transport,
            profile,
            created_at: now,
            last_renewed_ms: AtomicI64::new(now.timestamp_millis()),
            ttl_ms: i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX),
        });

        if let Some(previous) = self.sessions.insert(identity.clone(), Arc::clone(&session)) {
            debug!(
                username = %identity,
                replaced = previous.id,
                "Replaced existing session"
            );
        }
        info!(username = %identity, session_id = session.id, "Session committed");
        session
    }

    /// [`commit`](Self::commit), then mint and index a token for the new session
    pub fn commit_with_token(
        &self,
        candidate: Candidate,
        profile: Profile,
    ) -> Result<(Arc<Session>, IssuedToken), AuthError> {
        let session = self.commit(candidate, profile);
        let issued = self.issue_token(&session)?;
        Ok((session, issued))
    }

    /// Mint a token for an already committed session
    pub fn issue_token(&self, session: &Session) -> Result<IssuedToken, AuthError> {
        let issued = self.token_service.issue(session.identity(), self.ttl)?;
        self.tokens.insert(
            issued.token_id.clone(),
            TokenBinding {
                identity: session.identity().to_string(),
                session_id: session.id,
                expires_at: issued.expires_at,
            },
        );

        // Lost a race with invalidate: never leave a token pointing at nothing
        let still_live = self
            .sessions
            .get(session.identity())
            .map(|current| current.id >= session.id)
            .unwrap_or(false);
        if !still_live {
            self.tokens.remove(&issued.token_id);
            return Err(AuthError::NoSession(session.identity().to_string()));
        }
        Ok(issued)
    }

    /// Drop the session for `identity`; every token indexed to it stops resolving
    pub fn invalidate(&self, identity: &str) -> bool {
        match self.sessions.remove(identity) {
            Some((_, session)) => {
                self.purge_tokens(identity, session.id);
                info!(username = %identity, session_id = session.id, "Session invalidated");
                true
            }
            None => false,
        }
    }

    /// Drop `session` only if it is still the one published for its identity.
    /// A newer session committed since `session` was read, and that session's
    /// tokens, are left alone.
    pub fn invalidate_session(&self, session: &Session) -> bool {
        let identity = session.identity();
        let removed = self
            .sessions
            .remove_if(identity, |_, current| current.id == session.id)
            .is_some();
        if removed {
            self.purge_tokens(identity, session.id);
            info!(username = %identity, session_id = session.id, "Session invalidated");
        } else {
            debug!(
                username = %identity,
                session_id = session.id,
                "Session already replaced or removed"
            );
        }
        removed
    }

    /// Session for a bearer token: the signature and expiry must check out,
    /// the token must be indexed, and its subject must still own a live session
    pub fn resolve_token(&self, token: &str) -> Option<Arc<Session>> {
        let claims = self.token_service.validate_claims(token)?;
        let binding = self
            .tokens
            .get(&claims.jti)
            .map(|entry| entry.value().clone())?;
        if binding.identity != claims.sub {
            return None;
        }
        self.get(&claims.sub)
    }

    /// Invalidate the session a token resolves to
    pub fn invalidate_by_token(&self, token: &str) -> bool {
        self.resolve_token(token)
            .is_some_and(|session| self.invalidate_session(&session))
    }

    /// Remove every session past its TTL, plus expired or orphaned token
    /// bindings. Returns the number of sessions removed.
    pub fn sweep_expired(&self) -> usize {
        let mut removed: Vec<(String, u64)> = Vec::new();
        self.sessions.retain(|identity, session| {
            if session.is_expired() {
                removed.push((identity.clone(), session.id));
                false
            } else {
                true
            }
        });

        let now = Utc::now();
        self.tokens.retain(|_, binding| {
            binding.expires_at > now
                && !removed
                    .iter()
                    .any(|(identity, id)| *identity == binding.identity && binding.session_id <= *id)
        });

        if !removed.is_empty() {
            info!(count = removed.len(), "Swept expired sessions");
        }
        removed.len()
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until the
    /// store is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        let period = interval.max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("Session store dropped, stopping sweeper");
                    break;
                };
                store.sweep_expired();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Transports (candidate or committed) not yet released
    pub fn open_transports(&self) -> usize {
        self.live_transports.load(Ordering::SeqCst)
    }

    /// Number of indexed token bindings
    pub fn indexed_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Forget bindings for `identity` issued against sessions up to `session_id`.
    /// Bindings for a newer session committed concurrently survive.
    fn purge_tokens(&self, identity: &str, session_id: u64) {
        self.tokens
            .retain(|_, binding| !(binding.identity == identity && binding.session_id <= session_id));
    }
}
