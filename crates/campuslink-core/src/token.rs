//! Signed bearer tokens bound to a session identity.
//!
//! Tokens are HS256 JWTs. A token on its own authorizes nothing: the session
//! store additionally requires the token to be indexed and its subject to
//! still own a live session.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TokenConfig;
use crate::error::AuthError;

/// Length of the random token id in bytes (before hex encoding)
const TOKEN_ID_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialClaims {
    pub iss: String,
    pub aud: String,
    /// Identity the token is bound to
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique id of this issuance
    pub jti: String,
    /// Same value as `sub`
    pub username: String,
}

/// A freshly minted token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and validates credential tokens. Read-only after construction.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
}

impl TokenService {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        }
    }

    /// Sign a token for `identity` expiring `ttl` from now
    pub fn issue(&self, identity: &str, ttl: Duration) -> Result<IssuedToken, AuthError> {
        self.issue_at(identity, ttl, Utc::now().timestamp())
    }

    fn issue_at(&self, identity: &str, ttl: Duration, issued_at: i64) -> Result<IssuedToken, AuthError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).map_err(|e| AuthError::Token(e.to_string()))?;
        let token_id = hex::encode(rand::random::<[u8; TOKEN_ID_LEN]>());

        let claims = CredentialClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: identity.to_string(),
            iat: issued_at,
            exp: issued_at + ttl_secs,
            jti: token_id.clone(),
            username: identity.to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Token(e.to_string()))?;

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| AuthError::Token("expiry out of range".to_string()))?;

        Ok(IssuedToken {
            token,
            token_id,
            expires_at,
        })
    }

    /// Verify signature, issuer, audience and expiry and return the claims
    pub fn validate_claims(&self, token: &str) -> Option<CredentialClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = 0;

        match decode::<CredentialClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!(error = %e, "Token validation failed");
                None
            }
        }
    }

    /// Subject of a valid token, or `None` on any verification failure
    pub fn validate(&self, token: &str) -> Option<String> {
        self.validate_claims(token).map(|claims| claims.sub)
    }

    /// Decode the subject WITHOUT checking the signature.
    /// Diagnostics only; never use the result for an authorization decision.
    pub fn peek_subject_unsafe(token: &str) -> Option<String> {
        decode_unverified(token).map(|claims| claims.sub)
    }

    /// Whether the token's expiry has passed. Undecodable tokens count as expired.
    pub fn is_expired(token: &str) -> bool {
        match decode_unverified(token) {
            Some(claims) => Utc::now().timestamp() > claims.exp,
            None => true,
        }
    }
}

fn decode_unverified(token: &str) -> Option<CredentialClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<CredentialClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims)
}
