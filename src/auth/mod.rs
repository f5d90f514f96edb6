//! Authentication module
//!
//! Gateway-issued sessions and access tokens. A successful OAuth login
//! produces a [`CanonicalIdentity`] and an [`AuthSession`] holding the
//! provider's tokens; the client receives a [`TokenPair`] whose access
//! token is a gateway-signed JWT (HS256) carrying the session id.
//!
//! Session lifecycle is an explicit state machine ([`LoginState`]);
//! every transition is validated so replayed callbacks or operations on
//! revoked sessions are structurally impossible rather than merely
//! unlikely.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Normalized user record produced from provider-specific profile shapes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalIdentity {
    /// Stable user id, namespaced by provider (e.g. "google:1234")
    pub id: String,
    pub email: String,
    pub display_name: String,
    /// Provider that authenticated this user
    pub provider: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Tokens issued to the client on login or refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Gateway-signed JWT presented as a bearer token
    pub access_token: String,
    /// Opaque refresh token, usable exactly as long as the session lives
    pub refresh_token: String,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub provider: String,
    pub user_id: String,
}

/// Provider-side tokens retained server-side for refresh and revocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Login lifecycle states
///
/// `HandshakeCreated` and `CallbackReceived` belong to the pending login;
/// the remaining states describe an issued session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    HandshakeCreated,
    CallbackReceived,
    TokensIssued,
    Refreshed,
    Revoked,
}

impl LoginState {
    /// Validate a transition, returning the new state or an error naming
    /// the rejected edge
    pub fn transition(self, to: LoginState) -> Result<LoginState, String> {
        use LoginState::*;
        let allowed = matches!(
            (self, to),
            (HandshakeCreated, CallbackReceived)
                | (CallbackReceived, TokensIssued)
                | (TokensIssued, Refreshed)
                | (TokensIssued, Revoked)
                | (Refreshed, Refreshed)
                | (Refreshed, Revoked)
        );
        if allowed {
            Ok(to)
        } else {
            Err(format!("invalid login state transition {:?} -> {:?}", self, to))
        }
    }
}

/// Server-side session record
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub session_id: String,
    pub identity: CanonicalIdentity,
    pub token_pair: TokenPair,
    pub provider_tokens: ProviderTokens,
    pub state: LoginState,
    pub created_at: DateTime<Utc>,
}

/// JWT claims carried by gateway access tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Canonical user id
    pub sub: String,
    /// Session id, resolved against the session store on every request
    pub sid: String,
    pub provider: String,
    pub email: String,
    pub exp: u64,
    pub iat: u64,
}

/// Mint a gateway access token for an identity/session
pub fn mint_access_token(
    identity: &CanonicalIdentity,
    session_id: &str,
    secret: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: identity.id.clone(),
        sid: session_id.to_string(),
        provider: identity.provider.clone(),
        email: identity.email.clone(),
        exp: now + ttl.as_secs(),
        iat: now,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

/// Validate a gateway access token, enforcing expiry
pub fn verify_access_token(
    token: &str,
    secret: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;
    Ok(token_data.claims)
}

/// Decode a gateway access token without enforcing expiry
///
/// Signature and shape are still verified. Used for the transparent-refresh
/// path, where an expired-but-authentic token may ride a live session.
pub fn decode_access_token_unchecked_expiry(
    token: &str,
    secret: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;
    Ok(token_data.claims)
}

/// TTL-bounded store of live sessions
///
/// Sessions are looked up by session id on every authenticated request and
/// by refresh token on explicit refresh. Removal from the primary cache is
/// what makes logout effective; the gateway never trusts a JWT whose
/// session is gone.
pub struct SessionStore {
    sessions: Cache<String, AuthSession>,
    refresh_index: Cache<String, String>,
}

impl SessionStore {
    pub fn new(session_ttl: Duration) -> Self {
        Self {
            sessions: Cache::builder()
                .time_to_live(session_ttl)
                .max_capacity(100_000)
                .build(),
            refresh_index: Cache::builder()
                .time_to_live(session_ttl)
                .max_capacity(100_000)
                .build(),
        }
    }

    pub async fn insert(&self, session: AuthSession) {
        self.refresh_index
            .insert(
                session.token_pair.refresh_token.clone(),
                session.session_id.clone(),
            )
            .await;
        self.sessions
            .insert(session.session_id.clone(), session)
            .await;
    }

    pub async fn get(&self, session_id: &str) -> Option<AuthSession> {
        self.sessions.get(session_id).await
    }

    pub async fn get_by_refresh_token(&self, refresh_token: &str) -> Option<AuthSession> {
        let session_id = self.refresh_index.get(refresh_token).await?;
        self.sessions.get(&session_id).await
    }

    /// Remove a session; subsequent lookups fail regardless of JWT validity
    pub async fn revoke(&self, session_id: &str) {
        if let Some(session) = self.sessions.get(session_id).await {
            self.refresh_index
                .remove(&session.token_pair.refresh_token)
                .await;
        }
        self.sessions.remove(session_id).await;
    }

    pub async fn session_count(&self) -> u64 {
        self.sessions.run_pending_tasks().await;
        self.sessions.entry_count()
    }
}
