//! OAuth/SSO Subsystem
//!
//! Multi-provider Authorization Code + PKCE flow producing a canonical
//! identity and a gateway-issued token pair. The pieces:
//! - [`pkce`]: verifier/challenge/state generation (RFC 7636 S256)
//! - [`handshake`]: pending-login store; a `state` is consumed exactly once
//! - [`providers`]: per-provider HTTP client and profile normalization
//! - [`OauthService`]: the flow itself (initiate, callback, transparent
//!   refresh, logout)
//!
//! CSRF posture: a callback whose `state` does not match a live handshake
//! is rejected outright regardless of whether the code would have been
//! valid, and the rejection is flagged so the audit layer records it at
//! elevated severity.

pub mod handshake;
pub mod pkce;
pub mod providers;

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::{
    decode_access_token_unchecked_expiry, mint_access_token, verify_access_token, AuthSession,
    CanonicalIdentity, LoginState, ProviderTokens, SessionStore, TokenPair,
};
use crate::config::OauthConfigYaml;
use handshake::{ConsumeError, HandshakeStore};
use providers::{map_profile, ProviderClient, ProviderTokenResponse};

/// OAuth failure conditions
///
/// The string payloads are provider-side detail for the audit log; they are
/// never forwarded verbatim to clients.
#[derive(Debug, Clone)]
pub enum OauthError {
    /// No provider configured under this name
    UnknownProvider(String),
    /// Callback state matched no live handshake (CSRF signal)
    StateMismatch,
    /// Callback state matched a handshake past its TTL (CSRF signal)
    StateExpired,
    /// Provider token endpoint rejected the exchange
    CodeExchangeFailed(String),
    /// Provider returned a profile shape we could not normalize
    ProfileMappingFailed(String),
    /// Provider refresh failed; the session has been invalidated
    RefreshFailed(String),
    /// Bearer token failed signature/shape validation
    InvalidToken(String),
    /// Token was authentic but its session is gone (revoked or expired)
    SessionNotFound,
}

impl OauthError {
    /// Stable name recorded in audit events
    pub fn kind(&self) -> &'static str {
        match self {
            OauthError::UnknownProvider(_) => "unknown_provider",
            OauthError::StateMismatch => "state_mismatch",
            OauthError::StateExpired => "state_expired",
            OauthError::CodeExchangeFailed(_) => "code_exchange_failed",
            OauthError::ProfileMappingFailed(_) => "profile_mapping_failed",
            OauthError::RefreshFailed(_) => "refresh_failed",
            OauthError::InvalidToken(_) => "invalid_token",
            OauthError::SessionNotFound => "session_not_found",
        }
    }

    /// Whether this failure should be audited as a CSRF attempt
    pub fn is_csrf_signal(&self) -> bool {
        matches!(self, OauthError::StateMismatch | OauthError::StateExpired)
    }

    /// Detail preserved for the audit log only
    pub fn detail(&self) -> String {
        match self {
            OauthError::UnknownProvider(name) => format!("unknown provider '{}'", name),
            OauthError::StateMismatch => "state matched no live handshake".to_string(),
            OauthError::StateExpired => "state matched an expired handshake".to_string(),
            OauthError::CodeExchangeFailed(detail)
            | OauthError::ProfileMappingFailed(detail)
            | OauthError::RefreshFailed(detail)
            | OauthError::InvalidToken(detail) => detail.clone(),
            OauthError::SessionNotFound => "session revoked or expired".to_string(),
        }
    }
}

impl fmt::Display for OauthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Client-safe rendering; provider detail stays in `detail()`
        match self {
            OauthError::UnknownProvider(name) => write!(f, "Unknown OAuth provider '{}'", name),
            OauthError::StateMismatch | OauthError::StateExpired => {
                write!(f, "Invalid or expired login state")
            }
            OauthError::CodeExchangeFailed(_) => write!(f, "Authorization code exchange failed"),
            OauthError::ProfileMappingFailed(_) => write!(f, "Provider profile was not usable"),
            OauthError::RefreshFailed(_) => write!(f, "Session refresh failed, login required"),
            OauthError::InvalidToken(_) => write!(f, "Invalid access token"),
            OauthError::SessionNotFound => write!(f, "Session is no longer valid"),
        }
    }
}

impl std::error::Error for OauthError {}

/// Result of initiating a login
#[derive(Debug, Clone)]
pub struct LoginInitiation {
    pub authorization_url: String,
    pub state: String,
}

/// Result of a successful callback
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub identity: CanonicalIdentity,
    pub token_pair: TokenPair,
}

/// Resolved identity for an authenticated request
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub identity: CanonicalIdentity,
    pub session_id: String,
    /// New token pair when the access token was transparently refreshed
    pub refreshed: Option<TokenPair>,
}

/// The OAuth/SSO subsystem
///
/// Owns the provider clients, the pending-handshake store and the session
/// store. Constructed once at startup and shared via `Arc`.
pub struct OauthService {
    providers: HashMap<String, ProviderClient>,
    handshakes: Arc<HandshakeStore>,
    sessions: Arc<SessionStore>,
    jwt_secret: String,
    access_token_ttl: Duration,
}

impl OauthService {
    pub fn new(config: &OauthConfigYaml) -> Self {
        let timeout = Duration::from_secs(config.provider_timeout_secs);
        let providers = config
            .resolved_providers()
            .into_iter()
            .map(|(name, provider)| {
                let client = ProviderClient::new(&name, provider, timeout);
                (name, client)
            })
            .collect();

        Self {
            providers,
            handshakes: Arc::new(HandshakeStore::new(Duration::from_secs(
                config.handshake_ttl_secs,
            ))),
            sessions: Arc::new(SessionStore::new(Duration::from_secs(
                config.session_ttl_secs,
            ))),
            jwt_secret: config.jwt_secret.clone(),
            access_token_ttl: Duration::from_secs(config.access_token_ttl_secs),
        }
    }

    /// Configured provider names, surfaced on the health endpoint
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn handshake_store(&self) -> &Arc<HandshakeStore> {
        &self.handshakes
    }

    pub fn session_store(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Start background maintenance (handshake TTL sweep)
    pub fn start_background_tasks(&self) {
        self.handshakes.start_sweep_task(None);
    }

    pub fn stop_background_tasks(&self) {
        self.handshakes.stop_sweep_task();
    }

    /// Begin a login: create the PKCE handshake and build the provider URL
    pub fn initiate_login(
        &self,
        provider: &str,
        redirect_uri: &str,
    ) -> Result<LoginInitiation, OauthError> {
        let client = self
            .providers
            .get(provider)
            .ok_or_else(|| OauthError::UnknownProvider(provider.to_string()))?;

        let verifier = pkce::generate_verifier();
        let challenge = pkce::derive_challenge(&verifier);
        let handshake = self.handshakes.create(provider, redirect_uri, &verifier);

        tracing::info!(
            provider = provider,
            state = handshake.state.as_str(),
            "Login initiated"
        );

        Ok(LoginInitiation {
            authorization_url: client.authorization_url(
                &handshake.state,
                &challenge,
                redirect_uri,
            ),
            state: handshake.state,
        })
    }

    /// Complete a login from the provider callback
    ///
    /// The handshake is consumed before anything else; a replayed or unknown
    /// `state` never reaches the token exchange, no matter how valid the
    /// code looks.
    pub async fn complete_login(
        &self,
        provider: &str,
        code: &str,
        state: &str,
        now_ms: u64,
    ) -> Result<LoginSuccess, OauthError> {
        let client = self
            .providers
            .get(provider)
            .ok_or_else(|| OauthError::UnknownProvider(provider.to_string()))?;

        let handshake = match self.handshakes.consume(state, now_ms) {
            Ok(handshake) => handshake,
            Err(ConsumeError::NotFound) => return Err(OauthError::StateMismatch),
            Err(ConsumeError::Expired) => return Err(OauthError::StateExpired),
        };

        // A state issued for one provider is not valid for another
        if handshake.provider != provider {
            return Err(OauthError::StateMismatch);
        }

        let mut login_state = LoginState::HandshakeCreated;
        login_state = login_state
            .transition(LoginState::CallbackReceived)
            .map_err(OauthError::InvalidToken)?;

        let tokens = client
            .exchange_code(code, &handshake.code_verifier, &handshake.redirect_uri)
            .await?;

        let profile = client.fetch_profile(&tokens.access_token).await?;
        let identity = map_profile(provider, &profile)?;

        login_state = login_state
            .transition(LoginState::TokensIssued)
            .map_err(OauthError::InvalidToken)?;

        let session = self
            .issue_session(identity.clone(), &tokens, login_state)
            .await?;

        tracing::info!(
            provider = provider,
            user_id = identity.id.as_str(),
            "Login completed"
        );

        Ok(LoginSuccess {
            identity,
            token_pair: session.token_pair,
        })
    }

    /// Resolve the identity behind a bearer token
    ///
    /// An expired-but-authentic token riding a live session triggers one
    /// transparent refresh; a refresh failure invalidates the session so the
    /// caller must log in again.
    pub async fn authenticate(&self, bearer: &str) -> Result<Authenticated, OauthError> {
        match verify_access_token(bearer, &self.jwt_secret) {
            Ok(claims) => {
                let session = self
                    .sessions
                    .get(&claims.sid)
                    .await
                    .ok_or(OauthError::SessionNotFound)?;
                Ok(Authenticated {
                    identity: session.identity,
                    session_id: session.session_id,
                    refreshed: None,
                })
            }
            Err(e) if matches!(e.kind(), jsonwebtoken::errors::ErrorKind::ExpiredSignature) => {
                let claims = decode_access_token_unchecked_expiry(bearer, &self.jwt_secret)
                    .map_err(|e| OauthError::InvalidToken(e.to_string()))?;
                self.refresh_session(&claims.sid).await
            }
            Err(e) => Err(OauthError::InvalidToken(e.to_string())),
        }
    }

    /// Refresh a session's tokens against its provider
    async fn refresh_session(&self, session_id: &str) -> Result<Authenticated, OauthError> {
        let mut session = self
            .sessions
            .get(session_id)
            .await
            .ok_or(OauthError::SessionNotFound)?;

        let client = self
            .providers
            .get(&session.identity.provider)
            .ok_or_else(|| OauthError::UnknownProvider(session.identity.provider.clone()))?;

        let Some(provider_refresh) = session.provider_tokens.refresh_token.clone() else {
            // Nothing to refresh with; the session is no longer serviceable
            self.sessions.revoke(session_id).await;
            return Err(OauthError::RefreshFailed(
                "no provider refresh token on session".to_string(),
            ));
        };

        let tokens = match client.refresh(&provider_refresh).await {
            Ok(tokens) => tokens,
            Err(e) => {
                // Refresh failures invalidate the session; re-login required
                self.sessions.revoke(session_id).await;
                return Err(e);
            }
        };

        session.state = session
            .state
            .transition(LoginState::Refreshed)
            .map_err(OauthError::RefreshFailed)?;

        session.provider_tokens = provider_tokens_from(&tokens, Some(provider_refresh));
        session.token_pair = self.mint_token_pair(&session.identity, session_id, &session.token_pair.refresh_token)?;

        let refreshed = session.token_pair.clone();
        let identity = session.identity.clone();
        self.sessions.insert(session).await;

        tracing::info!(
            session_id = session_id,
            user_id = identity.id.as_str(),
            "Session transparently refreshed"
        );

        Ok(Authenticated {
            identity,
            session_id: session_id.to_string(),
            refreshed: Some(refreshed),
        })
    }

    /// Log out: best-effort provider revocation, unconditional local delete
    ///
    /// Returns whether the provider confirmed the revocation.
    pub async fn logout(&self, access_token: &str) -> Result<bool, OauthError> {
        let claims = decode_access_token_unchecked_expiry(access_token, &self.jwt_secret)
            .map_err(|e| OauthError::InvalidToken(e.to_string()))?;

        let Some(session) = self.sessions.get(&claims.sid).await else {
            // Logout is idempotent; an already-gone session is fine
            return Ok(false);
        };

        let revoked = match self.providers.get(&session.identity.provider) {
            Some(client) => client.revoke(&session.provider_tokens.access_token).await,
            None => false,
        };

        // The local session dies regardless of what the provider said
        self.sessions.revoke(&claims.sid).await;

        tracing::info!(
            session_id = claims.sid.as_str(),
            provider_confirmed = revoked,
            "Logged out"
        );

        Ok(revoked)
    }

    async fn issue_session(
        &self,
        identity: CanonicalIdentity,
        tokens: &ProviderTokenResponse,
        state: LoginState,
    ) -> Result<AuthSession, OauthError> {
        let session_id = Uuid::new_v4().to_string();
        let refresh_token = Uuid::new_v4().to_string();
        let token_pair = self.mint_token_pair(&identity, &session_id, &refresh_token)?;

        let session = AuthSession {
            session_id,
            identity,
            token_pair,
            provider_tokens: provider_tokens_from(tokens, tokens.refresh_token.clone()),
            state,
            created_at: Utc::now(),
        };

        self.sessions.insert(session.clone()).await;
        Ok(session)
    }

    fn mint_token_pair(
        &self,
        identity: &CanonicalIdentity,
        session_id: &str,
        refresh_token: &str,
    ) -> Result<TokenPair, OauthError> {
        let access_token =
            mint_access_token(identity, session_id, &self.jwt_secret, self.access_token_ttl)
                .map_err(|e| OauthError::InvalidToken(e.to_string()))?;

        Ok(TokenPair {
            access_token,
            refresh_token: refresh_token.to_string(),
            scopes: self
                .providers
                .get(&identity.provider)
                .map(|c| c.scopes().to_vec())
                .unwrap_or_default(),
            expires_at: Utc::now()
                + ChronoDuration::seconds(self.access_token_ttl.as_secs() as i64),
            provider: identity.provider.clone(),
            user_id: identity.id.clone(),
        })
    }
}

fn provider_tokens_from(
    tokens: &ProviderTokenResponse,
    refresh_token: Option<String>,
) -> ProviderTokens {
    ProviderTokens {
        access_token: tokens.access_token.clone(),
        refresh_token,
        expires_at: tokens
            .expires_in
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs as i64)),
    }
}
