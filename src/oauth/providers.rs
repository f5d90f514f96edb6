//! Provider-facing OAuth client.
//!
//! One [`ProviderClient`] per configured provider. All provider I/O (token
//! exchange, userinfo, refresh, revocation) goes through here with an
//! explicit per-call timeout. Provider-specific profile shapes are
//! normalized into [`CanonicalIdentity`] by [`map_profile`].

use serde::Deserialize;
use std::time::Duration;

use crate::auth::CanonicalIdentity;
use crate::config::OauthProviderConfig;
use crate::oauth::OauthError;

/// Token endpoint response, shared across providers
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the provider access token expires
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// HTTP client for one OAuth provider
pub struct ProviderClient {
    name: String,
    config: OauthProviderConfig,
    http: reqwest::Client,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(name: &str, config: OauthProviderConfig, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            config,
            http: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scopes(&self) -> &[String] {
        &self.config.scopes
    }

    /// Build the provider authorization URL for a login attempt
    pub fn authorization_url(&self, state: &str, code_challenge: &str, redirect_uri: &str) -> String {
        let auth_url = self.config.auth_url.as_deref().unwrap_or_default();
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
            auth_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.config.scopes.join(" ")),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
        )
    }

    /// Exchange an authorization code + PKCE verifier for provider tokens
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<ProviderTokenResponse, OauthError> {
        let token_url = self.config.token_url.as_deref().unwrap_or_default();
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ];

        let request = self
            .http
            .post(token_url)
            .timeout(self.timeout)
            // GitHub returns urlencoded unless asked for JSON
            .header("Accept", "application/json")
            .form(&params);

        let response = request.send().await.map_err(|e| {
            OauthError::CodeExchangeFailed(format!("token endpoint unreachable: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OauthError::CodeExchangeFailed(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        response
            .json::<ProviderTokenResponse>()
            .await
            .map_err(|e| OauthError::CodeExchangeFailed(format!("malformed token response: {}", e)))
    }

    /// Fetch the raw provider profile for an access token
    pub async fn fetch_profile(&self, access_token: &str) -> Result<serde_json::Value, OauthError> {
        let userinfo_url = self.config.userinfo_url.as_deref().unwrap_or_default();
        let response = self
            .http
            .get(userinfo_url)
            .timeout(self.timeout)
            .bearer_auth(access_token)
            .header("User-Agent", "torii-gateway")
            .send()
            .await
            .map_err(|e| {
                OauthError::ProfileMappingFailed(format!("userinfo endpoint unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(OauthError::ProfileMappingFailed(format!(
                "userinfo endpoint returned {}",
                response.status().as_u16()
            )));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| OauthError::ProfileMappingFailed(format!("malformed profile: {}", e)))
    }

    /// Exchange a provider refresh token for a new access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<ProviderTokenResponse, OauthError> {
        let token_url = self.config.token_url.as_deref().unwrap_or_default();
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ];

        let response = self
            .http
            .post(token_url)
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| OauthError::RefreshFailed(format!("token endpoint unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(OauthError::RefreshFailed(format!(
                "token endpoint returned {}",
                response.status().as_u16()
            )));
        }

        response
            .json::<ProviderTokenResponse>()
            .await
            .map_err(|e| OauthError::RefreshFailed(format!("malformed refresh response: {}", e)))
    }

    /// Best-effort token revocation; returns whether the provider confirmed
    pub async fn revoke(&self, token: &str) -> bool {
        let Some(revocation_url) = self.config.revocation_url.as_deref() else {
            return false;
        };

        let params = [
            ("token", token),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ];

        match self
            .http
            .post(revocation_url)
            .timeout(self.timeout)
            .form(&params)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(
                    provider = self.name.as_str(),
                    error = %e,
                    "Token revocation call failed"
                );
                false
            }
        }
    }
}

/// Normalize a provider profile into the canonical shape
///
/// Each provider returns a different JSON layout; anything that does not
/// yield a stable id and email is a `ProfileMappingFailed` for this login
/// attempt only.
pub fn map_profile(
    provider: &str,
    profile: &serde_json::Value,
) -> Result<CanonicalIdentity, OauthError> {
    let missing = |field: &str| {
        OauthError::ProfileMappingFailed(format!(
            "provider '{}' profile missing '{}'",
            provider, field
        ))
    };

    match provider {
        "github" => {
            // GitHub uses a numeric id and `login` as the fallback name
            let id = profile
                .get("id")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| missing("id"))?;
            let email = profile
                .get("email")
                .and_then(|v| v.as_str())
                .ok_or_else(|| missing("email"))?;
            let display_name = profile
                .get("name")
                .and_then(|v| v.as_str())
                .or_else(|| profile.get("login").and_then(|v| v.as_str()))
                .ok_or_else(|| missing("name"))?;

            Ok(CanonicalIdentity {
                id: format!("github:{}", id),
                email: email.to_string(),
                display_name: display_name.to_string(),
                provider: "github".to_string(),
                roles: Vec::new(),
            })
        }
        // Google, Microsoft and custom OIDC providers share the OIDC shape
        _ => {
            let sub = profile
                .get("sub")
                .and_then(|v| v.as_str())
                .ok_or_else(|| missing("sub"))?;
            let email = profile
                .get("email")
                .and_then(|v| v.as_str())
                .ok_or_else(|| missing("email"))?;
            let display_name = profile
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or(email);

            Ok(CanonicalIdentity {
                id: format!("{}:{}", provider, sub),
                email: email.to_string(),
                display_name: display_name.to_string(),
                provider: provider.to_string(),
                roles: Vec::new(),
            })
        }
    }
}
