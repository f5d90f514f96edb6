//! OAuth/SSO configuration types.
//!
//! Each provider entry carries its OAuth 2.0 client credentials plus the
//! endpoint URLs for the authorization-code flow. Well-known providers
//! (google, microsoft, github) get their endpoints filled in automatically;
//! custom OIDC providers must spell out all three URLs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_HANDSHAKE_TTL_SECS, DEFAULT_PROVIDER_TIMEOUT_SECS,
    DEFAULT_SESSION_TTL_SECS,
};

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "email".to_string(), "profile".to_string()]
}

fn default_handshake_ttl_secs() -> u64 {
    DEFAULT_HANDSHAKE_TTL_SECS
}

fn default_access_token_ttl_secs() -> u64 {
    DEFAULT_ACCESS_TOKEN_TTL_SECS
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_provider_timeout_secs() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

/// One OAuth provider entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Authorization endpoint; defaulted for well-known providers
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Token endpoint; defaulted for well-known providers
    #[serde(default)]
    pub token_url: Option<String>,
    /// Userinfo/profile endpoint; defaulted for well-known providers
    #[serde(default)]
    pub userinfo_url: Option<String>,
    /// Token revocation endpoint, if the provider has one
    #[serde(default)]
    pub revocation_url: Option<String>,
    /// Scopes requested at login (default: openid email profile)
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

/// Built-in endpoints for well-known providers
fn well_known_endpoints(provider: &str) -> Option<(&'static str, &'static str, &'static str)> {
    match provider {
        "google" => Some((
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
            "https://openidconnect.googleapis.com/v1/userinfo",
        )),
        "microsoft" => Some((
            "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
            "https://login.microsoftonline.com/common/oauth2/v2.0/token",
            "https://graph.microsoft.com/oidc/userinfo",
        )),
        "github" => Some((
            "https://github.com/login/oauth/authorize",
            "https://github.com/login/oauth/access_token",
            "https://api.github.com/user",
        )),
        _ => None,
    }
}

impl OauthProviderConfig {
    /// Fill in endpoint defaults for a well-known provider name
    pub fn with_defaults(mut self, provider: &str) -> Self {
        if let Some((auth, token, userinfo)) = well_known_endpoints(provider) {
            self.auth_url.get_or_insert_with(|| auth.to_string());
            self.token_url.get_or_insert_with(|| token.to_string());
            self.userinfo_url.get_or_insert_with(|| userinfo.to_string());
        }
        self
    }
}

/// OAuth section of the gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthConfigYaml {
    /// Providers keyed by name (google, microsoft, github, or custom)
    #[serde(default)]
    pub providers: HashMap<String, OauthProviderConfig>,
    /// Secret used to sign gateway-issued access tokens (HS256)
    #[serde(default)]
    pub jwt_secret: String,
    /// TTL for a pending login handshake, in seconds (default: 600)
    #[serde(default = "default_handshake_ttl_secs")]
    pub handshake_ttl_secs: u64,
    /// Lifetime of a gateway access token, in seconds (default: 3600)
    #[serde(default = "default_access_token_ttl_secs")]
    pub access_token_ttl_secs: u64,
    /// Lifetime of a session and its refresh token, in seconds (default: 30 days)
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Timeout for provider token/userinfo calls, in seconds (default: 10)
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
}

impl Default for OauthConfigYaml {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            jwt_secret: String::new(),
            handshake_ttl_secs: default_handshake_ttl_secs(),
            access_token_ttl_secs: default_access_token_ttl_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
        }
    }
}

impl OauthConfigYaml {
    pub fn validate(&self) -> Result<(), String> {
        if !self.providers.is_empty() && self.jwt_secret.is_empty() {
            return Err(
                "OAuth jwt_secret cannot be empty when providers are configured".to_string(),
            );
        }

        for (name, provider) in &self.providers {
            if provider.client_id.is_empty() {
                return Err(format!("OAuth provider '{}' has empty client_id", name));
            }
            if provider.client_secret.is_empty() {
                return Err(format!("OAuth provider '{}' has empty client_secret", name));
            }

            // Custom providers must spell out all endpoints themselves
            if well_known_endpoints(name).is_none() {
                for (field, value) in [
                    ("auth_url", &provider.auth_url),
                    ("token_url", &provider.token_url),
                    ("userinfo_url", &provider.userinfo_url),
                ] {
                    match value {
                        None => {
                            return Err(format!(
                                "OAuth provider '{}' is not well-known and must set {}",
                                name, field
                            ))
                        }
                        Some(url) if !url.starts_with("https://") && !url.starts_with("http://") => {
                            return Err(format!(
                                "OAuth provider '{}' has invalid {}: '{}'",
                                name, field, url
                            ))
                        }
                        _ => {}
                    }
                }
            }
        }

        if self.handshake_ttl_secs == 0 {
            return Err("OAuth handshake_ttl_secs must be > 0".to_string());
        }
        if self.access_token_ttl_secs == 0 {
            return Err("OAuth access_token_ttl_secs must be > 0".to_string());
        }

        Ok(())
    }

    /// Provider entries with well-known endpoint defaults applied
    pub fn resolved_providers(&self) -> HashMap<String, OauthProviderConfig> {
        self.providers
            .iter()
            .map(|(name, provider)| (name.clone(), provider.clone().with_defaults(name)))
            .collect()
    }
}
