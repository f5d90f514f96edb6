// Configuration module

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod audit;
pub mod circuit_breaker;
pub mod oauth;
pub mod rate_limit;
pub mod server;
pub mod upstream;
pub mod websocket;

pub use audit::AuditConfigYaml;
pub use circuit_breaker::{CircuitBreakerConfigYaml, CircuitBreakersConfigYaml};
pub use oauth::{OauthConfigYaml, OauthProviderConfig};
pub use rate_limit::{RateLimitConfigYaml, RateLimitPolicyYaml};
pub use server::{SecurityLimitsConfig, ServerConfig};
pub use upstream::{UpstreamConfigYaml, UpstreamsConfigYaml};
pub use websocket::WebSocketConfigYaml;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfigYaml,
    #[serde(default)]
    pub circuit_breakers: CircuitBreakersConfigYaml,
    #[serde(default)]
    pub oauth: OauthConfigYaml,
    #[serde(default)]
    pub audit: AuditConfigYaml,
    #[serde(default)]
    pub websocket: WebSocketConfigYaml,
    #[serde(default)]
    pub upstreams: UpstreamsConfigYaml,
}

impl Config {
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        // First, check that all referenced environment variables exist
        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            std::env::var(var_name).map_err(|_| {
                format!(
                    "Environment variable '{}' is referenced but not set",
                    var_name
                )
            })?;
        }

        // Now perform the substitution (we know all vars exist)
        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap() // Safe because we checked above
        });

        serde_yaml::from_str(&substituted).map_err(|e| e.to_string())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_yaml_with_env(&yaml)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.rate_limit.validate()?;
        self.circuit_breakers.validate()?;
        self.oauth.validate()?;
        self.audit.validate()?;
        self.websocket.validate()?;
        upstream::validate_upstreams(&self.upstreams)?;
        Ok(())
    }
}
