//! Upstream service configuration types.
//!
//! Each upstream entry names a backend the gateway proxies to (trading,
//! risk, compliance, iot) with its base URL and per-call timeout. The
//! orchestrator refuses requests for services with no entry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::DEFAULT_UPSTREAM_TIMEOUT_MS;

fn default_timeout_ms() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT_MS
}

/// One upstream service entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfigYaml {
    /// Base URL of the upstream service
    pub base_url: String,
    /// Per-call timeout in milliseconds (default: 5000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Upstreams section of the gateway configuration, keyed by service name
pub type UpstreamsConfigYaml = HashMap<String, UpstreamConfigYaml>;

pub fn validate_upstreams(upstreams: &UpstreamsConfigYaml) -> Result<(), String> {
    for (name, upstream) in upstreams {
        if name.is_empty() {
            return Err("Upstream service name cannot be empty".to_string());
        }
        if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://")
        {
            return Err(format!(
                "Upstream '{}' base_url '{}' must start with http:// or https://",
                name, upstream.base_url
            ));
        }
        if upstream.timeout_ms == 0 {
            return Err(format!("Upstream '{}' has timeout_ms 0", name));
        }
    }
    Ok(())
}
