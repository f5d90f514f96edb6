//! Security Validation Module
//!
//! Protects against malicious or malformed requests that could:
//! - Exhaust server resources (oversized requests)
//! - Probe the gateway with known attack tooling
//! - Crash the gateway (malformed input)
//!
//! Returns appropriate HTTP status codes:
//! - 413 Payload Too Large - Request body exceeds limit
//! - 431 Request Header Fields Too Large - Headers exceed limit
//! - 414 URI Too Long - Request URI exceeds limit
//! - 403 Forbidden - Known attack tooling user agent

use crate::config::SecurityLimitsConfig;

/// Security validation error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// Request body too large (413)
    PayloadTooLarge { size: usize, limit: usize },
    /// Request headers too large (431)
    HeadersTooLarge { total_size: usize, limit: usize },
    /// URI too long (414)
    UriTooLong { length: usize, limit: usize },
    /// User agent matches known attack tooling (403)
    BlockedUserAgent { agent: String },
}

impl SecurityError {
    pub fn status_code(&self) -> u16 {
        match self {
            SecurityError::PayloadTooLarge { .. } => 413,
            SecurityError::HeadersTooLarge { .. } => 431,
            SecurityError::UriTooLong { .. } => 414,
            SecurityError::BlockedUserAgent { .. } => 403,
        }
    }
}

impl std::fmt::Display for SecurityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityError::PayloadTooLarge { size, limit } => {
                write!(f, "Request payload size {} exceeds limit {}", size, limit)
            }
            SecurityError::HeadersTooLarge { total_size, limit } => {
                write!(
                    f,
                    "Total header size {} exceeds limit {}",
                    total_size, limit
                )
            }
            SecurityError::UriTooLong { length, limit } => {
                write!(f, "URI length {} exceeds limit {}", length, limit)
            }
            SecurityError::BlockedUserAgent { agent } => {
                write!(f, "Blocked user agent: {}", agent)
            }
        }
    }
}

impl std::error::Error for SecurityError {}

/// Limits for security validation, sourced from configuration
#[derive(Debug, Clone)]
pub struct SecurityLimits {
    pub max_body_size: usize,
    pub max_header_size: usize,
    pub max_uri_length: usize,
}

impl From<&SecurityLimitsConfig> for SecurityLimits {
    fn from(config: &SecurityLimitsConfig) -> Self {
        Self {
            max_body_size: config.max_body_size,
            max_header_size: config.max_header_size,
            max_uri_length: config.max_uri_length,
        }
    }
}

impl Default for SecurityLimits {
    fn default() -> Self {
        (&SecurityLimitsConfig::default()).into()
    }
}

/// User agent substrings for known scanning/injection tooling
const BLOCKED_AGENT_MARKERS: &[&str] = &["sqlmap", "nikto", "masscan", "nessus", "dirbuster"];

/// Response headers attached to every gateway response
pub const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains",
    ),
    ("referrer-policy", "strict-origin-when-cross-origin"),
];

/// Validate request body size
pub fn validate_body_size(
    content_length: Option<usize>,
    limit: usize,
) -> Result<(), SecurityError> {
    if let Some(size) = content_length {
        if size > limit {
            return Err(SecurityError::PayloadTooLarge { size, limit });
        }
    }
    Ok(())
}

/// Validate total header size
pub fn validate_header_size(total_size: usize, limit: usize) -> Result<(), SecurityError> {
    if total_size > limit {
        return Err(SecurityError::HeadersTooLarge { total_size, limit });
    }
    Ok(())
}

/// Validate URI length
pub fn validate_uri_length(uri: &str, limit: usize) -> Result<(), SecurityError> {
    let length = uri.len();
    if length > limit {
        return Err(SecurityError::UriTooLong { length, limit });
    }
    Ok(())
}

/// Screen the user agent against known attack tooling
pub fn check_user_agent(user_agent: Option<&str>) -> Result<(), SecurityError> {
    let Some(agent) = user_agent else {
        return Ok(());
    };
    let agent_lower = agent.to_lowercase();
    if BLOCKED_AGENT_MARKERS
        .iter()
        .any(|marker| agent_lower.contains(marker))
    {
        return Err(SecurityError::BlockedUserAgent {
            agent: agent.to_string(),
        });
    }
    Ok(())
}
