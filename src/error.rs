// Error types module

use std::fmt;
use std::time::Duration;

/// Centralized error type for the gateway
///
/// Categorizes errors into the taxonomy surfaced to clients. Raw upstream
/// error bodies are never carried here; they are sanitized at the point of
/// conversion and the original detail is preserved only in the audit log.
#[derive(Debug, Clone)]
pub enum GatewayError {
    /// Admission control rejected the request (429, always carries retry-after)
    RateLimitExceeded {
        route_class: String,
        limit: u32,
        retry_after: Duration,
    },

    /// Circuit breaker is open for the target service (503, no upstream I/O)
    CircuitOpen {
        service: String,
        retry_after: Duration,
    },

    /// Authentication/authorization failure (401/403)
    Auth(String),

    /// Malformed request (400)
    Validation(String),

    /// Upstream call exceeded its timeout (504, counted as breaker failure)
    UpstreamTimeout { service: String },

    /// Upstream returned an error (502, sanitized)
    Upstream { service: String },

    /// Internal gateway error (500)
    Internal(String),
}

impl GatewayError {
    /// HTTP status code for this error kind
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::RateLimitExceeded { .. } => 429,
            GatewayError::CircuitOpen { .. } => 503,
            GatewayError::Auth(_) => 401,
            GatewayError::Validation(_) => 400,
            GatewayError::UpstreamTimeout { .. } => 504,
            GatewayError::Upstream { .. } => 502,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Stable taxonomy name recorded in audit events and error responses
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::Auth(_) => "auth_error",
            GatewayError::Validation(_) => "validation_error",
            GatewayError::UpstreamTimeout { .. } => "upstream_timeout",
            GatewayError::Upstream { .. } => "upstream_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// Retry-After value for errors that carry one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimitExceeded { retry_after, .. }
            | GatewayError::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::RateLimitExceeded { route_class, .. } => {
                write!(f, "Rate limit exceeded for route class '{}'", route_class)
            }
            GatewayError::CircuitOpen { service, .. } => {
                write!(f, "Service '{}' temporarily unavailable", service)
            }
            GatewayError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            GatewayError::Validation(msg) => write!(f, "Validation error: {}", msg),
            GatewayError::UpstreamTimeout { service } => {
                write!(f, "Upstream '{}' timed out", service)
            }
            GatewayError::Upstream { service } => {
                write!(f, "Upstream '{}' request failed", service)
            }
            GatewayError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}
