// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Using constants instead of magic numbers improves maintainability
// and makes it easier to understand and modify defaults.

// =============================================================================
// Server defaults
// =============================================================================

/// Default request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default listen address
pub const DEFAULT_SERVER_ADDRESS: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_SERVER_PORT: u16 = 8080;

// =============================================================================
// Security limit defaults
// =============================================================================

/// Maximum request body size in bytes (10 MB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Maximum total header size in bytes (64 KB)
pub const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;

/// Maximum URI length in bytes (8 KB)
pub const DEFAULT_MAX_URI_LENGTH: usize = 8192;

// =============================================================================
// Rate limiter defaults
// =============================================================================

/// Default requests per window for a route class
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// Default rate limit window in seconds (1 minute)
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

/// Default token/leaky bucket capacity
pub const DEFAULT_BUCKET_CAPACITY: u32 = 100;

/// Default token bucket refill rate (tokens per second)
pub const DEFAULT_REFILL_RATE: f64 = 1.0;

/// Default leaky bucket drain rate (requests per second)
pub const DEFAULT_LEAK_RATE: f64 = 0.5;

/// Maximum number of rate limit buckets to track before emergency cleanup
pub const DEFAULT_MAX_TRACKED_BUCKETS: usize = 100_000;

/// Default TTL for idle rate limit buckets (5 minutes)
pub const DEFAULT_BUCKET_IDLE_TTL_SECS: u64 = 5 * 60;

/// Default cleanup interval for idle bucket eviction (1 minute)
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

// =============================================================================
// Circuit breaker defaults
// =============================================================================

/// Default number of consecutive failures before circuit opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default circuit breaker cooldown in seconds (open -> half-open)
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// Default multiplier applied to the cooldown when a half-open trial fails
pub const DEFAULT_COOLDOWN_MULTIPLIER: f64 = 2.0;

/// Default upper bound for the extended cooldown in seconds
pub const DEFAULT_MAX_COOLDOWN_SECS: u64 = 600;

// =============================================================================
// OAuth defaults
// =============================================================================

/// Default TTL for a pending login handshake in seconds (10 minutes)
pub const DEFAULT_HANDSHAKE_TTL_SECS: u64 = 10 * 60;

/// Default lifetime of a gateway-issued access token in seconds (1 hour)
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 3600;

/// Default lifetime of a session (refresh token) in seconds (30 days)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 24 * 3600;

/// Default timeout for provider token/userinfo calls in seconds
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Audit defaults
// =============================================================================

/// Default capacity of the in-memory recent-events store
pub const DEFAULT_AUDIT_RECENT_CAPACITY: usize = 10_000;

/// Default interval between durable-sink retry flushes in seconds
pub const DEFAULT_AUDIT_RETRY_INTERVAL_SECS: u64 = 5;

// =============================================================================
// WebSocket defaults
// =============================================================================

/// Default server ping interval in seconds
pub const DEFAULT_WS_PING_INTERVAL_SECS: u64 = 30;

/// Default number of missed heartbeats before a connection is evicted
pub const DEFAULT_WS_MISS_THRESHOLD: u32 = 3;

/// Default capacity of the per-connection outbound queue
pub const DEFAULT_WS_OUTBOUND_CAPACITY: usize = 64;

/// Default base delay for client reconnection in milliseconds
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1000;

/// Default maximum number of client reconnection attempts
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

// =============================================================================
// Upstream defaults
// =============================================================================

/// Default timeout for upstream service calls in milliseconds
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 5000;
