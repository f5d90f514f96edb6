//! WebSocket session manager configuration types.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_RECONNECT_BASE_MS, DEFAULT_RECONNECT_MAX_ATTEMPTS, DEFAULT_WS_MISS_THRESHOLD,
    DEFAULT_WS_OUTBOUND_CAPACITY, DEFAULT_WS_PING_INTERVAL_SECS,
};

fn default_ping_interval_secs() -> u64 {
    DEFAULT_WS_PING_INTERVAL_SECS
}

fn default_miss_threshold() -> u32 {
    DEFAULT_WS_MISS_THRESHOLD
}

fn default_outbound_capacity() -> usize {
    DEFAULT_WS_OUTBOUND_CAPACITY
}

fn default_reconnect_base_ms() -> u64 {
    DEFAULT_RECONNECT_BASE_MS
}

fn default_reconnect_max_attempts() -> u32 {
    DEFAULT_RECONNECT_MAX_ATTEMPTS
}

/// WebSocket section of the gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfigYaml {
    /// Server ping interval, in seconds
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Missed heartbeats before a connection is evicted
    #[serde(default = "default_miss_threshold")]
    pub miss_threshold: u32,
    /// Capacity of the per-connection outbound queue
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    /// Base delay for client reconnection, in milliseconds
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    /// Maximum client reconnection attempts before terminal disconnect
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
}

impl Default for WebSocketConfigYaml {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
            miss_threshold: default_miss_threshold(),
            outbound_capacity: default_outbound_capacity(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
        }
    }
}

impl WebSocketConfigYaml {
    pub fn validate(&self) -> Result<(), String> {
        if self.ping_interval_secs == 0 {
            return Err("WebSocket ping_interval_secs must be > 0".to_string());
        }
        if self.miss_threshold == 0 {
            return Err("WebSocket miss_threshold must be > 0".to_string());
        }
        if self.outbound_capacity == 0 {
            return Err("WebSocket outbound_capacity must be > 0".to_string());
        }
        Ok(())
    }
}
