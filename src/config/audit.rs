//! Audit logging configuration types.
//!
//! The audit logger dual-writes every event: an in-memory recent-events
//! store serves low-latency queries, a JSON-lines file is the durable
//! compliance record. The file path is the only required field.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_AUDIT_RECENT_CAPACITY, DEFAULT_AUDIT_RETRY_INTERVAL_SECS};

fn default_file_path() -> String {
    "audit.jsonl".to_string()
}

fn default_recent_capacity() -> usize {
    DEFAULT_AUDIT_RECENT_CAPACITY
}

fn default_retry_interval_secs() -> u64 {
    DEFAULT_AUDIT_RETRY_INTERVAL_SECS
}

/// Audit section of the gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfigYaml {
    /// Path to the durable JSON-lines audit file
    #[serde(default = "default_file_path")]
    pub file_path: String,
    /// Capacity of the in-memory recent-events store
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
    /// Interval between durable-sink retry flushes, in seconds
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

impl Default for AuditConfigYaml {
    fn default() -> Self {
        Self {
            file_path: default_file_path(),
            recent_capacity: default_recent_capacity(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

impl AuditConfigYaml {
    pub fn validate(&self) -> Result<(), String> {
        if self.file_path.is_empty() {
            return Err("Audit file_path cannot be empty".to_string());
        }
        if self.recent_capacity == 0 {
            return Err("Audit recent_capacity must be > 0".to_string());
        }
        Ok(())
    }
}
