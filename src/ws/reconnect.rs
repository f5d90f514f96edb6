//! Client reconnection policy.
//!
//! Exponential backoff starting at a base interval, doubling each attempt,
//! with a hard cap on attempt count. After the last attempt the client must
//! surface a terminal disconnect to its caller, never retry forever. The
//! policy is pure arithmetic so clients of any flavor can embed it.

use std::time::Duration;

use crate::constants::{DEFAULT_RECONNECT_BASE_MS, DEFAULT_RECONNECT_MAX_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt
    pub base: Duration,
    /// Attempts allowed before the disconnect becomes terminal
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    ///
    /// Returns `None` once the attempt budget is exhausted; the caller must
    /// treat that as a terminal disconnect.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        // base * 2^(attempt-1), saturating on pathological configs
        let multiplier = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        Some(
            self.base
                .checked_mul(multiplier.min(u32::MAX as u64) as u32)
                .unwrap_or(Duration::MAX),
        )
    }

    /// Full backoff schedule, for logging and tests
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts)
            .filter_map(|attempt| self.delay_for(attempt))
            .collect()
    }
}
