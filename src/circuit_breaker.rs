//! Circuit Breaker Pattern Implementation
//!
//! Prevents cascading failures by failing fast when upstream services
//! become unhealthy. One breaker per upstream target, held in a registry.
//!
//! State Machine:
//! - **Closed**: Normal operation, requests pass through
//! - **Open**: Too many consecutive failures, reject immediately (503)
//! - **Half-Open**: After the cooldown, exactly one trial request is
//!   allowed through; concurrent callers fail fast until it resolves
//!   - Trial success → Closed
//!   - Trial failure → Open, with the cooldown extended (capped)
//!
//! Configuration:
//! - `failure_threshold`: consecutive failures to open the circuit
//! - `cooldown`: how long to wait before allowing a trial (open → half-open)
//! - `cooldown_multiplier`: factor applied to the cooldown when a trial fails
//! - `max_cooldown`: upper bound for the extended cooldown

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::constants::{
    DEFAULT_COOLDOWN_MULTIPLIER, DEFAULT_COOLDOWN_SECS, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_MAX_COOLDOWN_SECS,
};

/// Get current time as milliseconds since UNIX epoch (lock-free timestamp)
#[inline]
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed = 0,
    /// Too many failures - reject requests immediately
    Open = 1,
    /// Testing if the upstream recovered - single trial allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed, // Default to closed for invalid values
        }
    }
}

impl CircuitState {
    /// Lowercase name used in health responses and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures to open circuit
    pub failure_threshold: u32,
    /// How long to wait before allowing a trial (open → half-open)
    pub cooldown: Duration,
    /// Factor applied to the cooldown when a half-open trial fails
    pub cooldown_multiplier: f64,
    /// Upper bound for the extended cooldown
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            cooldown_multiplier: DEFAULT_COOLDOWN_MULTIPLIER,
            max_cooldown: Duration::from_secs(DEFAULT_MAX_COOLDOWN_SECS),
        }
    }
}

/// Outcome of an admission check against a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit is closed, request passes through
    Allowed,
    /// Circuit is half-open and this caller won the single trial slot
    AllowedTrial,
    /// Request must fail fast without upstream I/O
    Rejected,
}

/// Circuit breaker for a single upstream target
///
/// Uses lock-free atomics for all operations, including timestamp tracking.
/// State transitions use Acquire/Release ordering for proper synchronization.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Current circuit state (uses Acquire on load, Release on store)
    state: AtomicU8,
    /// Consecutive failure count
    failure_count: AtomicU64,
    /// Last state transition time as milliseconds since UNIX epoch
    last_transition_ms: AtomicU64,
    /// Cooldown currently in effect, extended on trial failure
    current_cooldown_ms: AtomicU64,
    /// Whether the single half-open trial is in flight
    trial_in_flight: AtomicBool,
    /// Configuration
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU64::new(0),
            last_transition_ms: AtomicU64::new(now_ms()),
            current_cooldown_ms: AtomicU64::new(config.cooldown.as_millis() as u64),
            trial_in_flight: AtomicBool::new(false),
            config,
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.state.load(Ordering::Acquire).into()
    }

    /// Get current consecutive failure count
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Check whether a request may proceed at time `now`
    ///
    /// At most one caller receives [`Admission::AllowedTrial`] per half-open
    /// period; the trial slot is claimed with a compare-and-swap so racing
    /// callers cannot all become trials.
    pub fn check(&self, now: u64) -> Admission {
        match self.state() {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let last_ms = self.last_transition_ms.load(Ordering::Acquire);
                let elapsed_ms = now.saturating_sub(last_ms);
                let cooldown_ms = self.current_cooldown_ms.load(Ordering::Relaxed);

                if elapsed_ms >= cooldown_ms {
                    // Claim the trial slot before publishing the state change
                    if self
                        .trial_in_flight
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        tracing::info!("Circuit breaker cooldown elapsed, transitioning to half-open");
                        self.last_transition_ms.store(now, Ordering::Relaxed);
                        self.state
                            .store(CircuitState::HalfOpen as u8, Ordering::Release);
                        Admission::AllowedTrial
                    } else {
                        Admission::Rejected
                    }
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if self
                    .trial_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    Admission::AllowedTrial
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    /// How long a rejected caller should wait before retrying
    ///
    /// Never returns zero; in half-open the full current cooldown is used as
    /// a conservative hint while the trial resolves.
    pub fn retry_after(&self, now: u64) -> Duration {
        let cooldown_ms = self.current_cooldown_ms.load(Ordering::Relaxed);
        match self.state() {
            CircuitState::Open => {
                let last_ms = self.last_transition_ms.load(Ordering::Acquire);
                let elapsed_ms = now.saturating_sub(last_ms);
                Duration::from_millis(cooldown_ms.saturating_sub(elapsed_ms).max(1))
            }
            _ => Duration::from_millis(cooldown_ms.max(1)),
        }
    }

    /// Record a successful request at time `now`
    pub fn record_success(&self, now: u64) {
        match self.state() {
            CircuitState::Closed => {
                // Reset consecutive failure count on success
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                tracing::info!("Circuit breaker closing after successful trial");
                self.transition_to_closed(now);
            }
            CircuitState::Open => {
                // Success in open state shouldn't happen (requests are rejected)
            }
        }
    }

    /// Record a failed request at time `now`
    pub fn record_failure(&self, now: u64) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;

                tracing::warn!(
                    failures = failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure in closed state"
                );

                if failures >= self.config.failure_threshold as u64 {
                    tracing::error!("Circuit breaker opening due to consecutive failures");
                    self.transition_to_open(now, self.config.cooldown.as_millis() as u64);
                }
            }
            CircuitState::HalfOpen => {
                // Trial failed: reopen with the cooldown extended, capped
                let current = self.current_cooldown_ms.load(Ordering::Relaxed);
                let extended = ((current as f64 * self.config.cooldown_multiplier) as u64)
                    .clamp(current, self.config.max_cooldown.as_millis() as u64);

                tracing::warn!(
                    cooldown_ms = extended,
                    "Circuit breaker reopening after failed trial"
                );
                self.transition_to_open(now, extended);
            }
            CircuitState::Open => {
                // Failure in open state is expected (no requests get through)
            }
        }
    }

    /// Reset the breaker to closed (admin operation)
    pub fn reset(&self, now: u64) {
        self.transition_to_closed(now);
    }

    fn transition_to_closed(&self, now: u64) {
        self.failure_count.store(0, Ordering::Relaxed);
        self.trial_in_flight.store(false, Ordering::Relaxed);
        self.current_cooldown_ms
            .store(self.config.cooldown.as_millis() as u64, Ordering::Relaxed);
        self.last_transition_ms.store(now, Ordering::Relaxed);
        // Release ensures all above writes are visible before state change
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
    }

    fn transition_to_open(&self, now: u64, cooldown_ms: u64) {
        self.trial_in_flight.store(false, Ordering::Relaxed);
        self.current_cooldown_ms.store(cooldown_ms, Ordering::Relaxed);
        self.last_transition_ms.store(now, Ordering::Relaxed);
        // Release ensures all above writes are visible before state change
        self.state.store(CircuitState::Open as u8, Ordering::Release);
    }
}

/// Point-in-time view of one breaker, surfaced on the health endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitSnapshot {
    pub state: &'static str,
    pub failure_count: u64,
    /// Seconds until the next trial is allowed (open circuits only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Registry of per-upstream circuit breakers
///
/// Breakers are created lazily on first use with the per-service config if
/// present, falling back to the default. Granularity is per upstream target,
/// never global.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    per_service: HashMap<String, CircuitBreakerConfig>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(
        default_config: CircuitBreakerConfig,
        per_service: HashMap<String, CircuitBreakerConfig>,
    ) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            per_service,
            default_config,
        }
    }

    /// Get (or lazily create) the breaker for an upstream target
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read();
            if let Some(breaker) = breakers.get(service) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.breakers.write();
        Arc::clone(breakers.entry(service.to_string()).or_insert_with(|| {
            let config = self
                .per_service
                .get(service)
                .cloned()
                .unwrap_or_else(|| self.default_config.clone());
            Arc::new(CircuitBreaker::new(config))
        }))
    }

    /// Snapshot all known breakers (for the health endpoint)
    pub fn snapshot_all(&self, now: u64) -> HashMap<String, CircuitSnapshot> {
        let breakers = self.breakers.read();
        breakers
            .iter()
            .map(|(service, breaker)| {
                let state = breaker.state();
                let retry_after_secs = match state {
                    CircuitState::Open => Some(breaker.retry_after(now).as_secs()),
                    _ => None,
                };
                (
                    service.clone(),
                    CircuitSnapshot {
                        state: state.as_str(),
                        failure_count: breaker.failure_count(),
                        retry_after_secs,
                    },
                )
            })
            .collect()
    }

    /// Reset one breaker to closed (admin operation)
    pub fn reset(&self, service: &str, now: u64) {
        if let Some(breaker) = self.breakers.read().get(service) {
            breaker.reset(now);
            tracing::info!(service = service, "Circuit breaker reset");
        }
    }
}
