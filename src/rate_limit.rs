//! Rate Limiting with Selectable Algorithms
//!
//! Admission control at the edge of the gateway, keyed by
//! `(identity, route class)`. Each route class selects one of four
//! algorithms via configuration:
//! - **Fixed window**: counts requests in timer-aligned intervals; resets
//!   at the boundary; allows up to 2x burst across a window edge
//! - **Sliding window**: retains request timestamps in the trailing window;
//!   smoother than fixed windows at the cost of per-request memory
//! - **Token bucket**: capacity C, refill rate R tokens/sec; models
//!   sustained rate plus burst allowance
//! - **Leaky bucket**: fixed drain rate; smooths bursts into a constant
//!   output rate
//!
//! Rejections always carry a positive `retry_after` computed from the
//! algorithm's own reset/refill schedule. Requests racing at a window
//! boundary are serialized by the per-bucket lock; first committed wins.
//!
//! Bucket state is in-memory and resets on restart. This is acceptable for
//! admission-control state on a single instance; horizontally scaled
//! deployments need a shared, atomically-incrementable store instead and
//! must not use this module as-is.
//!
//! ## Configuration Example
//!
//! ```yaml
//! rate_limit:
//!   default:
//!     algorithm: sliding_window
//!     limit: 100
//!     window_secs: 60
//!   route_classes:
//!     trade-submit:
//!       algorithm: fixed_window
//!       limit: 5
//!       window_secs: 60
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

use crate::constants::{
    DEFAULT_BUCKET_CAPACITY, DEFAULT_BUCKET_IDLE_TTL_SECS, DEFAULT_CLEANUP_INTERVAL_SECS,
    DEFAULT_LEAK_RATE, DEFAULT_MAX_TRACKED_BUCKETS, DEFAULT_RATE_LIMIT, DEFAULT_RATE_WINDOW_SECS,
    DEFAULT_REFILL_RATE,
};

/// Get current time as milliseconds since UNIX epoch
#[inline]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Rate limiting algorithms selectable per route class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitAlgorithm {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
    LeakyBucket,
}

/// Admission policy for one route class
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Algorithm used for this route class
    pub algorithm: RateLimitAlgorithm,
    /// Requests per window (fixed/sliding window)
    pub limit: u32,
    /// Window length (fixed/sliding window)
    pub window: Duration,
    /// Bucket capacity (token/leaky bucket)
    pub capacity: u32,
    /// Token refill rate in tokens per second (token bucket)
    pub refill_rate: f64,
    /// Drain rate in requests per second (leaky bucket)
    pub leak_rate: f64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            limit: DEFAULT_RATE_LIMIT,
            window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
            capacity: DEFAULT_BUCKET_CAPACITY,
            refill_rate: DEFAULT_REFILL_RATE,
            leak_rate: DEFAULT_LEAK_RATE,
        }
    }
}

/// Result of an admission check
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Configured limit for the route class (for X-RateLimit-Limit)
    pub limit: u32,
    /// Remaining budget in the current window/bucket (for X-RateLimit-Remaining)
    pub remaining: u32,
    /// How long to wait before retrying; present and positive on rejection
    pub retry_after: Option<Duration>,
}

/// Per-(identity, route class) bucket state
///
/// One struct serves all four algorithms; only the fields relevant to the
/// configured algorithm are touched. Mutated only under the bucket's lock.
#[derive(Debug)]
struct BucketState {
    /// Start of the current timer-aligned window (fixed window)
    window_start_ms: u64,
    /// Requests counted in the current window (fixed window)
    count: u32,
    /// Request timestamps within the trailing window (sliding window)
    timestamps: VecDeque<u64>,
    /// Current token level (token bucket)
    tokens: f64,
    /// Last refill time (token bucket)
    last_refill_ms: u64,
    /// Current queued volume (leaky bucket)
    volume: f64,
    /// Last drain time (leaky bucket)
    last_leak_ms: u64,
    /// Last access time, used for idle eviction
    last_accessed_ms: u64,
}

impl BucketState {
    fn new(policy: &RateLimitPolicy, now: u64) -> Self {
        Self {
            window_start_ms: aligned_window_start(now, policy.window),
            count: 0,
            timestamps: VecDeque::new(),
            tokens: policy.capacity as f64,
            last_refill_ms: now,
            volume: 0.0,
            last_leak_ms: now,
            last_accessed_ms: now,
        }
    }
}

/// Align a timestamp down to the start of its window
#[inline]
fn aligned_window_start(now: u64, window: Duration) -> u64 {
    let window_ms = window.as_millis().max(1) as u64;
    now - (now % window_ms)
}

type BucketKey = (String, String);

/// Rate limiter managing per-(identity, route class) buckets
///
/// Different keys never contend: each bucket sits behind its own `Mutex`
/// inside the shared registry. Idle buckets are evicted by a background
/// cleanup task to bound memory under identity churn.
pub struct RateLimitManager {
    /// Per-route-class policies
    policies: HashMap<String, RateLimitPolicy>,
    /// Policy applied to route classes without an explicit entry
    default_policy: RateLimitPolicy,
    /// Bucket registry
    buckets: Arc<RwLock<HashMap<BucketKey, Arc<Mutex<BucketState>>>>>,
    /// Maximum number of tracked buckets before emergency cleanup
    max_tracked: usize,
    /// TTL for idle buckets before eviction
    idle_ttl: Duration,
    /// Cleanup task shutdown sender (Some when task is running)
    cleanup_shutdown: Arc<RwLock<Option<oneshot::Sender<()>>>>,
}

impl RateLimitManager {
    /// Create a manager with the given default policy and per-route overrides
    pub fn new(default_policy: RateLimitPolicy, policies: HashMap<String, RateLimitPolicy>) -> Self {
        Self {
            policies,
            default_policy,
            buckets: Arc::new(RwLock::new(HashMap::new())),
            max_tracked: DEFAULT_MAX_TRACKED_BUCKETS,
            idle_ttl: Duration::from_secs(DEFAULT_BUCKET_IDLE_TTL_SECS),
            cleanup_shutdown: Arc::new(RwLock::new(None)),
        }
    }

    /// Policy in effect for a route class
    pub fn policy_for(&self, route_class: &str) -> &RateLimitPolicy {
        self.policies.get(route_class).unwrap_or(&self.default_policy)
    }

    /// Check admission for `identity` on `route_class` at the current time
    pub fn admit(&self, identity: &str, route_class: &str) -> RateLimitDecision {
        self.check(identity, route_class, now_ms())
    }

    /// Check admission at an explicit timestamp (milliseconds since epoch)
    ///
    /// The explicit clock keeps window/refill arithmetic deterministic in
    /// tests; production callers use [`admit`](Self::admit).
    pub fn check(&self, identity: &str, route_class: &str, now: u64) -> RateLimitDecision {
        let policy = self.policy_for(route_class).clone();
        let bucket = self.bucket_entry(identity, route_class, &policy, now);

        let mut state = bucket.lock();
        state.last_accessed_ms = now;

        let decision = match policy.algorithm {
            RateLimitAlgorithm::FixedWindow => fixed_window_check(&mut state, &policy, now),
            RateLimitAlgorithm::SlidingWindow => sliding_window_check(&mut state, &policy, now),
            RateLimitAlgorithm::TokenBucket => token_bucket_check(&mut state, &policy, now),
            RateLimitAlgorithm::LeakyBucket => leaky_bucket_check(&mut state, &policy, now),
        };

        if !decision.allowed {
            tracing::debug!(
                identity = identity,
                route_class = route_class,
                retry_after_ms = decision
                    .retry_after
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
                "Request rejected by rate limiter"
            );
        }

        decision
    }

    /// Get or create the bucket for a key
    fn bucket_entry(
        &self,
        identity: &str,
        route_class: &str,
        policy: &RateLimitPolicy,
        now: u64,
    ) -> Arc<Mutex<BucketState>> {
        let key = (identity.to_string(), route_class.to_string());

        // Fast path: bucket already exists
        {
            let buckets = self.buckets.read();
            if let Some(entry) = buckets.get(&key) {
                return Arc::clone(entry);
            }
        }

        let mut buckets = self.buckets.write();

        // Enforce max bucket count to prevent memory exhaustion
        if buckets.len() >= self.max_tracked {
            tracing::warn!(
                bucket_count = buckets.len(),
                max_buckets = self.max_tracked,
                "Rate limit bucket count exceeded max, clearing all to prevent memory exhaustion"
            );
            buckets.clear();
        }

        Arc::clone(
            buckets
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(BucketState::new(policy, now)))),
        )
    }

    /// Get count of tracked buckets (for metrics/monitoring)
    pub fn tracked_bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    /// Clean up buckets that haven't been used within the TTL period
    ///
    /// Returns the number of entries evicted.
    pub fn cleanup_idle_buckets(&self, ttl: Duration, now: u64) -> usize {
        let ttl_ms = ttl.as_millis() as u64;
        let mut buckets = self.buckets.write();
        let before_count = buckets.len();

        buckets.retain(|_, entry| {
            let state = entry.lock();
            now.saturating_sub(state.last_accessed_ms) < ttl_ms
        });

        let evicted = before_count - buckets.len();
        if evicted > 0 {
            tracing::info!(
                evicted = evicted,
                remaining = buckets.len(),
                ttl_secs = ttl.as_secs(),
                "Cleaned up idle rate limit buckets"
            );
        }
        evicted
    }

    /// Start the background cleanup task that evicts idle buckets
    ///
    /// Calling this multiple times is safe - subsequent calls are ignored if
    /// a cleanup task is already running. The task stops when
    /// [`stop_cleanup_task`](Self::stop_cleanup_task) is called.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Option<Duration>) {
        let interval = interval.unwrap_or(Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        {
            let mut guard = self.cleanup_shutdown.write();
            if guard.is_some() {
                tracing::debug!("Rate limiter cleanup task already running, skipping duplicate start");
                return;
            }
            *guard = Some(shutdown_tx);
        }

        let manager = Arc::clone(self);
        let idle_ttl = self.idle_ttl;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.cleanup_idle_buckets(idle_ttl, now_ms());
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Rate limiter cleanup task shutting down");
                        break;
                    }
                }
            }
        });

        tracing::info!(
            interval_secs = interval.as_secs(),
            idle_ttl_secs = idle_ttl.as_secs(),
            "Started rate limiter cleanup task"
        );
    }

    /// Stop the background cleanup task
    pub fn stop_cleanup_task(&self) {
        if let Some(shutdown_tx) = self.cleanup_shutdown.write().take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// Fixed window: count requests in the timer-aligned interval containing `now`
fn fixed_window_check(
    state: &mut BucketState,
    policy: &RateLimitPolicy,
    now: u64,
) -> RateLimitDecision {
    let window_ms = policy.window.as_millis().max(1) as u64;
    let aligned = aligned_window_start(now, policy.window);

    // Atomic reset at the window boundary
    if state.window_start_ms != aligned {
        state.window_start_ms = aligned;
        state.count = 0;
    }

    if state.count < policy.limit {
        state.count += 1;
        RateLimitDecision {
            allowed: true,
            limit: policy.limit,
            remaining: policy.limit - state.count,
            retry_after: None,
        }
    } else {
        let reset_ms = (state.window_start_ms + window_ms).saturating_sub(now).max(1);
        RateLimitDecision {
            allowed: false,
            limit: policy.limit,
            remaining: 0,
            retry_after: Some(Duration::from_millis(reset_ms)),
        }
    }
}

/// Sliding window: admit while fewer than `limit` requests fall in the
/// trailing window; evict timestamps older than `now - window`
fn sliding_window_check(
    state: &mut BucketState,
    policy: &RateLimitPolicy,
    now: u64,
) -> RateLimitDecision {
    let window_ms = policy.window.as_millis().max(1) as u64;

    while let Some(&oldest) = state.timestamps.front() {
        if oldest + window_ms <= now {
            state.timestamps.pop_front();
        } else {
            break;
        }
    }

    if (state.timestamps.len() as u32) < policy.limit {
        state.timestamps.push_back(now);
        RateLimitDecision {
            allowed: true,
            limit: policy.limit,
            remaining: policy.limit - state.timestamps.len() as u32,
            retry_after: None,
        }
    } else {
        // The oldest in-window request determines when one slot frees up
        let oldest = state.timestamps.front().copied().unwrap_or(now);
        let retry_ms = (oldest + window_ms).saturating_sub(now).max(1);
        RateLimitDecision {
            allowed: false,
            limit: policy.limit,
            remaining: 0,
            retry_after: Some(Duration::from_millis(retry_ms)),
        }
    }
}

/// Token bucket: tokens accumulate at `refill_rate` up to `capacity`;
/// each admitted request consumes one token
fn token_bucket_check(
    state: &mut BucketState,
    policy: &RateLimitPolicy,
    now: u64,
) -> RateLimitDecision {
    let elapsed_secs = now.saturating_sub(state.last_refill_ms) as f64 / 1000.0;
    state.tokens = (state.tokens + elapsed_secs * policy.refill_rate).min(policy.capacity as f64);
    state.last_refill_ms = now;

    if state.tokens >= 1.0 {
        state.tokens -= 1.0;
        RateLimitDecision {
            allowed: true,
            limit: policy.capacity,
            remaining: state.tokens as u32,
            retry_after: None,
        }
    } else {
        let deficit = 1.0 - state.tokens;
        let retry_ms = ((deficit / policy.refill_rate) * 1000.0).ceil() as u64;
        RateLimitDecision {
            allowed: false,
            limit: policy.capacity,
            remaining: 0,
            retry_after: Some(Duration::from_millis(retry_ms.max(1))),
        }
    }
}

/// Leaky bucket: queued volume drains at `leak_rate`; requests are rejected
/// once the bucket is full
fn leaky_bucket_check(
    state: &mut BucketState,
    policy: &RateLimitPolicy,
    now: u64,
) -> RateLimitDecision {
    let elapsed_secs = now.saturating_sub(state.last_leak_ms) as f64 / 1000.0;
    state.volume = (state.volume - elapsed_secs * policy.leak_rate).max(0.0);
    state.last_leak_ms = now;

    if state.volume + 1.0 <= policy.capacity as f64 {
        state.volume += 1.0;
        RateLimitDecision {
            allowed: true,
            limit: policy.capacity,
            remaining: (policy.capacity as f64 - state.volume) as u32,
            retry_after: None,
        }
    } else {
        let overflow = state.volume + 1.0 - policy.capacity as f64;
        let retry_ms = ((overflow / policy.leak_rate) * 1000.0).ceil() as u64;
        RateLimitDecision {
            allowed: false,
            limit: policy.capacity,
            remaining: 0,
            retry_after: Some(Duration::from_millis(retry_ms.max(1))),
        }
    }
}
