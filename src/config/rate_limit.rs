//! Rate limiting configuration types.
//!
//! Admission control is configured per route class: each class names one of
//! the four algorithms and its parameters, with a `default` policy applied
//! to route classes without an explicit entry. Tier presets give the common
//! subscription levels sensible limits without per-route boilerplate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BUCKET_CAPACITY, DEFAULT_LEAK_RATE, DEFAULT_RATE_LIMIT, DEFAULT_RATE_WINDOW_SECS,
    DEFAULT_REFILL_RATE,
};
use crate::rate_limit::{RateLimitAlgorithm, RateLimitPolicy};

fn default_limit() -> u32 {
    DEFAULT_RATE_LIMIT
}

fn default_window_secs() -> u64 {
    DEFAULT_RATE_WINDOW_SECS
}

fn default_capacity() -> u32 {
    DEFAULT_BUCKET_CAPACITY
}

fn default_refill_rate() -> f64 {
    DEFAULT_REFILL_RATE
}

fn default_leak_rate() -> f64 {
    DEFAULT_LEAK_RATE
}

/// Algorithm names accepted in YAML
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmYaml {
    FixedWindow,
    #[default]
    SlidingWindow,
    TokenBucket,
    LeakyBucket,
}

impl AlgorithmYaml {
    fn to_algorithm(self) -> RateLimitAlgorithm {
        match self {
            AlgorithmYaml::FixedWindow => RateLimitAlgorithm::FixedWindow,
            AlgorithmYaml::SlidingWindow => RateLimitAlgorithm::SlidingWindow,
            AlgorithmYaml::TokenBucket => RateLimitAlgorithm::TokenBucket,
            AlgorithmYaml::LeakyBucket => RateLimitAlgorithm::LeakyBucket,
        }
    }
}

/// One route class policy (YAML format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicyYaml {
    /// Algorithm for this route class (default: sliding_window)
    #[serde(default)]
    pub algorithm: AlgorithmYaml,
    /// Requests per window, for window algorithms (default: 100)
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Window length in seconds (default: 60)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Bucket capacity, for bucket algorithms (default: 100)
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Token refill rate in tokens per second (default: 1.0)
    #[serde(default = "default_refill_rate")]
    pub refill_rate: f64,
    /// Leaky bucket drain rate in requests per second (default: 0.5)
    #[serde(default = "default_leak_rate")]
    pub leak_rate: f64,
}

impl Default for RateLimitPolicyYaml {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmYaml::default(),
            limit: default_limit(),
            window_secs: default_window_secs(),
            capacity: default_capacity(),
            refill_rate: default_refill_rate(),
            leak_rate: default_leak_rate(),
        }
    }
}

impl RateLimitPolicyYaml {
    /// Convert to the runtime policy used by the rate limiter
    pub fn to_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            algorithm: self.algorithm.to_algorithm(),
            limit: self.limit,
            window: Duration::from_secs(self.window_secs),
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            leak_rate: self.leak_rate,
        }
    }
}

/// Rate limit section of the gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitConfigYaml {
    /// Policy applied to route classes without an explicit entry
    #[serde(default)]
    pub default: RateLimitPolicyYaml,
    /// Per-route-class overrides, keyed by route class name
    #[serde(default)]
    pub route_classes: HashMap<String, RateLimitPolicyYaml>,
    /// Named tier presets (free/basic/premium/enterprise)
    ///
    /// Route classes reference a preset with a YAML anchor:
    ///
    /// ```yaml
    /// tiers:
    ///   premium: &premium
    ///     algorithm: token_bucket
    ///     capacity: 500
    ///     refill_rate: 50.0
    /// route_classes:
    ///   portfolio-read: *premium
    /// ```
    #[serde(default)]
    pub tiers: HashMap<String, RateLimitPolicyYaml>,
}

impl RateLimitConfigYaml {
    pub fn validate(&self) -> Result<(), String> {
        for (name, policy) in std::iter::once(("default", &self.default))
            .chain(self.route_classes.iter().map(|(k, v)| (k.as_str(), v)))
            .chain(self.tiers.iter().map(|(k, v)| (k.as_str(), v)))
        {
            if policy.limit == 0 {
                return Err(format!("Rate limit policy '{}' has limit 0", name));
            }
            if policy.window_secs == 0 {
                return Err(format!("Rate limit policy '{}' has window_secs 0", name));
            }
            if policy.capacity == 0 {
                return Err(format!("Rate limit policy '{}' has capacity 0", name));
            }
            if policy.refill_rate <= 0.0 {
                return Err(format!(
                    "Rate limit policy '{}' has non-positive refill_rate",
                    name
                ));
            }
            if policy.leak_rate <= 0.0 {
                return Err(format!(
                    "Rate limit policy '{}' has non-positive leak_rate",
                    name
                ));
            }
        }
        Ok(())
    }

    /// Runtime policies for the rate limiter (route classes only; tiers are
    /// resolved to route classes by the caller)
    pub fn to_policies(&self) -> HashMap<String, RateLimitPolicy> {
        self.route_classes
            .iter()
            .map(|(name, policy)| (name.clone(), policy.to_policy()))
            .collect()
    }
}
