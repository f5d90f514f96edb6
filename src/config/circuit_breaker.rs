//! Circuit breaker configuration types.
//!
//! One default section plus optional per-service overrides. Sensitive
//! upstreams (trading) trip fast; batch-oriented upstreams (compliance)
//! tolerate more failures before opening.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::constants::{
    DEFAULT_COOLDOWN_MULTIPLIER, DEFAULT_COOLDOWN_SECS, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_MAX_COOLDOWN_SECS,
};

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

fn default_cooldown_multiplier() -> f64 {
    DEFAULT_COOLDOWN_MULTIPLIER
}

fn default_max_cooldown_secs() -> u64 {
    DEFAULT_MAX_COOLDOWN_SECS
}

/// Circuit breaker configuration (YAML format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfigYaml {
    /// Number of consecutive failures to open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long to wait before allowing a trial, in seconds (open → half-open)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Factor applied to the cooldown when a half-open trial fails
    #[serde(default = "default_cooldown_multiplier")]
    pub cooldown_multiplier: f64,
    /// Upper bound for the extended cooldown, in seconds
    #[serde(default = "default_max_cooldown_secs")]
    pub max_cooldown_secs: u64,
}

impl Default for CircuitBreakerConfigYaml {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            cooldown_multiplier: default_cooldown_multiplier(),
            max_cooldown_secs: default_max_cooldown_secs(),
        }
    }
}

impl CircuitBreakerConfigYaml {
    /// Convert to the runtime config used by the breaker registry
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            cooldown_multiplier: self.cooldown_multiplier,
            max_cooldown: Duration::from_secs(self.max_cooldown_secs),
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err(format!(
                "Circuit breaker '{}' has failure_threshold 0",
                name
            ));
        }
        if self.cooldown_secs == 0 {
            return Err(format!("Circuit breaker '{}' has cooldown_secs 0", name));
        }
        if self.cooldown_multiplier < 1.0 {
            return Err(format!(
                "Circuit breaker '{}' has cooldown_multiplier < 1.0",
                name
            ));
        }
        if self.max_cooldown_secs < self.cooldown_secs {
            return Err(format!(
                "Circuit breaker '{}' has max_cooldown_secs below cooldown_secs",
                name
            ));
        }
        Ok(())
    }
}

/// Circuit breaker section of the gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CircuitBreakersConfigYaml {
    /// Defaults applied to services without an explicit entry
    #[serde(default)]
    pub default: CircuitBreakerConfigYaml,
    /// Per-service overrides, keyed by upstream service name
    #[serde(default)]
    pub services: HashMap<String, CircuitBreakerConfigYaml>,
}

impl CircuitBreakersConfigYaml {
    pub fn validate(&self) -> Result<(), String> {
        self.default.validate("default")?;
        for (name, config) in &self.services {
            config.validate(name)?;
        }
        Ok(())
    }

    /// Runtime per-service configs for the breaker registry
    pub fn to_service_configs(&self) -> HashMap<String, CircuitBreakerConfig> {
        self.services
            .iter()
            .map(|(name, config)| (name.clone(), config.to_breaker_config()))
            .collect()
    }
}
