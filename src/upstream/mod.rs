//! Upstream service clients.
//!
//! Every backend the gateway fronts (trading, risk, compliance, iot)
//! implements the same contract: `operation(data) -> result | error`. The
//! orchestrator only sees the [`UpstreamService`] trait, so tests swap in
//! scripted fakes and the HTTP implementation stays a thin POST with an
//! explicit per-call timeout.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::UpstreamsConfigYaml;

/// Upstream call failure
///
/// Detail strings are preserved for the audit log; they are never forwarded
/// to clients.
#[derive(Debug, Clone)]
pub enum UpstreamError {
    /// The call exceeded its configured timeout
    Timeout,
    /// The service could not be reached at all
    Unavailable(String),
    /// The service answered with an error status
    Failed { status: u16, detail: String },
}

impl UpstreamError {
    /// Whether this failure counts toward the circuit breaker
    ///
    /// Client-caused 4xx responses reflect the request, not upstream
    /// health, and must not open the circuit.
    pub fn is_breaker_failure(&self) -> bool {
        match self {
            UpstreamError::Timeout | UpstreamError::Unavailable(_) => true,
            UpstreamError::Failed { status, .. } => *status >= 500,
        }
    }

    /// Detail preserved for the audit log only
    pub fn detail(&self) -> String {
        match self {
            UpstreamError::Timeout => "call timed out".to_string(),
            UpstreamError::Unavailable(detail) => detail.clone(),
            UpstreamError::Failed { status, detail } => format!("status {}: {}", status, detail),
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Timeout => write!(f, "Upstream call timed out"),
            UpstreamError::Unavailable(_) => write!(f, "Upstream unreachable"),
            UpstreamError::Failed { status, .. } => {
                write!(f, "Upstream returned status {}", status)
            }
        }
    }
}

impl std::error::Error for UpstreamError {}

/// The contract every upstream service exposes to the orchestrator
#[async_trait]
pub trait UpstreamService: Send + Sync {
    fn name(&self) -> &str;

    /// Invoke `operation` with a JSON payload
    async fn call(
        &self,
        operation: &str,
        data: &serde_json::Value,
    ) -> Result<serde_json::Value, UpstreamError>;
}

/// HTTP implementation: POST `{base_url}/{operation}` with a JSON body
pub struct HttpUpstreamService {
    name: String,
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpUpstreamService {
    pub fn new(name: &str, base_url: &str, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl UpstreamService for HttpUpstreamService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        operation: &str,
        data: &serde_json::Value,
    ) -> Result<serde_json::Value, UpstreamError> {
        let url = format!("{}/{}", self.base_url, operation);

        let response = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(data)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Failed { status, detail });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| UpstreamError::Failed {
                status,
                detail: format!("malformed response body: {}", e),
            })
    }
}

/// Registry of configured upstream services, keyed by name
pub struct UpstreamRegistry {
    services: HashMap<String, Arc<dyn UpstreamService>>,
}

impl UpstreamRegistry {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Build HTTP clients for every configured upstream
    pub fn from_config(config: &UpstreamsConfigYaml) -> Self {
        let mut registry = Self::new();
        for (name, upstream) in config {
            registry.register(Arc::new(HttpUpstreamService::new(
                name,
                &upstream.base_url,
                Duration::from_millis(upstream.timeout_ms),
            )));
        }
        registry
    }

    /// Register a service (tests inject fakes through this)
    pub fn register(&mut self, service: Arc<dyn UpstreamService>) {
        self.services.insert(service.name().to_string(), service);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn UpstreamService>> {
        self.services.get(name).cloned()
    }

    /// Registered service names, sorted for stable output
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for UpstreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
