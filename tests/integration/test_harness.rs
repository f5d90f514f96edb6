// Test utilities for driving the gateway without real upstreams or providers

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use torii::audit::{AuditEvent, AuditLogger, AuditSink, SinkError};
use torii::auth::{
    mint_access_token, AuthSession, CanonicalIdentity, LoginState, ProviderTokens, TokenPair,
};
use torii::circuit_breaker::CircuitBreakerRegistry;
use torii::config::Config;
use torii::gateway::Gateway;
use torii::metrics::Metrics;
use torii::oauth::OauthService;
use torii::rate_limit::RateLimitManager;
use torii::server;
use torii::upstream::{UpstreamError, UpstreamRegistry, UpstreamService};
use torii::ws::SessionManager;

/// JWT secret shared by harness config and the login helper
pub const TEST_SECRET: &str = "test-secret";

/// Baseline config: one of each upstream, short breaker cooldowns, a
/// fixed-window trade-submit class, and a google provider entry
pub const BASE_CONFIG: &str = r#"
server:
  address: "127.0.0.1"
  port: 0

rate_limit:
  default:
    algorithm: sliding_window
    limit: 1000
    window_secs: 60
  route_classes:
    trading-submit_order:
      algorithm: fixed_window
      limit: 5
      window_secs: 60

circuit_breakers:
  default:
    failure_threshold: 5
    cooldown_secs: 60
  services:
    risk:
      failure_threshold: 3
      cooldown_secs: 1
      max_cooldown_secs: 8

oauth:
  jwt_secret: "test-secret"
  providers:
    google:
      client_id: "cid"
      client_secret: "csecret"

audit:
  recent_capacity: 1000

websocket:
  ping_interval_secs: 30
  miss_threshold: 3
  outbound_capacity: 8

upstreams:
  trading: { base_url: "http://trading.test" }
  risk: { base_url: "http://risk.test" }
  compliance: { base_url: "http://compliance.test" }
  iot: { base_url: "http://iot.test" }
"#;

/// What the scripted upstream should do on the next calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamMode {
    Succeed,
    Fail,
    Timeout,
}

/// Scripted in-process upstream; behavior is switchable mid-test
pub struct TestUpstream {
    name: String,
    pub calls: AtomicU32,
    mode: Mutex<UpstreamMode>,
}

impl TestUpstream {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            calls: AtomicU32::new(0),
            mode: Mutex::new(UpstreamMode::Succeed),
        })
    }

    pub fn set_mode(&self, mode: UpstreamMode) {
        *self.mode.lock() = mode;
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamService for TestUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        operation: &str,
        _data: &serde_json::Value,
    ) -> Result<serde_json::Value, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match *self.mode.lock() {
            UpstreamMode::Succeed => Ok(serde_json::json!({ "operation": operation })),
            UpstreamMode::Fail => Err(UpstreamError::Failed {
                status: 500,
                detail: "scripted failure".to_string(),
            }),
            UpstreamMode::Timeout => Err(UpstreamError::Timeout),
        }
    }
}

struct NullSink;

impl AuditSink for NullSink {
    fn write(&self, _event: &AuditEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Gateway over scripted upstreams, built from the harness config
pub fn build_gateway(upstreams: &[Arc<TestUpstream>]) -> (Arc<Gateway>, Config) {
    build_gateway_with_config(BASE_CONFIG, upstreams)
}

pub fn build_gateway_with_config(
    yaml: &str,
    upstreams: &[Arc<TestUpstream>],
) -> (Arc<Gateway>, Config) {
    let config = Config::from_yaml_with_env(yaml).expect("harness config should parse");
    config.validate().expect("harness config should validate");

    let metrics = Arc::new(Metrics::new());
    let mut registry = UpstreamRegistry::new();
    for upstream in upstreams {
        registry.register(Arc::clone(upstream) as Arc<dyn UpstreamService>);
    }

    let gateway = Arc::new(Gateway::new(
        Arc::new(RateLimitManager::new(
            config.rate_limit.default.to_policy(),
            config.rate_limit.to_policies(),
        )),
        Arc::new(CircuitBreakerRegistry::new(
            config.circuit_breakers.default.to_breaker_config(),
            config.circuit_breakers.to_service_configs(),
        )),
        Arc::new(OauthService::new(&config.oauth)),
        Arc::new(AuditLogger::new(
            config.audit.recent_capacity,
            Box::new(NullSink),
            Arc::clone(&metrics),
        )),
        Arc::new(SessionManager::new(&config.websocket, Arc::clone(&metrics))),
        Arc::new(registry),
        metrics,
    ));
    (gateway, config)
}

pub fn build_router(gateway: &Arc<Gateway>, config: &Config) -> Router {
    server::router(Arc::clone(gateway), config)
}

/// Insert a live session and return a bearer token for it
pub async fn login(gateway: &Gateway, user_id: &str) -> String {
    let identity = CanonicalIdentity {
        id: user_id.to_string(),
        email: format!("{}@example.com", user_id),
        display_name: user_id.to_string(),
        provider: "google".to_string(),
        roles: vec!["trader".to_string()],
    };
    let session_id = format!("sess-{}", user_id);
    let token = mint_access_token(&identity, &session_id, TEST_SECRET, Duration::from_secs(300))
        .expect("mint should succeed");

    gateway
        .oauth()
        .session_store()
        .insert(AuthSession {
            session_id: session_id.clone(),
            identity: identity.clone(),
            token_pair: TokenPair {
                access_token: token.clone(),
                refresh_token: format!("refresh-{}", user_id),
                scopes: vec!["openid".to_string()],
                expires_at: Utc::now(),
                provider: "google".to_string(),
                user_id: identity.id,
            },
            provider_tokens: ProviderTokens {
                access_token: "provider-token".to_string(),
                refresh_token: None,
                expires_at: None,
            },
            state: LoginState::TokensIssued,
            created_at: Utc::now(),
        })
        .await;
    token
}

/// POST a JSON body through the router and decode the JSON response
pub async fn post_json(
    app: &Router,
    uri: &str,
    body: serde_json::Value,
    bearer: Option<&str>,
) -> (StatusCode, HeaderMap, serde_json::Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        request = request.header("authorization", format!("Bearer {}", token));
    }

    let response = app
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .expect("router should answer");

    decode_response(response).await
}

/// GET a path through the router and decode the JSON response
pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, HeaderMap, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .expect("router should answer");
    decode_response(response).await
}

async fn decode_response(
    response: axum::response::Response,
) -> (StatusCode, HeaderMap, serde_json::Value) {
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body should be readable");
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, headers, json)
}
