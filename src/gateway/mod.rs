//! Request Orchestrator
//!
//! The composition root of the gateway. Every synchronous request flows
//! through one pipeline: resolve identity (with one transparent refresh) →
//! rate limiter → circuit breaker + upstream call → audit → WebSocket push.
//! Each component is constructed once at process start and passed in by
//! reference; there is no ambient global state.
//!
//! Cancellation: if the client goes away while the upstream call is in
//! flight, the request future is dropped and a drop guard still emits an
//! `aborted` audit event, so no attempt disappears from the record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLogger, FileSink, Outcome, Severity};
use crate::auth::TokenPair;
use crate::circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerRegistry, CircuitSnapshot,
};
use crate::config::Config;
use crate::error::GatewayError;
use crate::metrics::Metrics;
use crate::oauth::{Authenticated, LoginInitiation, LoginSuccess, OauthError, OauthService};
use crate::rate_limit::{RateLimitDecision, RateLimitManager};
use crate::upstream::{UpstreamError, UpstreamRegistry};
use crate::ws::{ServerMessage, SessionManager};

#[inline]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One proxied BFF request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BffRequest {
    pub service: String,
    pub operation: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub region: Option<String>,
}

impl BffRequest {
    /// Route class for admission control, e.g. "trading-submit_order"
    pub fn route_class(&self) -> String {
        format!("{}-{}", self.service, self.operation)
    }

    /// Jurisdiction tag recorded on audit events
    pub fn jurisdiction(&self) -> &str {
        self.region.as_deref().unwrap_or("global")
    }
}

/// Successful pipeline outcome
#[derive(Debug, Clone)]
pub struct BffOutcome {
    pub data: serde_json::Value,
    /// Admission decision, surfaced as X-RateLimit-* headers
    pub rate_limit: RateLimitDecision,
    /// New token pair when the access token was transparently refreshed
    pub refreshed_token: Option<TokenPair>,
}

/// Health endpoint payload
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub services: HashMap<String, CircuitSnapshot>,
    pub oauth_providers: Vec<String>,
}

/// Emits an `aborted` audit event if the request future is dropped
///
/// Armed just before the upstream call; disarmed on every path that emits
/// its own terminal event. If the guard fires while holding a breaker
/// trial, the trial is recorded as failed so the breaker cannot wedge
/// half-open with its slot taken.
struct AbortGuard {
    audit: Arc<AuditLogger>,
    actor: String,
    resource: String,
    correlation_id: String,
    jurisdiction: String,
    trial_breaker: Option<Arc<CircuitBreaker>>,
    armed: bool,
}

impl AbortGuard {
    fn disarm(&mut self) -> Option<Arc<CircuitBreaker>> {
        self.armed = false;
        self.trial_breaker.take()
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(breaker) = self.trial_breaker.take() {
            breaker.record_failure(now_ms());
        }
        self.audit.record(
            AuditEvent::new(
                &self.actor,
                "bff.request",
                &self.resource,
                Outcome::Aborted,
                &self.correlation_id,
                &self.jurisdiction,
            )
            .with_detail("request cancelled before upstream call completed"),
        );
        tracing::warn!(
            correlation_id = self.correlation_id.as_str(),
            resource = self.resource.as_str(),
            "Request aborted mid-flight"
        );
    }
}

/// The gateway: explicit dependencies, one instance per process
pub struct Gateway {
    rate_limiter: Arc<RateLimitManager>,
    breakers: Arc<CircuitBreakerRegistry>,
    oauth: Arc<OauthService>,
    audit: Arc<AuditLogger>,
    ws: Arc<SessionManager>,
    upstreams: Arc<UpstreamRegistry>,
    metrics: Arc<Metrics>,
    keepalive_shutdown: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rate_limiter: Arc<RateLimitManager>,
        breakers: Arc<CircuitBreakerRegistry>,
        oauth: Arc<OauthService>,
        audit: Arc<AuditLogger>,
        ws: Arc<SessionManager>,
        upstreams: Arc<UpstreamRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            rate_limiter,
            breakers,
            oauth,
            audit,
            ws,
            upstreams,
            metrics,
            keepalive_shutdown: parking_lot::Mutex::new(None),
        }
    }

    /// Build the full component graph from configuration
    pub fn from_config(config: &Config) -> Result<Self, String> {
        let metrics = Arc::new(Metrics::new());

        let rate_limiter = Arc::new(RateLimitManager::new(
            config.rate_limit.default.to_policy(),
            config.rate_limit.to_policies(),
        ));

        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.circuit_breakers.default.to_breaker_config(),
            config.circuit_breakers.to_service_configs(),
        ));

        let oauth = Arc::new(OauthService::new(&config.oauth));

        let sink = FileSink::new(&config.audit.file_path)
            .map_err(|e| format!("Failed to open audit sink: {}", e))?;
        let audit = Arc::new(AuditLogger::new(
            config.audit.recent_capacity,
            Box::new(sink),
            Arc::clone(&metrics),
        ));

        let ws = Arc::new(SessionManager::new(
            &config.websocket,
            Arc::clone(&metrics),
        ));

        let upstreams = Arc::new(UpstreamRegistry::from_config(&config.upstreams));

        Ok(Self::new(
            rate_limiter,
            breakers,
            oauth,
            audit,
            ws,
            upstreams,
            metrics,
        ))
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn oauth(&self) -> &Arc<OauthService> {
        &self.oauth
    }

    pub fn ws(&self) -> &Arc<SessionManager> {
        &self.ws
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimitManager> {
        &self.rate_limiter
    }

    /// Fresh correlation id for a request that arrived without one
    pub fn new_correlation_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// The synchronous request pipeline
    pub async fn handle_request(
        &self,
        bearer: Option<&str>,
        request: BffRequest,
        correlation_id: &str,
    ) -> Result<BffOutcome, GatewayError> {
        let resource = format!("{}/{}", request.service, request.operation);
        let jurisdiction = request.jurisdiction().to_string();

        // Identity first: nothing reaches an upstream without one
        let authenticated = match self.resolve_identity(bearer).await {
            Ok(authenticated) => authenticated,
            Err(e) => {
                self.metrics.record_auth_failure();
                self.audit_failure("anonymous", &resource, &e, correlation_id, &jurisdiction, None);
                return Err(e);
            }
        };
        let actor = authenticated.identity.id.clone();

        if authenticated.refreshed.is_some() {
            self.metrics.record_token_refresh();
            self.audit.record(AuditEvent::new(
                &actor,
                "auth.refresh",
                "session",
                Outcome::Success,
                correlation_id,
                &jurisdiction,
            ));
        }

        // Admission control
        let route_class = request.route_class();
        let decision = self.rate_limiter.admit(&actor, &route_class);
        if !decision.allowed {
            let retry_after = decision
                .retry_after
                .unwrap_or(std::time::Duration::from_secs(1));
            let err = GatewayError::RateLimitExceeded {
                route_class: route_class.clone(),
                limit: decision.limit,
                retry_after,
            };
            self.metrics.record_rate_limit_rejection(&route_class);
            self.metrics.record_request(&request.service, err.status_code());
            self.audit_failure(&actor, &resource, &err, correlation_id, &jurisdiction, None);
            return Err(err);
        }

        // Unknown services are a client error, not an upstream failure
        let Some(upstream) = self.upstreams.get(&request.service) else {
            let err = GatewayError::Validation(format!("unknown service '{}'", request.service));
            self.metrics.record_request(&request.service, err.status_code());
            self.audit_failure(&actor, &resource, &err, correlation_id, &jurisdiction, None);
            return Err(err);
        };

        // Failure isolation
        let breaker = self.breakers.breaker(&request.service);
        let admission = breaker.check(now_ms());
        if admission == Admission::AllowedTrial {
            // check() just moved the breaker open -> half-open
            self.metrics.record_circuit_transition(&request.service);
        }
        if admission == Admission::Rejected {
            let err = GatewayError::CircuitOpen {
                service: request.service.clone(),
                retry_after: breaker.retry_after(now_ms()),
            };
            self.metrics.record_circuit_open_rejection(&request.service);
            self.metrics.record_request(&request.service, err.status_code());
            self.audit_failure(&actor, &resource, &err, correlation_id, &jurisdiction, None);
            return Err(err);
        }

        // From here on, a dropped future must still leave an audit trail
        let mut guard = AbortGuard {
            audit: Arc::clone(&self.audit),
            actor: actor.clone(),
            resource: resource.clone(),
            correlation_id: correlation_id.to_string(),
            jurisdiction: jurisdiction.clone(),
            trial_breaker: (admission == Admission::AllowedTrial).then(|| Arc::clone(&breaker)),
            armed: true,
        };

        let result = upstream.call(&request.operation, &request.data).await;
        guard.disarm();

        match result {
            Ok(data) => {
                let state_before = breaker.state();
                breaker.record_success(now_ms());
                if breaker.state() != state_before {
                    self.metrics.record_circuit_transition(&request.service);
                }
                self.metrics.record_request(&request.service, 200);
                self.audit.record(AuditEvent::new(
                    &actor,
                    "bff.request",
                    &resource,
                    Outcome::Success,
                    correlation_id,
                    &jurisdiction,
                ));

                // Push the result to every live connection of this user
                self.ws.send_to_user(
                    &actor,
                    &ServerMessage::ServiceUpdate {
                        service: request.service.clone(),
                        correlation_id: correlation_id.to_string(),
                        data: data.clone(),
                    },
                );

                Ok(BffOutcome {
                    data,
                    rate_limit: decision,
                    refreshed_token: authenticated.refreshed,
                })
            }
            Err(upstream_err) => {
                let state_before = breaker.state();
                if upstream_err.is_breaker_failure() {
                    breaker.record_failure(now_ms());
                } else {
                    // The upstream answered; circuit-wise that is healthy,
                    // and a pending trial must not keep its slot
                    breaker.record_success(now_ms());
                }
                if breaker.state() != state_before {
                    self.metrics.record_circuit_transition(&request.service);
                }
                if matches!(upstream_err, UpstreamError::Timeout) {
                    self.metrics.record_upstream_timeout(&request.service);
                }

                let err = match upstream_err {
                    UpstreamError::Timeout => GatewayError::UpstreamTimeout {
                        service: request.service.clone(),
                    },
                    _ => GatewayError::Upstream {
                        service: request.service.clone(),
                    },
                };
                self.metrics.record_request(&request.service, err.status_code());
                // Raw upstream detail goes to the audit log, never the client
                self.audit_failure(
                    &actor,
                    &resource,
                    &err,
                    correlation_id,
                    &jurisdiction,
                    Some(upstream_err.detail()),
                );
                Err(err)
            }
        }
    }

    /// Resolve the bearer token into an identity
    async fn resolve_identity(&self, bearer: Option<&str>) -> Result<Authenticated, GatewayError> {
        let bearer = bearer.ok_or_else(|| GatewayError::Auth("missing bearer token".to_string()))?;
        self.oauth
            .authenticate(bearer)
            .await
            .map_err(|e| GatewayError::Auth(e.to_string()))
    }

    /// Begin an OAuth login (audited)
    pub fn initiate_login(
        &self,
        provider: &str,
        redirect_uri: &str,
        correlation_id: &str,
    ) -> Result<LoginInitiation, GatewayError> {
        match self.oauth.initiate_login(provider, redirect_uri) {
            Ok(initiation) => {
                self.audit.record(AuditEvent::new(
                    "anonymous",
                    "oauth.login",
                    &format!("provider/{}", provider),
                    Outcome::Success,
                    correlation_id,
                    "global",
                ));
                Ok(initiation)
            }
            Err(e) => {
                self.audit_oauth_failure("anonymous", "oauth.login", provider, &e, correlation_id);
                Err(GatewayError::Validation(e.to_string()))
            }
        }
    }

    /// Complete an OAuth login from the provider callback (audited)
    pub async fn complete_login(
        &self,
        provider: &str,
        code: &str,
        state: &str,
        correlation_id: &str,
    ) -> Result<LoginSuccess, GatewayError> {
        match self
            .oauth
            .complete_login(provider, code, state, now_ms())
            .await
        {
            Ok(success) => {
                self.metrics.record_auth_success();
                self.audit.record(AuditEvent::new(
                    &success.identity.id,
                    "oauth.callback",
                    &format!("provider/{}", provider),
                    Outcome::Success,
                    correlation_id,
                    "global",
                ));
                Ok(success)
            }
            Err(e) => {
                self.metrics.record_auth_failure();
                self.audit_oauth_failure("anonymous", "oauth.callback", provider, &e, correlation_id);
                Err(GatewayError::Auth(e.to_string()))
            }
        }
    }

    /// Log out: provider revocation is best-effort, local delete is not (audited)
    pub async fn logout(
        &self,
        access_token: &str,
        correlation_id: &str,
    ) -> Result<bool, GatewayError> {
        match self.oauth.logout(access_token).await {
            Ok(revoked) => {
                self.audit.record(AuditEvent::new(
                    "anonymous",
                    "oauth.logout",
                    "session",
                    Outcome::Success,
                    correlation_id,
                    "global",
                ));
                Ok(revoked)
            }
            Err(e) => {
                self.audit_oauth_failure("anonymous", "oauth.logout", "session", &e, correlation_id);
                Err(GatewayError::Auth(e.to_string()))
            }
        }
    }

    /// Authenticate a WebSocket connect-time token (audited)
    pub async fn authenticate_ws(
        &self,
        token: &str,
        correlation_id: &str,
    ) -> Result<Authenticated, GatewayError> {
        match self.oauth.authenticate(token).await {
            Ok(authenticated) => {
                self.audit.record(AuditEvent::new(
                    &authenticated.identity.id,
                    "ws.connect",
                    "websocket",
                    Outcome::Success,
                    correlation_id,
                    "global",
                ));
                Ok(authenticated)
            }
            Err(e) => {
                self.metrics.record_auth_failure();
                self.audit.record(
                    AuditEvent::new(
                        "anonymous",
                        "ws.connect",
                        "websocket",
                        Outcome::Failure,
                        correlation_id,
                        "global",
                    )
                    .with_detail(e.detail()),
                );
                Err(GatewayError::Auth(e.to_string()))
            }
        }
    }

    /// Health report for `/bff/health`
    pub fn health(&self) -> HealthReport {
        // Materialize breakers for every configured upstream so the report
        // always lists them, opened or not
        for name in self.upstreams.names() {
            let _ = self.breakers.breaker(&name);
        }
        let services = self.breakers.snapshot_all(now_ms());
        let degraded = services.values().any(|snapshot| snapshot.state != "closed");

        HealthReport {
            status: if degraded { "degraded" } else { "ok" },
            services,
            oauth_providers: self.oauth.provider_names(),
        }
    }

    /// Start all background maintenance tasks
    pub fn start_background_tasks(self: &Arc<Self>) {
        self.rate_limiter.start_cleanup_task(None);
        self.oauth.start_background_tasks();
        self.audit.start_retry_task(None);
        self.start_keepalive_task();
    }

    /// Stop all background maintenance tasks
    pub fn stop_background_tasks(&self) {
        self.rate_limiter.stop_cleanup_task();
        self.oauth.stop_background_tasks();
        self.audit.stop_retry_task();
        if let Some(shutdown_tx) = self.keepalive_shutdown.lock().take() {
            let _ = shutdown_tx.send(());
        }
    }

    /// Keepalive loop: periodic pings plus stale-connection eviction
    ///
    /// Lives here rather than in the session manager so evictions are
    /// audited with the connection's own correlation id.
    fn start_keepalive_task(self: &Arc<Self>) {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        {
            let mut guard = self.keepalive_shutdown.lock();
            if guard.is_some() {
                tracing::debug!("Keepalive task already running, skipping duplicate start");
                return;
            }
            *guard = Some(shutdown_tx);
        }

        let gateway = Arc::clone(self);
        let interval = self.ws.ping_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        gateway.ws.ping_all();
                        for handle in gateway.ws.evict_stale(now_ms()) {
                            gateway.audit.record(
                                AuditEvent::new(
                                    &handle.user_id,
                                    "ws.evicted",
                                    "websocket",
                                    Outcome::Failure,
                                    &handle.correlation_id,
                                    "global",
                                )
                                .with_detail("missed heartbeats beyond threshold"),
                            );
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Keepalive task shutting down");
                        break;
                    }
                }
            }
        });
    }

    fn audit_failure(
        &self,
        actor: &str,
        resource: &str,
        err: &GatewayError,
        correlation_id: &str,
        jurisdiction: &str,
        detail: Option<String>,
    ) {
        let mut event = AuditEvent::new(
            actor,
            "bff.request",
            resource,
            Outcome::Failure,
            correlation_id,
            jurisdiction,
        )
        .with_detail(match detail {
            Some(detail) => format!("{}: {}", err.kind(), detail),
            None => err.kind().to_string(),
        });
        if matches!(err, GatewayError::Auth(_)) {
            event = event.with_severity(Severity::High);
        }
        self.audit.record(event);
    }

    fn audit_oauth_failure(
        &self,
        actor: &str,
        action: &str,
        resource: &str,
        err: &OauthError,
        correlation_id: &str,
    ) {
        // CSRF-shaped failures are flagged for alerting
        let severity = if err.is_csrf_signal() {
            Severity::Critical
        } else {
            Severity::High
        };
        self.audit.record(
            AuditEvent::new(
                actor,
                action,
                &format!("provider/{}", resource),
                Outcome::Failure,
                correlation_id,
                "global",
            )
            .with_severity(severity)
            .with_detail(format!("{}: {}", err.kind(), err.detail())),
        );
    }
}
