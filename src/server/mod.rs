//! HTTP/WebSocket surface.
//!
//! axum routes over the [`Gateway`]: the OAuth endpoints, the proxied
//! `/bff/request` pipeline, health, metrics and the WebSocket upgrade. A
//! security middleware screens every request (user agent, URI length,
//! header size), assigns the correlation id, and stamps security headers
//! plus the correlation id onto every response.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Query, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::{BffRequest, Gateway};
use crate::security::{
    check_user_agent, validate_header_size, validate_uri_length, SecurityError, SecurityLimits,
    SECURITY_HEADERS,
};
use crate::ws::handler::{close_unauthorized, run_connection};

/// Correlation id assigned by the security middleware
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub limits: Arc<SecurityLimits>,
}

/// Build the router with all gateway routes and layers
pub fn router(gateway: Arc<Gateway>, config: &Config) -> Router {
    let limits = Arc::new(SecurityLimits::from(&config.server.security_limits));
    let state = AppState {
        gateway,
        limits: Arc::clone(&limits),
    };

    Router::new()
        .route("/oauth/login", post(oauth_login))
        .route("/oauth/callback", post(oauth_callback))
        .route("/oauth/logout", post(oauth_logout))
        .route("/bff/request", post(bff_request))
        .route("/bff/health", get(bff_health))
        .route("/bff/ws", get(ws_upgrade))
        .route("/metrics", get(metrics_endpoint))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            security_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout,
        )))
        .layer(DefaultBodyLimit::max(limits.max_body_size))
        .with_state(state)
}

/// Run the gateway until shutdown
pub async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = Arc::new(Gateway::from_config(&config)?);
    gateway.start_background_tasks();

    let app = router(Arc::clone(&gateway), &config);
    let listen_addr = format!("{}:{}", config.server.address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;

    tracing::info!(address = listen_addr.as_str(), "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    gateway.stop_background_tasks();
    Ok(())
}

/// Screen the request, assign the correlation id, stamp response headers
async fn security_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    if let Err(e) = check_user_agent(user_agent.as_deref()) {
        return security_error_response(&e);
    }

    if let Err(e) = validate_uri_length(
        &request.uri().to_string(),
        state.limits.max_uri_length,
    ) {
        return security_error_response(&e);
    }

    let total_header_size: usize = request
        .headers()
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len())
        .sum();
    if let Err(e) = validate_header_size(total_header_size, state.limits.max_header_size) {
        return security_error_response(&e);
    }

    // Propagate the caller's correlation id or assign a fresh one
    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(Gateway::new_correlation_id);
    request
        .extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    for &(name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        headers.insert(HeaderName::from_static("x-correlation-id"), value);
    }
    response
}

fn security_error_response(err: &SecurityError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    tracing::warn!(status = err.status_code(), error = %err, "Request rejected by security screen");
    (
        status,
        Json(json!({ "success": false, "error": "request_rejected" })),
    )
        .into_response()
}

/// Map a pipeline error to its HTTP response
fn error_response(err: &GatewayError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (
        status,
        Json(json!({
            "success": false,
            "error": err.kind(),
            "message": err.to_string(),
        })),
    )
        .into_response();

    let headers = response.headers_mut();
    if let Some(retry_after) = err.retry_after() {
        // Positive, rounded up; a zero Retry-After is never sent
        let secs = retry_after.as_secs().max(1);
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            headers.insert(HeaderName::from_static("retry-after"), value);
        }
    }
    if let GatewayError::RateLimitExceeded { limit, .. } = err {
        if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
            headers.insert(HeaderName::from_static("x-ratelimit-limit"), value);
        }
        headers.insert(
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from_static("0"),
        );
    }
    response
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    provider: String,
    redirect_uri: String,
}

async fn oauth_login(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(request): Json<LoginRequest>,
) -> Response {
    match state
        .gateway
        .initiate_login(&request.provider, &request.redirect_uri, &correlation.0)
    {
        Ok(initiation) => Json(json!({
            "authorization_url": initiation.authorization_url,
            "state": initiation.state,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct CallbackRequest {
    provider: String,
    code: String,
    state: String,
}

async fn oauth_callback(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(request): Json<CallbackRequest>,
) -> Response {
    match state
        .gateway
        .complete_login(&request.provider, &request.code, &request.state, &correlation.0)
        .await
    {
        Ok(success) => Json(json!({
            "success": true,
            "user": success.identity,
            "token": success.token_pair,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
struct LogoutRequest {
    #[allow(dead_code)]
    provider: Option<String>,
    access_token: String,
}

async fn oauth_logout(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(request): Json<LogoutRequest>,
) -> Response {
    match state
        .gateway
        .logout(&request.access_token, &correlation.0)
        .await
    {
        Ok(revoked) => Json(json!({ "success": true, "provider_revoked": revoked })).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn bff_request(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    Json(request): Json<BffRequest>,
) -> Response {
    let bearer = bearer_token(&headers);
    match state
        .gateway
        .handle_request(bearer, request, &correlation.0)
        .await
    {
        Ok(outcome) => {
            let mut response =
                Json(json!({ "success": true, "data": outcome.data })).into_response();
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&outcome.rate_limit.limit.to_string()) {
                headers.insert(HeaderName::from_static("x-ratelimit-limit"), value);
            }
            if let Ok(value) = HeaderValue::from_str(&outcome.rate_limit.remaining.to_string()) {
                headers.insert(HeaderName::from_static("x-ratelimit-remaining"), value);
            }
            // Clients pick up the transparently refreshed token from here
            if let Some(token_pair) = outcome.refreshed_token {
                if let Ok(value) = HeaderValue::from_str(&token_pair.access_token) {
                    headers.insert(HeaderName::from_static("x-refreshed-access-token"), value);
                }
            }
            response
        }
        Err(e) => error_response(&e),
    }
}

async fn bff_health(State(state): State<AppState>) -> Response {
    Json(state.gateway.health()).into_response()
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.gateway.metrics().export_prometheus(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    user_id: Option<String>,
    session_id: Option<String>,
    token: Option<String>,
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let Some(token) = query.token.as_deref() else {
            close_unauthorized(socket).await;
            return;
        };

        let authenticated = match state.gateway.authenticate_ws(token, &correlation.0).await {
            Ok(authenticated) => authenticated,
            Err(_) => {
                close_unauthorized(socket).await;
                return;
            }
        };

        // A user_id query param must agree with the token's identity
        if query
            .user_id
            .as_deref()
            .is_some_and(|user_id| user_id != authenticated.identity.id)
        {
            close_unauthorized(socket).await;
            return;
        }

        let session_id = query
            .session_id
            .unwrap_or_else(|| authenticated.session_id.clone());
        let manager = Arc::clone(state.gateway.ws());
        let handle = manager.register(&authenticated.identity.id, &session_id, &correlation.0);
        run_connection(socket, handle, manager).await;
    })
}
