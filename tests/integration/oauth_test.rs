// Integration tests for the OAuth flow surface (no provider network I/O:
// everything up to the token exchange, plus all rejection paths)

use serde_json::json;

use super::test_harness::{build_gateway, build_router, get_json, login, post_json, TestUpstream};
use torii::audit::{AuditQuery, Outcome, Severity};

#[tokio::test]
async fn test_login_initiation_returns_authorization_url() {
    let (gateway, config) = build_gateway(&[TestUpstream::new("trading")]);
    let app = build_router(&gateway, &config);

    let (status, _, json) = post_json(
        &app,
        "/oauth/login",
        json!({ "provider": "google", "redirect_uri": "https://app.example.com/cb" }),
        None,
    )
    .await;

    assert_eq!(status, 200);
    let url = json["authorization_url"].as_str().unwrap();
    assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
    assert!(url.contains("code_challenge_method=S256"));
    assert!(!json["state"].as_str().unwrap().is_empty());

    // A pending handshake now exists for the callback to consume
    assert_eq!(gateway.oauth().handshake_store().pending_count(), 1);
}

#[tokio::test]
async fn test_login_with_unknown_provider_is_rejected() {
    let (gateway, config) = build_gateway(&[TestUpstream::new("trading")]);
    let app = build_router(&gateway, &config);

    let (status, _, json) = post_json(
        &app,
        "/oauth/login",
        json!({ "provider": "okta", "redirect_uri": "https://app.example.com/cb" }),
        None,
    )
    .await;

    assert_eq!(status, 400);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_callback_with_forged_state_is_unauthorized() {
    let (gateway, config) = build_gateway(&[TestUpstream::new("trading")]);
    let app = build_router(&gateway, &config);

    // A legitimate handshake exists, but the callback presents another state
    post_json(
        &app,
        "/oauth/login",
        json!({ "provider": "google", "redirect_uri": "https://app.example.com/cb" }),
        None,
    )
    .await;

    let (status, _, json) = post_json(
        &app,
        "/oauth/callback",
        json!({ "provider": "google", "code": "valid-looking-code", "state": "forged" }),
        None,
    )
    .await;

    assert_eq!(status, 401);
    assert_eq!(json["error"], "auth_error");
}

#[tokio::test]
async fn test_state_mismatch_is_audited_as_csrf_at_critical_severity() {
    let (gateway, config) = build_gateway(&[TestUpstream::new("trading")]);
    let app = build_router(&gateway, &config);

    post_json(
        &app,
        "/oauth/callback",
        json!({ "provider": "google", "code": "code", "state": "forged" }),
        None,
    )
    .await;

    let events = gateway.audit().query(&AuditQuery::default());
    let callback_failures: Vec<_> = events
        .iter()
        .filter(|event| event.action == "oauth.callback" && event.outcome == Outcome::Failure)
        .collect();
    assert_eq!(callback_failures.len(), 1);
    assert_eq!(callback_failures[0].severity, Severity::Critical);
    assert!(callback_failures[0]
        .detail
        .as_deref()
        .unwrap()
        .contains("state_mismatch"));
}

#[tokio::test]
async fn test_state_is_never_usable_twice() {
    // Token endpoint pointed at a closed local port: the exchange step fails
    // fast without real provider traffic
    let yaml = r#"
oauth:
  jwt_secret: "test-secret"
  providers:
    google:
      client_id: "cid"
      client_secret: "csecret"
      token_url: "http://127.0.0.1:9/token"
"#;
    let (gateway, _config) =
        super::test_harness::build_gateway_with_config(yaml, &[TestUpstream::new("trading")]);

    let initiation = gateway
        .oauth()
        .initiate_login("google", "https://app.example.com/cb")
        .unwrap();

    // First presentation consumes the handshake (and proceeds to the token
    // exchange, which fails here because there is no provider to talk to)
    let first = gateway
        .oauth()
        .complete_login("google", "code", &initiation.state, 1_000)
        .await;
    assert!(first.is_err());

    // Second presentation of the same state is a hard mismatch
    let second = gateway
        .oauth()
        .complete_login("google", "code", &initiation.state, 1_001)
        .await
        .unwrap_err();
    assert!(matches!(second, torii::oauth::OauthError::StateMismatch));
}

#[tokio::test]
async fn test_bearer_of_revoked_session_is_rejected() {
    let (gateway, config) = build_gateway(&[TestUpstream::new("trading")]);
    let app = build_router(&gateway, &config);
    let token = login(&gateway, "u1").await;

    // Logout deletes the local session regardless of provider revocation
    let (status, _, json) = post_json(
        &app,
        "/oauth/logout",
        json!({ "provider": "google", "access_token": token }),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["success"], true);
    assert_eq!(json["provider_revoked"], false);

    // The JWT is still cryptographically valid, but its session is gone
    let body = json!({ "service": "trading", "operation": "get_portfolio", "data": {} });
    let (status, _, json) = post_json(&app, "/bff/request", body, Some(&token)).await;
    assert_eq!(status, 401);
    assert_eq!(json["error"], "auth_error");
}

#[tokio::test]
async fn test_health_lists_configured_providers() {
    let (gateway, config) = build_gateway(&[TestUpstream::new("trading")]);
    let app = build_router(&gateway, &config);

    let (status, _, json) = get_json(&app, "/bff/health").await;
    assert_eq!(status, 200);
    assert_eq!(json["oauth_providers"], json!(["google"]));
}
