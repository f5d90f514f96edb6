// Integration tests for the security screen and response headers

use axum::body::Body;
use axum::http::Request;
use serde_json::json;
use tower::ServiceExt;

use super::test_harness::{build_gateway, build_router, get_json, TestUpstream};

#[tokio::test]
async fn test_every_response_carries_security_headers() {
    let (gateway, config) = build_gateway(&[TestUpstream::new("trading")]);
    let app = build_router(&gateway, &config);

    let (_, headers, _) = get_json(&app, "/bff/health").await;
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers
        .get("strict-transport-security")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("max-age="));
    assert!(headers.get("referrer-policy").is_some());
    assert!(headers.get("x-correlation-id").is_some());
}

#[tokio::test]
async fn test_caller_supplied_correlation_id_is_propagated() {
    let (gateway, config) = build_gateway(&[TestUpstream::new("trading")]);
    let app = build_router(&gateway, &config);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/bff/health")
                .header("x-correlation-id", "client-supplied-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers().get("x-correlation-id").unwrap(),
        "client-supplied-123"
    );
}

#[tokio::test]
async fn test_scanner_user_agents_are_blocked() {
    let (gateway, config) = build_gateway(&[TestUpstream::new("trading")]);
    let app = build_router(&gateway, &config);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/bff/health")
                .header("user-agent", "sqlmap/1.7-dev (https://sqlmap.org)")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_oversized_uri_is_rejected() {
    let yaml = r#"
server:
  security_limits:
    max_uri_length: 64
oauth:
  jwt_secret: "test-secret"
"#;
    let (gateway, config) =
        super::test_harness::build_gateway_with_config(yaml, &[TestUpstream::new("trading")]);
    let app = build_router(&gateway, &config);

    let long_query = format!("/bff/health?padding={}", "x".repeat(100));
    let response = app
        .clone()
        .oneshot(Request::builder().uri(long_query).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), 414);
}

#[tokio::test]
async fn test_normal_browser_traffic_passes_the_screen() {
    let (gateway, config) = build_gateway(&[TestUpstream::new("trading")]);
    let app = build_router(&gateway, &config);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/oauth/login")
                .header("content-type", "application/json")
                .header(
                    "user-agent",
                    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
                )
                .body(Body::from(
                    json!({ "provider": "google", "redirect_uri": "https://app/cb" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}
