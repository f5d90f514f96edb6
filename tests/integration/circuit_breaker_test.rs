// Integration tests for failure isolation through the full pipeline

use serde_json::json;
use std::time::Duration;

use super::test_harness::{build_gateway, build_router, login, post_json, TestUpstream, UpstreamMode};

fn risk_body() -> serde_json::Value {
    json!({ "service": "risk", "operation": "score", "data": {} })
}

#[tokio::test]
async fn test_breaker_opens_after_three_failures_and_fails_fast() {
    // risk: threshold 3, cooldown 1s (harness config)
    let risk = TestUpstream::new("risk");
    risk.set_mode(UpstreamMode::Fail);
    let (gateway, config) = build_gateway(&[risk.clone()]);
    let app = build_router(&gateway, &config);
    let token = login(&gateway, "u1").await;

    for _ in 0..3 {
        let (status, _, json) = post_json(&app, "/bff/request", risk_body(), Some(&token)).await;
        assert_eq!(status, 502);
        assert_eq!(json["error"], "upstream_error");
    }
    assert_eq!(risk.call_count(), 3);

    // Fourth call: fail fast, no upstream I/O, distinct error kind
    let (status, headers, json) = post_json(&app, "/bff/request", risk_body(), Some(&token)).await;
    assert_eq!(status, 503);
    assert_eq!(json["error"], "circuit_open");
    assert!(headers.get("retry-after").is_some());
    assert_eq!(risk.call_count(), 3);
}

#[tokio::test]
async fn test_breaker_recovers_through_half_open_trial() {
    let risk = TestUpstream::new("risk");
    risk.set_mode(UpstreamMode::Fail);
    let (gateway, config) = build_gateway(&[risk.clone()]);
    let app = build_router(&gateway, &config);
    let token = login(&gateway, "u1").await;

    for _ in 0..3 {
        post_json(&app, "/bff/request", risk_body(), Some(&token)).await;
    }
    assert_eq!(risk.call_count(), 3);

    // Upstream recovers while the circuit is open
    risk.set_mode(UpstreamMode::Succeed);
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    // First call after the cooldown is the trial and reaches the upstream
    let (status, _, json) = post_json(&app, "/bff/request", risk_body(), Some(&token)).await;
    assert_eq!(status, 200);
    assert_eq!(json["success"], true);
    assert_eq!(risk.call_count(), 4);

    // Circuit is closed again
    let (status, _, _) = post_json(&app, "/bff/request", risk_body(), Some(&token)).await;
    assert_eq!(status, 200);
    assert_eq!(risk.call_count(), 5);
}

#[tokio::test]
async fn test_failed_trial_reopens_with_extended_cooldown() {
    let risk = TestUpstream::new("risk");
    risk.set_mode(UpstreamMode::Fail);
    let (gateway, config) = build_gateway(&[risk.clone()]);
    let app = build_router(&gateway, &config);
    let token = login(&gateway, "u1").await;

    for _ in 0..3 {
        post_json(&app, "/bff/request", risk_body(), Some(&token)).await;
    }

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    // The trial fails and the circuit reopens
    let (status, _, _) = post_json(&app, "/bff/request", risk_body(), Some(&token)).await;
    assert_eq!(status, 502);
    assert_eq!(risk.call_count(), 4);

    // Cooldown doubled to 2s: after only 1.1s the circuit is still open
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let (status, _, json) = post_json(&app, "/bff/request", risk_body(), Some(&token)).await;
    assert_eq!(status, 503);
    assert_eq!(json["error"], "circuit_open");
    assert_eq!(risk.call_count(), 4);
}

#[tokio::test]
async fn test_timeouts_count_toward_the_breaker() {
    let risk = TestUpstream::new("risk");
    risk.set_mode(UpstreamMode::Timeout);
    let (gateway, config) = build_gateway(&[risk.clone()]);
    let app = build_router(&gateway, &config);
    let token = login(&gateway, "u1").await;

    for _ in 0..3 {
        let (status, _, json) = post_json(&app, "/bff/request", risk_body(), Some(&token)).await;
        assert_eq!(status, 504);
        assert_eq!(json["error"], "upstream_timeout");
    }

    let (status, _, _) = post_json(&app, "/bff/request", risk_body(), Some(&token)).await;
    assert_eq!(status, 503);
    assert_eq!(risk.call_count(), 3);

    let exported = gateway.metrics().export_prometheus();
    assert!(exported.contains("torii_upstream_timeouts_total{service=\"risk\"} 3"));
}

#[tokio::test]
async fn test_breakers_are_isolated_per_upstream() {
    let risk = TestUpstream::new("risk");
    let trading = TestUpstream::new("trading");
    risk.set_mode(UpstreamMode::Fail);
    let (gateway, config) = build_gateway(&[risk.clone(), trading.clone()]);
    let app = build_router(&gateway, &config);
    let token = login(&gateway, "u1").await;

    for _ in 0..3 {
        post_json(&app, "/bff/request", risk_body(), Some(&token)).await;
    }
    let (status, _, _) = post_json(&app, "/bff/request", risk_body(), Some(&token)).await;
    assert_eq!(status, 503);

    // Trading is unaffected by risk's open circuit
    let body = json!({ "service": "trading", "operation": "get_portfolio", "data": {} });
    let (status, _, _) = post_json(&app, "/bff/request", body, Some(&token)).await;
    assert_eq!(status, 200);
    assert_eq!(trading.call_count(), 1);
}
