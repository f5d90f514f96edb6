// Integration tests for the WebSocket session manager and push channel

use serde_json::json;

use super::test_harness::{build_gateway, build_router, login, post_json, TestUpstream};
use torii::ws::messages::{ServerMessage, TOPIC_MARKET_DATA};
use torii::ws::ReconnectPolicy;

#[tokio::test]
async fn test_request_result_is_pushed_to_all_user_connections() {
    let trading = TestUpstream::new("trading");
    let (gateway, config) = build_gateway(&[trading]);
    let app = build_router(&gateway, &config);
    let token = login(&gateway, "u1").await;

    // Two tabs for u1, one for another user
    let tab_a = gateway.ws().register("u1", "sess-u1", "corr-a");
    let tab_b = gateway.ws().register("u1", "sess-u1", "corr-b");
    let other = gateway.ws().register("u2", "sess-u2", "corr-c");

    let body = json!({ "service": "trading", "operation": "get_portfolio", "data": {} });
    let (status, headers, _) = post_json(&app, "/bff/request", body, Some(&token)).await;
    assert_eq!(status, 200);
    let correlation_id = headers.get("x-correlation-id").unwrap().to_str().unwrap();

    for tab in [&tab_a, &tab_b] {
        match tab.mailbox().recv().await {
            Some(ServerMessage::ServiceUpdate {
                service,
                correlation_id: pushed,
                ..
            }) => {
                assert_eq!(service, "trading");
                // The push carries the originating request's correlation id
                assert_eq!(pushed, correlation_id);
            }
            other => panic!("expected service update, got {:?}", other),
        }
    }
    assert!(other.mailbox().is_empty());
}

#[tokio::test]
async fn test_slow_consumer_drops_oldest_without_blocking_fanout() {
    // Harness config caps outbound queues at 8
    let (gateway, _config) = build_gateway(&[TestUpstream::new("trading")]);
    let slow = gateway.ws().register("u1", "sess-1", "corr-1");
    let fast = gateway.ws().register("u1", "sess-2", "corr-2");

    // Drain nothing from `slow`; push 12 updates
    for i in 0..12 {
        let delivered = gateway.ws().send_to_user(
            "u1",
            &ServerMessage::MarketUpdate {
                symbol: format!("SYM{}", i),
                data: json!({}),
            },
        );
        assert_eq!(delivered, 2, "fanout never skips or blocks");
    }

    // The slow consumer kept only the newest 8; oldest 4 were dropped
    assert_eq!(slow.mailbox().len(), 8);
    match slow.mailbox().recv().await {
        Some(ServerMessage::MarketUpdate { symbol, .. }) => assert_eq!(symbol, "SYM4"),
        other => panic!("unexpected message: {:?}", other),
    }
    assert_eq!(fast.mailbox().len(), 8); // also un-drained, same policy

    let exported = gateway.metrics().export_prometheus();
    assert!(exported.contains("torii_ws_messages_dropped_total 8"));
}

#[tokio::test]
async fn test_eviction_removes_connection_from_fanout() {
    let (gateway, _config) = build_gateway(&[TestUpstream::new("trading")]);
    let stale = gateway.ws().register_at("u1", "sess-1", "corr-1", 1_000);
    let live = gateway.ws().register_at("u1", "sess-2", "corr-2", 1_000);

    // 30s interval x 3 misses = 90s threshold; only `live` keeps ponging
    live.touch(100_000);
    let evicted = gateway.ws().evict_stale(100_000);
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].connection_id, stale.connection_id);

    let delivered = gateway.ws().send_to_user(
        "u1",
        &ServerMessage::PortfolioUpdate {
            user_id: "u1".to_string(),
            data: json!({}),
        },
    );
    assert_eq!(delivered, 1);

    // The evicted connection's mailbox is closed: pushes are discarded
    assert_eq!(stale.mailbox().push(ServerMessage::Ping), 1);
}

#[tokio::test]
async fn test_topic_broadcast_respects_subscriptions() {
    let (gateway, _config) = build_gateway(&[TestUpstream::new("trading")]);
    let subscriber = gateway.ws().register("u1", "sess-1", "corr-1");
    let bystander = gateway.ws().register("u2", "sess-2", "corr-2");

    gateway
        .ws()
        .subscribe(&subscriber.connection_id, TOPIC_MARKET_DATA);

    let delivered = gateway.ws().broadcast_topic(
        TOPIC_MARKET_DATA,
        &ServerMessage::MarketUpdate {
            symbol: "AAPL".to_string(),
            data: json!({ "price": 187.2 }),
        },
    );

    assert_eq!(delivered, 1);
    assert_eq!(subscriber.mailbox().len(), 1);
    assert!(bystander.mailbox().is_empty());
}

#[test]
fn test_reconnect_schedule_matches_contract() {
    // 1s, 2s, 4s, 8s, 16s; a sixth automatic attempt never happens
    let policy = ReconnectPolicy::default();
    let schedule: Vec<u64> = policy
        .schedule()
        .iter()
        .map(|delay| delay.as_secs())
        .collect();
    assert_eq!(schedule, vec![1, 2, 4, 8, 16]);
    assert!(policy.delay_for(6).is_none());
}
