// Integration tests for shared-state safety under concurrent load

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use torii::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig};
use torii::config::WebSocketConfigYaml;
use torii::metrics::Metrics;
use torii::rate_limit::{RateLimitAlgorithm, RateLimitManager, RateLimitPolicy};
use torii::ws::{ServerMessage, SessionManager};

#[tokio::test]
async fn test_concurrent_admits_never_exceed_the_limit() {
    let mut policies = HashMap::new();
    policies.insert(
        "class".to_string(),
        RateLimitPolicy {
            algorithm: RateLimitAlgorithm::FixedWindow,
            limit: 50,
            window: Duration::from_secs(60),
            ..Default::default()
        },
    );
    let manager = Arc::new(RateLimitManager::new(RateLimitPolicy::default(), policies));

    // 20 tasks x 10 admits against one bucket: exactly 50 may pass. The
    // pinned clock keeps every admit inside one window.
    let now = 1_700_000_040_000;
    let mut handles = Vec::new();
    for _ in 0..20 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            let mut admitted = 0;
            for _ in 0..10 {
                if manager.check("u1", "class", now).allowed {
                    admitted += 1;
                }
            }
            admitted
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    assert_eq!(total, 50, "first-committed-wins must cap at the limit exactly");
}

#[tokio::test]
async fn test_concurrent_callers_race_for_a_single_trial_slot() {
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 1,
        cooldown: Duration::from_millis(10),
        cooldown_multiplier: 2.0,
        max_cooldown: Duration::from_secs(1),
    }));
    breaker.record_failure(1_000);

    // Well past the cooldown: many concurrent checkers, one trial
    let mut handles = Vec::new();
    for _ in 0..32 {
        let breaker = Arc::clone(&breaker);
        handles.push(tokio::spawn(async move { breaker.check(5_000) }));
    }

    let mut trials = 0;
    let mut rejections = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Admission::AllowedTrial => trials += 1,
            Admission::Rejected => rejections += 1,
            Admission::Allowed => panic!("circuit cannot be closed here"),
        }
    }
    assert_eq!(trials, 1, "exactly one caller wins the half-open trial");
    assert_eq!(rejections, 31);
}

#[tokio::test]
async fn test_concurrent_failure_counting_is_exact() {
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: 1_000,
        cooldown: Duration::from_secs(60),
        cooldown_multiplier: 2.0,
        max_cooldown: Duration::from_secs(600),
    }));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let breaker = Arc::clone(&breaker);
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                breaker.record_failure(1_000);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(breaker.failure_count(), 500);
}

#[tokio::test]
async fn test_connection_registry_survives_concurrent_churn() {
    let manager = Arc::new(SessionManager::new(
        &WebSocketConfigYaml::default(),
        Arc::new(Metrics::new()),
    ));

    // Register, fan out, and unregister from many tasks at once
    let mut handles = Vec::new();
    for task in 0..16 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            let user = format!("user-{}", task % 4);
            for i in 0..25 {
                let handle = manager.register(&user, "sess", "corr");
                manager.send_to_user(
                    &user,
                    &ServerMessage::MarketUpdate {
                        symbol: format!("S{}", i),
                        data: json!({}),
                    },
                );
                manager.unregister(&handle.connection_id);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(manager.connection_count(), 0);
    for task in 0..4 {
        assert!(manager
            .connections_for_user(&format!("user-{}", task))
            .is_empty());
    }
}

#[tokio::test]
async fn test_distinct_buckets_progress_independently() {
    let manager = Arc::new(RateLimitManager::new(
        RateLimitPolicy {
            algorithm: RateLimitAlgorithm::TokenBucket,
            capacity: 5,
            refill_rate: 0.001, // effectively no refill during the test
            ..Default::default()
        },
        HashMap::new(),
    ));

    let mut handles = Vec::new();
    for user in 0..8 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            let identity = format!("user-{}", user);
            let admitted = (0..10)
                .filter(|_| manager.admit(&identity, "any").allowed)
                .count();
            admitted
        }));
    }

    for handle in handles {
        // Each identity gets its own full budget of 5
        assert_eq!(handle.await.unwrap(), 5);
    }
    assert_eq!(manager.tracked_bucket_count(), 8);
}
