// Unit tests for the gateway error taxonomy

use std::time::Duration;
use torii::error::GatewayError;

#[test]
fn test_every_kind_has_a_distinct_status() {
    let errors = [
        GatewayError::RateLimitExceeded {
            route_class: "default".to_string(),
            limit: 100,
            retry_after: Duration::from_secs(1),
        },
        GatewayError::CircuitOpen {
            service: "risk".to_string(),
            retry_after: Duration::from_secs(30),
        },
        GatewayError::Auth("expired token".to_string()),
        GatewayError::Validation("missing field".to_string()),
        GatewayError::UpstreamTimeout {
            service: "trading".to_string(),
        },
        GatewayError::Upstream {
            service: "compliance".to_string(),
        },
        GatewayError::Internal("oops".to_string()),
    ];

    let statuses: Vec<u16> = errors.iter().map(|e| e.status_code()).collect();
    assert_eq!(statuses, vec![429, 503, 401, 400, 504, 502, 500]);

    // Kind names are unique and stable
    let mut kinds: Vec<&str> = errors.iter().map(|e| e.kind()).collect();
    kinds.sort();
    kinds.dedup();
    assert_eq!(kinds.len(), errors.len());
}

#[test]
fn test_admission_errors_carry_positive_retry_after() {
    let rate = GatewayError::RateLimitExceeded {
        route_class: "trade-submit".to_string(),
        limit: 5,
        retry_after: Duration::from_millis(1),
    };
    assert!(rate.retry_after().unwrap() > Duration::ZERO);

    let open = GatewayError::CircuitOpen {
        service: "risk".to_string(),
        retry_after: Duration::from_secs(30),
    };
    assert!(open.retry_after().unwrap() > Duration::ZERO);

    assert!(GatewayError::Internal("x".to_string()).retry_after().is_none());
    assert!(GatewayError::UpstreamTimeout {
        service: "iot".to_string()
    }
    .retry_after()
    .is_none());
}

#[test]
fn test_display_messages_name_the_subject_not_the_internals() {
    let err = GatewayError::UpstreamTimeout {
        service: "trading".to_string(),
    };
    assert_eq!(err.to_string(), "Upstream 'trading' timed out");

    let err = GatewayError::CircuitOpen {
        service: "risk".to_string(),
        retry_after: Duration::from_secs(30),
    };
    assert!(err.to_string().contains("temporarily unavailable"));
}

#[test]
fn test_error_implements_std_error() {
    let err: Box<dyn std::error::Error> = Box::new(GatewayError::Internal("x".to_string()));
    assert!(err.source().is_none());
}
