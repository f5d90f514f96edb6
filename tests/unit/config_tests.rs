// Unit tests for configuration loading and validation

use torii::config::Config;

fn parse(yaml: &str) -> Config {
    Config::from_yaml_with_env(yaml).expect("config should parse")
}

#[test]
fn test_minimal_config_is_valid() {
    let config = parse("{}");
    config.validate().expect("empty config should validate");
    assert_eq!(config.server.address, "0.0.0.0");
    assert_eq!(config.server.port, 8080);
}

#[test]
fn test_rate_limit_algorithms_parse_by_name() {
    let config = parse(
        r#"
rate_limit:
  route_classes:
    a: { algorithm: fixed_window }
    b: { algorithm: sliding_window }
    c: { algorithm: token_bucket }
    d: { algorithm: leaky_bucket }
"#,
    );
    config.validate().unwrap();
    assert_eq!(config.rate_limit.route_classes.len(), 4);
}

#[test]
fn test_unknown_algorithm_is_a_parse_error() {
    let result = Config::from_yaml_with_env(
        r#"
rate_limit:
  route_classes:
    a: { algorithm: magic_window }
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_per_service_breaker_defaults_from_spec_profile() {
    let config = parse(
        r#"
circuit_breakers:
  services:
    trading: { failure_threshold: 3, cooldown_secs: 30 }
    risk: { failure_threshold: 5, cooldown_secs: 60 }
    compliance: { failure_threshold: 10, cooldown_secs: 120 }
    iot: { failure_threshold: 8, cooldown_secs: 45 }
"#,
    );
    config.validate().unwrap();

    let services = config.circuit_breakers.to_service_configs();
    assert_eq!(services["trading"].failure_threshold, 3);
    assert_eq!(services["iot"].cooldown.as_secs(), 45);
    // Unlisted fields fall back to their defaults
    assert_eq!(services["trading"].max_cooldown.as_secs(), 600);
}

#[test]
fn test_oauth_validation_is_reached_from_root() {
    let config = parse(
        r#"
oauth:
  providers:
    google: { client_id: "cid", client_secret: "" }
  jwt_secret: "s"
"#,
    );
    let err = config.validate().unwrap_err();
    assert!(err.contains("client_secret"));
}

#[test]
fn test_upstream_entries_round_trip() {
    let config = parse(
        r#"
upstreams:
  trading: { base_url: "http://trading:8081" }
  risk: { base_url: "http://risk:8082", timeout_ms: 1500 }
  compliance: { base_url: "http://compliance:8083" }
  iot: { base_url: "http://iot:8084" }
"#,
    );
    config.validate().unwrap();
    assert_eq!(config.upstreams.len(), 4);
    assert_eq!(config.upstreams["risk"].timeout_ms, 1500);
    assert_eq!(config.upstreams["trading"].timeout_ms, 5000);
}

#[test]
fn test_websocket_and_audit_sections_validate() {
    let config = parse(
        r#"
websocket:
  ping_interval_secs: 15
  outbound_capacity: 32
audit:
  file_path: "/tmp/torii-audit.jsonl"
  recent_capacity: 1000
"#,
    );
    config.validate().unwrap();
    assert_eq!(config.websocket.ping_interval_secs, 15);
    assert_eq!(config.audit.recent_capacity, 1000);
}

#[test]
fn test_invalid_subsections_fail_validation_not_parsing() {
    let config = parse(
        r#"
websocket:
  outbound_capacity: 0
"#,
    );
    assert!(config.validate().is_err());
}
