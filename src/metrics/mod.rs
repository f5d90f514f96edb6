// Metrics module - Prometheus-compatible metrics tracking
// Provides counters and gauges for observability

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

/// Metrics struct tracks counters and gauges for Prometheus export
/// Thread-safe via atomic operations and mutexes
pub struct Metrics {
    // Request counters
    request_count: AtomicU64,

    // Status code counters (e.g., 200, 429, 503)
    status_counts: Mutex<HashMap<u16, u64>>,

    // Per-service request counters
    service_counts: Mutex<HashMap<String, u64>>,

    // Rate limiting rejections per route class
    rate_limit_rejections: Mutex<HashMap<String, u64>>,

    // Circuit breaker metrics
    circuit_open_rejections: Mutex<HashMap<String, u64>>,
    circuit_transitions: Mutex<HashMap<String, u64>>,

    // Authentication metrics
    auth_success: AtomicU64,
    auth_failure: AtomicU64,
    token_refreshes: AtomicU64,

    // Upstream metrics
    upstream_timeouts: Mutex<HashMap<String, u64>>,

    // WebSocket metrics
    ws_connections: AtomicI64,
    ws_messages_dropped: AtomicU64,
    ws_evictions: AtomicU64,

    // Audit metrics
    audit_events: AtomicU64,
    audit_retry_buffered: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            status_counts: Mutex::new(HashMap::new()),
            service_counts: Mutex::new(HashMap::new()),
            rate_limit_rejections: Mutex::new(HashMap::new()),
            circuit_open_rejections: Mutex::new(HashMap::new()),
            circuit_transitions: Mutex::new(HashMap::new()),
            auth_success: AtomicU64::new(0),
            auth_failure: AtomicU64::new(0),
            token_refreshes: AtomicU64::new(0),
            upstream_timeouts: Mutex::new(HashMap::new()),
            ws_connections: AtomicI64::new(0),
            ws_messages_dropped: AtomicU64::new(0),
            ws_evictions: AtomicU64::new(0),
            audit_events: AtomicU64::new(0),
            audit_retry_buffered: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self, service: &str, status: u16) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut counts) = self.status_counts.lock() {
            *counts.entry(status).or_insert(0) += 1;
        }
        if let Ok(mut counts) = self.service_counts.lock() {
            *counts.entry(service.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_rate_limit_rejection(&self, route_class: &str) {
        if let Ok(mut counts) = self.rate_limit_rejections.lock() {
            *counts.entry(route_class.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_circuit_open_rejection(&self, service: &str) {
        if let Ok(mut counts) = self.circuit_open_rejections.lock() {
            *counts.entry(service.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_circuit_transition(&self, service: &str) {
        if let Ok(mut counts) = self.circuit_transitions.lock() {
            *counts.entry(service.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_auth_success(&self) {
        self.auth_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_token_refresh(&self) {
        self.token_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_timeout(&self, service: &str) {
        if let Ok(mut counts) = self.upstream_timeouts.lock() {
            *counts.entry(service.to_string()).or_insert(0) += 1;
        }
    }

    pub fn ws_connection_opened(&self) {
        self.ws_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ws_connection_closed(&self) {
        self.ws_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_ws_messages_dropped(&self, count: u64) {
        self.ws_messages_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_ws_eviction(&self) {
        self.ws_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_event(&self) {
        self.audit_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_retry_buffered(&self) {
        self.audit_retry_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn active_ws_connections(&self) -> i64 {
        self.ws_connections.load(Ordering::Relaxed)
    }

    /// Export all metrics in Prometheus text exposition format
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP torii_requests_total Total BFF requests processed\n");
        out.push_str("# TYPE torii_requests_total counter\n");
        out.push_str(&format!(
            "torii_requests_total {}\n",
            self.request_count.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP torii_requests_by_status_total Requests by HTTP status code\n");
        out.push_str("# TYPE torii_requests_by_status_total counter\n");
        if let Ok(counts) = self.status_counts.lock() {
            let mut entries: Vec<_> = counts.iter().collect();
            entries.sort_by_key(|(status, _)| **status);
            for (status, count) in entries {
                out.push_str(&format!(
                    "torii_requests_by_status_total{{status=\"{}\"}} {}\n",
                    status, count
                ));
            }
        }

        out.push_str("# HELP torii_requests_by_service_total Requests by upstream service\n");
        out.push_str("# TYPE torii_requests_by_service_total counter\n");
        if let Ok(counts) = self.service_counts.lock() {
            let mut entries: Vec<_> = counts.iter().collect();
            entries.sort_by_key(|(service, _)| service.as_str().to_string());
            for (service, count) in entries {
                out.push_str(&format!(
                    "torii_requests_by_service_total{{service=\"{}\"}} {}\n",
                    service, count
                ));
            }
        }

        out.push_str("# HELP torii_rate_limit_rejections_total Rate limit rejections by route class\n");
        out.push_str("# TYPE torii_rate_limit_rejections_total counter\n");
        if let Ok(counts) = self.rate_limit_rejections.lock() {
            for (route, count) in counts.iter() {
                out.push_str(&format!(
                    "torii_rate_limit_rejections_total{{route_class=\"{}\"}} {}\n",
                    route, count
                ));
            }
        }

        out.push_str("# HELP torii_circuit_open_rejections_total Fast-fail rejections by service\n");
        out.push_str("# TYPE torii_circuit_open_rejections_total counter\n");
        if let Ok(counts) = self.circuit_open_rejections.lock() {
            for (service, count) in counts.iter() {
                out.push_str(&format!(
                    "torii_circuit_open_rejections_total{{service=\"{}\"}} {}\n",
                    service, count
                ));
            }
        }

        out.push_str("# HELP torii_circuit_transitions_total Circuit state transitions by service\n");
        out.push_str("# TYPE torii_circuit_transitions_total counter\n");
        if let Ok(counts) = self.circuit_transitions.lock() {
            for (service, count) in counts.iter() {
                out.push_str(&format!(
                    "torii_circuit_transitions_total{{service=\"{}\"}} {}\n",
                    service, count
                ));
            }
        }

        out.push_str("# HELP torii_upstream_timeouts_total Upstream call timeouts by service\n");
        out.push_str("# TYPE torii_upstream_timeouts_total counter\n");
        if let Ok(counts) = self.upstream_timeouts.lock() {
            for (service, count) in counts.iter() {
                out.push_str(&format!(
                    "torii_upstream_timeouts_total{{service=\"{}\"}} {}\n",
                    service, count
                ));
            }
        }

        out.push_str("# HELP torii_auth_success_total Successful authentications\n");
        out.push_str("# TYPE torii_auth_success_total counter\n");
        out.push_str(&format!(
            "torii_auth_success_total {}\n",
            self.auth_success.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP torii_auth_failure_total Failed authentications\n");
        out.push_str("# TYPE torii_auth_failure_total counter\n");
        out.push_str(&format!(
            "torii_auth_failure_total {}\n",
            self.auth_failure.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP torii_token_refreshes_total Transparent token refreshes\n");
        out.push_str("# TYPE torii_token_refreshes_total counter\n");
        out.push_str(&format!(
            "torii_token_refreshes_total {}\n",
            self.token_refreshes.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP torii_ws_connections Active WebSocket connections\n");
        out.push_str("# TYPE torii_ws_connections gauge\n");
        out.push_str(&format!(
            "torii_ws_connections {}\n",
            self.ws_connections.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP torii_ws_messages_dropped_total Messages dropped by backpressure\n");
        out.push_str("# TYPE torii_ws_messages_dropped_total counter\n");
        out.push_str(&format!(
            "torii_ws_messages_dropped_total {}\n",
            self.ws_messages_dropped.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP torii_ws_evictions_total Connections evicted for missed heartbeats\n");
        out.push_str("# TYPE torii_ws_evictions_total counter\n");
        out.push_str(&format!(
            "torii_ws_evictions_total {}\n",
            self.ws_evictions.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP torii_audit_events_total Audit events recorded\n");
        out.push_str("# TYPE torii_audit_events_total counter\n");
        out.push_str(&format!(
            "torii_audit_events_total {}\n",
            self.audit_events.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP torii_audit_retry_buffered_total Audit events buffered for sink retry\n");
        out.push_str("# TYPE torii_audit_retry_buffered_total counter\n");
        out.push_str(&format!(
            "torii_audit_retry_buffered_total {}\n",
            self.audit_retry_buffered.load(Ordering::Relaxed)
        ));

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
