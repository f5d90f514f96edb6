//! Audit Logging Module
//!
//! Structured, correlated event emission for every security- and
//! compliance-relevant action the gateway takes. Events are append-only and
//! dual-written: an in-memory recent-events store answers low-latency
//! queries (alerting, incident triage), a JSON-lines file is the durable
//! compliance record.
//!
//! Recording is synchronous in the request path and never drops: if the
//! durable sink fails, the event is buffered in a retry queue drained by a
//! background task. Every event carries the correlation id of the request
//! that caused it and a SHA-256 integrity hash over its payload.

mod sink;

pub use sink::{AuditSink, FileSink, SinkError};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::constants::DEFAULT_AUDIT_RETRY_INTERVAL_SECS;
use crate::metrics::Metrics;

/// How the audited operation ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    /// The caller cancelled before the operation completed
    Aborted,
}

/// Event severity, used for alerting thresholds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// One audit event; never mutated after emission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id (UUID)
    pub id: String,

    /// Emission timestamp (RFC3339)
    pub timestamp: DateTime<Utc>,

    /// Acting identity; "anonymous" when no identity was resolved
    pub actor: String,

    /// What was attempted (e.g. "oauth.login", "bff.request")
    pub action: String,

    /// What it was attempted against (e.g. "trading/submit_order")
    pub resource: String,

    pub outcome: Outcome,

    /// Correlation id propagated from the originating request
    pub correlation_id: String,

    /// Jurisdiction tag for compliance reporting (e.g. "us", "eu")
    pub jurisdiction: String,

    #[serde(default)]
    pub severity: Severity,

    /// Sanitized detail; raw upstream bodies land here, never at the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// SHA-256 over the payload fields, hex encoded
    pub integrity_hash: String,
}

impl AuditEvent {
    /// Create an event with required fields; severity defaults to medium
    pub fn new(
        actor: &str,
        action: &str,
        resource: &str,
        outcome: Outcome,
        correlation_id: &str,
        jurisdiction: &str,
    ) -> Self {
        let mut event = Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            outcome,
            correlation_id: correlation_id.to_string(),
            jurisdiction: jurisdiction.to_string(),
            severity: Severity::default(),
            detail: None,
            integrity_hash: String::new(),
        };
        event.integrity_hash = event.compute_integrity_hash();
        event
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self.integrity_hash = self.compute_integrity_hash();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self.integrity_hash = self.compute_integrity_hash();
        self
    }

    /// SHA-256 over the payload fields in a fixed order
    fn compute_integrity_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(self.actor.as_bytes());
        hasher.update(self.action.as_bytes());
        hasher.update(self.resource.as_bytes());
        hasher.update(format!("{:?}", self.outcome).as_bytes());
        hasher.update(self.correlation_id.as_bytes());
        hasher.update(self.jurisdiction.as_bytes());
        hasher.update(format!("{:?}", self.severity).as_bytes());
        if let Some(detail) = &self.detail {
            hasher.update(detail.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Recompute and compare the integrity hash
    pub fn verify_integrity(&self) -> bool {
        self.integrity_hash == self.compute_integrity_hash()
    }
}

/// Filter for incident reconstruction queries
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub actor: Option<String>,
    pub jurisdiction: Option<String>,
    pub correlation_id: Option<String>,
}

impl AuditQuery {
    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.timestamp > to {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if &event.actor != actor {
                return false;
            }
        }
        if let Some(jurisdiction) = &self.jurisdiction {
            if &event.jurisdiction != jurisdiction {
                return false;
            }
        }
        if let Some(correlation_id) = &self.correlation_id {
            if &event.correlation_id != correlation_id {
                return false;
            }
        }
        true
    }
}

/// The audit logger: bounded recent store + durable sink + retry buffer
pub struct AuditLogger {
    recent: RwLock<VecDeque<AuditEvent>>,
    recent_capacity: usize,
    durable: Box<dyn AuditSink>,
    retry_queue: Mutex<VecDeque<AuditEvent>>,
    metrics: Arc<Metrics>,
    retry_shutdown: Arc<RwLock<Option<oneshot::Sender<()>>>>,
}

impl AuditLogger {
    pub fn new(recent_capacity: usize, durable: Box<dyn AuditSink>, metrics: Arc<Metrics>) -> Self {
        Self {
            recent: RwLock::new(VecDeque::with_capacity(recent_capacity)),
            recent_capacity,
            durable,
            retry_queue: Mutex::new(VecDeque::new()),
            metrics,
            retry_shutdown: Arc::new(RwLock::new(None)),
        }
    }

    /// Record an event: both stores, synchronously, never discarded
    ///
    /// A durable-sink failure buffers the event for the retry task instead
    /// of dropping it.
    pub fn record(&self, event: AuditEvent) {
        self.metrics.record_audit_event();
        {
            let mut recent = self.recent.write();
            if recent.len() >= self.recent_capacity {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        if let Err(e) = self.durable.write(&event) {
            tracing::warn!(
                event_id = event.id.as_str(),
                error = %e,
                "Durable audit sink failed, buffering event for retry"
            );
            self.metrics.record_audit_retry_buffered();
            self.retry_queue.lock().push_back(event);
        }
    }

    /// Query the recent-events store, oldest first
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        self.recent
            .read()
            .iter()
            .filter(|event| query.matches(event))
            .cloned()
            .collect()
    }

    pub fn recent_count(&self) -> usize {
        self.recent.read().len()
    }

    pub fn retry_queue_len(&self) -> usize {
        self.retry_queue.lock().len()
    }

    /// Re-attempt buffered events against the durable sink
    ///
    /// Returns how many were flushed. Events that fail again go back to the
    /// front of the queue in their original order.
    pub fn flush_retry_queue(&self) -> usize {
        let mut pending: VecDeque<AuditEvent> = std::mem::take(&mut *self.retry_queue.lock());
        let total = pending.len();
        let mut flushed = 0;

        while let Some(event) = pending.pop_front() {
            match self.durable.write(&event) {
                Ok(()) => flushed += 1,
                Err(_) => {
                    // Sink still down; put everything back and stop
                    pending.push_front(event);
                    let mut queue = self.retry_queue.lock();
                    while let Some(event) = pending.pop_back() {
                        queue.push_front(event);
                    }
                    break;
                }
            }
        }

        if flushed > 0 {
            tracing::info!(
                flushed = flushed,
                remaining = total - flushed,
                "Flushed buffered audit events to durable sink"
            );
        }
        flushed
    }

    /// Start the background task that drains the retry queue
    pub fn start_retry_task(self: &Arc<Self>, interval: Option<Duration>) {
        let interval =
            interval.unwrap_or(Duration::from_secs(DEFAULT_AUDIT_RETRY_INTERVAL_SECS));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        {
            let mut guard = self.retry_shutdown.write();
            if guard.is_some() {
                tracing::debug!("Audit retry task already running, skipping duplicate start");
                return;
            }
            *guard = Some(shutdown_tx);
        }

        let logger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if logger.retry_queue_len() > 0 {
                            logger.flush_retry_queue();
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Audit retry task shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Stop the background retry task
    pub fn stop_retry_task(&self) {
        if let Some(shutdown_tx) = self.retry_shutdown.write().take() {
            let _ = shutdown_tx.send(());
        }
    }
}
