//! WebSocket Session Manager
//!
//! Connection registry, topic subscriptions, fanout delivery and
//! keepalive/eviction for the gateway's push channel. Each connection owns
//! a bounded outbound mailbox drained by a single writer task, so
//! per-connection order is FIFO and a slow consumer can never wedge a
//! fanout: when its mailbox is full the oldest queued message is dropped
//! and counted, and everyone else is unaffected. No ordering guarantee
//! exists across connections.

pub mod handler;
pub mod messages;
pub mod reconnect;

pub use messages::{ClientMessage, ServerMessage};
pub use reconnect::ReconnectPolicy;

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::WebSocketConfigYaml;
use crate::metrics::Metrics;

#[inline]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Bounded per-connection outbound queue with drop-oldest-on-overflow
pub struct Mailbox {
    queue: Mutex<VecDeque<ServerMessage>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a message; returns the number of messages dropped to make room
    pub fn push(&self, message: ServerMessage) -> usize {
        if self.closed.load(Ordering::Acquire) {
            // Everything sent to a closed mailbox is dropped
            return 1;
        }

        let mut dropped = 0;
        {
            let mut queue = self.queue.lock();
            while queue.len() >= self.capacity {
                queue.pop_front();
                dropped += 1;
            }
            queue.push_back(message);
        }
        self.notify.notify_one();
        dropped
    }

    /// Receive the next message in FIFO order
    ///
    /// Returns `None` once the mailbox is closed and drained.
    pub async fn recv(&self) -> Option<ServerMessage> {
        loop {
            if let Some(message) = self.queue.lock().pop_front() {
                return Some(message);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Close the mailbox; pending messages remain readable
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// One registered connection
pub struct ConnectionHandle {
    pub connection_id: String,
    pub user_id: String,
    pub session_id: String,
    /// Correlation id of the request that opened the connection
    pub correlation_id: String,
    subscriptions: Mutex<HashSet<String>>,
    last_heartbeat_ms: AtomicU64,
    mailbox: Mailbox,
}

impl ConnectionHandle {
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.lock().iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.lock().contains(topic)
    }

    pub fn last_heartbeat_ms(&self) -> u64 {
        self.last_heartbeat_ms.load(Ordering::Relaxed)
    }

    /// Record liveness (called on pong and on any client frame)
    pub fn touch(&self, now: u64) {
        self.last_heartbeat_ms.store(now, Ordering::Relaxed);
    }
}

/// Connection registry with a secondary index by user id
///
/// Connect/disconnect/subscribe arrive concurrently from many connection
/// tasks; both maps sit behind `RwLock`s and are only held for the map
/// operation itself, never across I/O.
pub struct SessionManager {
    connections: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
    by_user: RwLock<HashMap<String, HashSet<String>>>,
    outbound_capacity: usize,
    ping_interval: Duration,
    miss_threshold: u32,
    metrics: Arc<Metrics>,
}

impl SessionManager {
    pub fn new(config: &WebSocketConfigYaml, metrics: Arc<Metrics>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            by_user: RwLock::new(HashMap::new()),
            outbound_capacity: config.outbound_capacity,
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            miss_threshold: config.miss_threshold,
            metrics,
        }
    }

    /// Configured ping cadence; the orchestrator's keepalive loop uses this
    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// Register a new connection under its user id
    pub fn register(
        &self,
        user_id: &str,
        session_id: &str,
        correlation_id: &str,
    ) -> Arc<ConnectionHandle> {
        self.register_at(user_id, session_id, correlation_id, now_ms())
    }

    /// Register at an explicit timestamp (deterministic in tests)
    pub fn register_at(
        &self,
        user_id: &str,
        session_id: &str,
        correlation_id: &str,
        now: u64,
    ) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle {
            connection_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            correlation_id: correlation_id.to_string(),
            subscriptions: Mutex::new(HashSet::new()),
            last_heartbeat_ms: AtomicU64::new(now),
            mailbox: Mailbox::new(self.outbound_capacity),
        });

        self.connections
            .write()
            .insert(handle.connection_id.clone(), Arc::clone(&handle));
        self.by_user
            .write()
            .entry(user_id.to_string())
            .or_default()
            .insert(handle.connection_id.clone());

        self.metrics.ws_connection_opened();
        tracing::info!(
            connection_id = handle.connection_id.as_str(),
            user_id = user_id,
            "WebSocket connection registered"
        );
        handle
    }

    /// Remove a connection from all indices and close its mailbox
    pub fn unregister(&self, connection_id: &str) -> Option<Arc<ConnectionHandle>> {
        let handle = self.connections.write().remove(connection_id)?;

        let mut by_user = self.by_user.write();
        if let Some(ids) = by_user.get_mut(&handle.user_id) {
            ids.remove(connection_id);
            if ids.is_empty() {
                by_user.remove(&handle.user_id);
            }
        }
        drop(by_user);

        handle.mailbox.close();
        self.metrics.ws_connection_closed();
        tracing::info!(
            connection_id = connection_id,
            user_id = handle.user_id.as_str(),
            "WebSocket connection unregistered"
        );
        Some(handle)
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.read().get(connection_id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn connections_for_user(&self, user_id: &str) -> Vec<Arc<ConnectionHandle>> {
        let by_user = self.by_user.read();
        let Some(ids) = by_user.get(user_id) else {
            return Vec::new();
        };
        let connections = self.connections.read();
        ids.iter()
            .filter_map(|id| connections.get(id).cloned())
            .collect()
    }

    /// Subscribe a connection to a topic; returns false for unknown connections
    pub fn subscribe(&self, connection_id: &str, topic: &str) -> bool {
        match self.get(connection_id) {
            Some(handle) => {
                handle.subscriptions.lock().insert(topic.to_string());
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, connection_id: &str, topic: &str) -> bool {
        match self.get(connection_id) {
            Some(handle) => handle.subscriptions.lock().remove(topic),
            None => false,
        }
    }

    /// Fanout to every connection of one user
    ///
    /// Enqueues onto each connection's bounded mailbox and returns how many
    /// connections received the message. Never blocks on a slow consumer;
    /// overflow drops are counted in metrics.
    pub fn send_to_user(&self, user_id: &str, message: &ServerMessage) -> usize {
        let mut delivered = 0;
        for handle in self.connections_for_user(user_id) {
            let dropped = handle.mailbox.push(message.clone());
            if dropped > 0 {
                self.metrics.record_ws_messages_dropped(dropped as u64);
                tracing::debug!(
                    connection_id = handle.connection_id.as_str(),
                    dropped = dropped,
                    "Outbound queue overflow, dropped oldest messages"
                );
            }
            delivered += 1;
        }
        delivered
    }

    /// Fanout to every connection subscribed to a topic
    pub fn broadcast_topic(&self, topic: &str, message: &ServerMessage) -> usize {
        let handles: Vec<Arc<ConnectionHandle>> =
            self.connections.read().values().cloned().collect();

        let mut delivered = 0;
        for handle in handles {
            if !handle.is_subscribed(topic) {
                continue;
            }
            let dropped = handle.mailbox.push(message.clone());
            if dropped > 0 {
                self.metrics.record_ws_messages_dropped(dropped as u64);
            }
            delivered += 1;
        }
        delivered
    }

    /// Send a ping to every connection
    pub fn ping_all(&self) -> usize {
        let handles: Vec<Arc<ConnectionHandle>> =
            self.connections.read().values().cloned().collect();
        for handle in &handles {
            handle.mailbox.push(ServerMessage::Ping);
        }
        handles.len()
    }

    /// Evict connections whose last heartbeat is older than the threshold
    ///
    /// Returns the evicted handles so the caller can emit audit events.
    pub fn evict_stale(&self, now: u64) -> Vec<Arc<ConnectionHandle>> {
        let threshold_ms =
            self.ping_interval.as_millis() as u64 * self.miss_threshold as u64;

        let stale: Vec<String> = self
            .connections
            .read()
            .values()
            .filter(|handle| now.saturating_sub(handle.last_heartbeat_ms()) > threshold_ms)
            .map(|handle| handle.connection_id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for connection_id in stale {
            if let Some(handle) = self.unregister(&connection_id) {
                self.metrics.record_ws_eviction();
                tracing::warn!(
                    connection_id = connection_id.as_str(),
                    user_id = handle.user_id.as_str(),
                    "Evicted WebSocket connection after missed heartbeats"
                );
                evicted.push(handle);
            }
        }
        evicted
    }
}
