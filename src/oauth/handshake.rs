//! Pending login handshake store.
//!
//! A handshake is created when a login is initiated and consumed exactly
//! once by the matching callback. Consumption is an atomic map removal, so
//! a replayed `state` can never resolve twice regardless of timing. Expired
//! entries that were never consumed are swept by a background task.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

use crate::constants::DEFAULT_CLEANUP_INTERVAL_SECS;

#[inline]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One pending login, bound to a `state` token
#[derive(Debug, Clone, PartialEq)]
pub struct OauthHandshake {
    pub state: String,
    pub code_verifier: String,
    pub provider: String,
    pub redirect_uri: String,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

/// Why a handshake could not be consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeError {
    /// No live handshake for this state (unknown or already consumed)
    NotFound,
    /// The handshake existed but its TTL had elapsed
    Expired,
}

/// In-memory store of pending handshakes, keyed by state token
pub struct HandshakeStore {
    inner: Mutex<HashMap<String, OauthHandshake>>,
    ttl: Duration,
    sweep_shutdown: Arc<RwLock<Option<oneshot::Sender<()>>>>,
}

impl HandshakeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
            sweep_shutdown: Arc::new(RwLock::new(None)),
        }
    }

    /// Create and store a handshake, returning it
    pub fn create(&self, provider: &str, redirect_uri: &str, code_verifier: &str) -> OauthHandshake {
        self.create_at(provider, redirect_uri, code_verifier, now_ms())
    }

    /// Create a handshake at an explicit timestamp (deterministic in tests)
    pub fn create_at(
        &self,
        provider: &str,
        redirect_uri: &str,
        code_verifier: &str,
        now: u64,
    ) -> OauthHandshake {
        let handshake = OauthHandshake {
            state: super::pkce::generate_state(),
            code_verifier: code_verifier.to_string(),
            provider: provider.to_string(),
            redirect_uri: redirect_uri.to_string(),
            created_at_ms: now,
            expires_at_ms: now + self.ttl.as_millis() as u64,
        };
        self.inner
            .lock()
            .insert(handshake.state.clone(), handshake.clone());
        handshake
    }

    /// Atomically consume the handshake for `state`
    ///
    /// The entry is removed before the expiry check, so even an expired
    /// state cannot be presented a second time.
    pub fn consume(&self, state: &str, now: u64) -> Result<OauthHandshake, ConsumeError> {
        let handshake = self
            .inner
            .lock()
            .remove(state)
            .ok_or(ConsumeError::NotFound)?;

        if now >= handshake.expires_at_ms {
            return Err(ConsumeError::Expired);
        }
        Ok(handshake)
    }

    /// Remove expired entries, returning the number swept
    pub fn sweep_expired(&self, now: u64) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|_, handshake| now < handshake.expires_at_ms);
        before - inner.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Start the background task that sweeps expired handshakes
    pub fn start_sweep_task(self: &Arc<Self>, interval: Option<Duration>) {
        let interval = interval.unwrap_or(Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        {
            let mut guard = self.sweep_shutdown.write();
            if guard.is_some() {
                tracing::debug!("Handshake sweep task already running, skipping duplicate start");
                return;
            }
            *guard = Some(shutdown_tx);
        }

        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = store.sweep_expired(now_ms());
                        if swept > 0 {
                            tracing::debug!(swept = swept, "Swept expired login handshakes");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Handshake sweep task shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Stop the background sweep task
    pub fn stop_sweep_task(&self) {
        if let Some(shutdown_tx) = self.sweep_shutdown.write().take() {
            let _ = shutdown_tx.send(());
        }
    }
}
