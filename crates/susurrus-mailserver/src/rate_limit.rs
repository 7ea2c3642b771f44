//! Per-peer request cooldown with background expiry.
//!
//! An entry's presence means "too soon". The limit is one request per
//! cooldown window, not sliding: re-registering within the window keeps
//! the original timestamp. A janitor task sweeps expired entries once per
//! cooldown period.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use susurrus_protocol::PeerId;
use tokio::sync::broadcast;

/// Tracks the peers currently inside their cooldown window.
pub struct RateLimiter {
    entries: Arc<Mutex<HashMap<PeerId, Instant>>>,
    cooldown: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl RateLimiter {
    /// Build a limiter and start its janitor. Must be called from within a
    /// tokio runtime.
    pub fn new(cooldown: Duration) -> Self {
        let entries: Arc<Mutex<HashMap<PeerId, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

        tokio::spawn(run_janitor(entries.clone(), cooldown, shutdown_rx));

        Self {
            entries,
            cooldown,
            shutdown_tx,
        }
    }

    /// Whether `peer` is still inside its cooldown window. Read-only.
    pub fn exceeds(&self, peer: &PeerId) -> bool {
        match self.entries.lock() {
            Ok(entries) => entries.contains_key(peer),
            Err(_) => false,
        }
    }

    /// Start a cooldown window for `peer`. No-op if one is already open --
    /// the original timestamp is what expires.
    pub fn register(&self, peer: &PeerId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.entry(peer.clone()).or_insert_with(Instant::now);
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Stop the janitor. Safe to call more than once.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    #[cfg(test)]
    fn entry(&self, peer: &PeerId) -> Option<Instant> {
        self.entries.lock().ok()?.get(peer).copied()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// Sweep expired entries once per cooldown period until shutdown.
async fn run_janitor(
    entries: Arc<Mutex<HashMap<PeerId, Instant>>>,
    cooldown: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut tick = tokio::time::interval(cooldown);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Skip the first immediate tick
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Ok(mut entries) = entries.lock() {
                    let before = entries.len();
                    entries.retain(|_, created| created.elapsed() < cooldown);
                    let expired = before - entries.len();
                    if expired > 0 {
                        tracing::debug!(expired, remaining = entries.len(), "rate limit entries expired");
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("rate limit janitor shutting down");
                return;
            }
        }
    }
}
