//! Shared service state
//!
//! Holds what the controller thread and the HTTP handlers both need outside
//! the controller lock: the event broadcaster, the shutdown trigger and
//! process uptime.

use std::time::Instant;
use tokio::sync::watch;
use vitrine_common::events::{EventBus, VitrineEvent};

/// Events buffered per SSE subscriber before it starts lagging
const EVENT_CAPACITY: usize = 100;

/// Shared state accessible by all components
pub struct SharedState {
    /// Event broadcaster for SSE events
    pub events: EventBus,

    /// Flips to true once; never reset
    shutdown: watch::Sender<bool>,

    started_at: Instant,
}

impl SharedState {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            events: EventBus::new(EVENT_CAPACITY),
            shutdown,
            started_at: Instant::now(),
        }
    }

    /// Ask every long-lived task (SSE streams, teardown) to finish
    pub fn request_shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!("Shutdown requested");
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Resolves once `request_shutdown` has been called
    pub async fn shutdown_requested(&self) {
        let mut rx = self.shutdown.subscribe();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Broadcast an event (no-op without subscribers)
    pub fn broadcast_event(&self, event: VitrineEvent) {
        self.events.emit_lossy(event);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
