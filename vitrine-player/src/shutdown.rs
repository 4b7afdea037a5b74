//! Ordered teardown on termination
//!
//! Stop playback, wait for the loop to release its session, kill any player
//! process left behind, blank the display. Each step runs even if an earlier
//! one failed; the whole sequence runs at most once.
//!
//! `shutdown_when_requested` ties the teardown to the shared shutdown
//! trigger, so it runs as soon as a signal arrives and does not wait for the
//! HTTP server to drain.

use crate::controller::PlaybackController;
use crate::display::DisplayClearer;
use crate::state::SharedState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct ShutdownCoordinator {
    controller: Arc<PlaybackController>,
    display: Arc<dyn DisplayClearer>,
    timeout: Duration,
    done: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(
        controller: Arc<PlaybackController>,
        display: Arc<dyn DisplayClearer>,
        timeout: Duration,
    ) -> Self {
        Self {
            controller,
            display,
            timeout,
            done: AtomicBool::new(false),
        }
    }

    /// Run the teardown; later calls return immediately
    ///
    /// Returns false if this call was not the one that ran it.
    pub fn shutdown(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("Shutting down playback");

        self.controller.begin_shutdown();
        if !self.controller.wait_for_loop_exit(self.timeout) {
            warn!(
                "Playback loop did not exit within {:?}, forcing cleanup",
                self.timeout
            );
        }

        let orphans = self.controller.engine().release_orphans();
        if orphans > 0 {
            info!("Killed {} leftover player process(es)", orphans);
        }

        if let Err(e) = self.display.clear() {
            warn!("Display clear during shutdown failed: {}", e);
        }

        info!("Playback shutdown complete");
        true
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Wait for a shutdown request, then run the teardown on the blocking pool
    pub async fn shutdown_when_requested(self: Arc<Self>, state: Arc<SharedState>) -> bool {
        state.shutdown_requested().await;
        match tokio::task::spawn_blocking(move || self.shutdown()).await {
            Ok(ran) => ran,
            Err(e) => {
                warn!("Teardown task failed: {}", e);
                false
            }
        }
    }
}
