//! Playback controller
//!
//! **Module Structure:**
//! - `mod.rs`: `PlaybackController`, command handling
//! - `model.rs`: `ControllerState` and the status snapshot
//! - `playback_loop.rs`: the playlist loop thread
//!
//! Commands run on the caller's thread and only touch `ControllerState`
//! under the controller lock; they never call into the engine. The loop
//! thread owns the engine session and reacts to what commands recorded
//! (state, selection, cancelled token).

mod model;
mod playback_loop;

pub use model::{CollectionSelection, StatusSnapshot};

use crate::display::DisplayClearer;
use crate::engine::{CancelReason, PlaybackEngine};
use crate::error::{Error, Result};
use crate::registry::{CollectionInfo, CollectionRegistry};
use crate::state::SharedState;
use model::ControllerShared;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vitrine_common::config::{PlaybackConfig, TomlConfig};
use vitrine_common::events::{PlaybackState, VitrineEvent};

/// Control request, from HTTP or from the buttons
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SwitchCollection(String),
    Play,
    Pause,
    Stop,
    Next,
    QueryStatus,
}

/// What a command did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Switched { collection: String, generation: u64 },
    Started,
    Resumed,
    AlreadyPlaying,
    Paused,
    Stopped,
    Skipped,
    NothingToSkip,
    Status(StatusSnapshot),
}

/// Command outcome plus the state it left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub outcome: Outcome,
    pub state: PlaybackState,
}

/// Loop timings and startup behaviour
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub playback: PlaybackConfig,
    pub boot_video: Option<PathBuf>,
    pub initial_collection: Option<String>,
    pub autostart: bool,
}

impl ControllerSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            playback: config.playback.clone(),
            boot_video: config.startup.boot_video.clone(),
            initial_collection: config.media.initial_collection.clone(),
            autostart: config.media.autostart,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            playback: PlaybackConfig::default(),
            boot_video: None,
            initial_collection: None,
            autostart: false,
        }
    }
}

/// State shared between the command path and the loop thread
struct ControllerCore {
    shared: ControllerShared,
    registry: CollectionRegistry,
    engine: Arc<PlaybackEngine>,
    display: Arc<dyn DisplayClearer>,
    state: Arc<SharedState>,
    settings: ControllerSettings,
}

impl ControllerCore {
    fn emit_state_change(&self, change: Option<(PlaybackState, PlaybackState)>) {
        if let Some((old_state, new_state)) = change {
            debug!("Playback state: {} -> {}", old_state, new_state);
            self.state.broadcast_event(VitrineEvent::PlaybackStateChanged {
                old_state,
                new_state,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    fn emit_selection(&self, collection: &str, generation: u64) {
        self.state.broadcast_event(VitrineEvent::CollectionChanged {
            collection: collection.to_string(),
            generation,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// The kiosk state machine
pub struct PlaybackController {
    core: Arc<ControllerCore>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackController {
    pub fn new(
        registry: CollectionRegistry,
        engine: Arc<PlaybackEngine>,
        display: Arc<dyn DisplayClearer>,
        state: Arc<SharedState>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            core: Arc::new(ControllerCore {
                shared: ControllerShared::default(),
                registry,
                engine,
                display,
                state,
                settings,
            }),
            loop_handle: Mutex::new(None),
        }
    }

    /// Spawn the playback loop thread
    pub fn start(&self) -> Result<()> {
        let mut handle = self.loop_handle.lock();
        if handle.is_some() {
            return Err(Error::Internal("playback loop already started".to_string()));
        }

        self.core.shared.state.lock().loop_running = true;
        let core = Arc::clone(&self.core);
        let spawned = thread::Builder::new()
            .name("playback-loop".to_string())
            .spawn(move || core.run_loop());

        match spawned {
            Ok(join) => {
                *handle = Some(join);
                info!("Playback loop started");
                Ok(())
            }
            Err(e) => {
                self.core.shared.state.lock().loop_running = false;
                Err(Error::Internal(format!("cannot spawn playback loop: {}", e)))
            }
        }
    }

    /// Run one command to completion
    pub fn execute(&self, command: Command) -> Result<CommandReply> {
        debug!("Command: {:?}", command);
        match command {
            Command::SwitchCollection(name) => self.switch_collection(&name),
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::Next => self.next(),
            Command::QueryStatus => {
                let snapshot = self.status();
                Ok(CommandReply {
                    state: snapshot.state,
                    outcome: Outcome::Status(snapshot),
                })
            }
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        self.core.shared.state.lock().snapshot()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.core.shared.state.lock().state
    }

    pub fn collections(&self) -> Vec<CollectionInfo> {
        self.core.registry.list_collections()
    }

    /// Select a collection and play it from its first entry
    pub fn switch_collection(&self, name: &str) -> Result<CommandReply> {
        // Filesystem read stays outside the lock
        let info = self.core.registry.resolve(name)?;

        let (generation, change) = {
            let mut st = self.core.shared.state.lock();
            if st.shutting_down {
                return Err(Error::ShuttingDown);
            }
            let recorded = st.record_selection(&info);
            self.core.shared.cond.notify_all();
            recorded
        };

        info!(
            "Collection switched to {} (generation {})",
            info.name, generation
        );
        self.core.emit_selection(&info.name, generation);
        self.core.emit_state_change(change);

        Ok(CommandReply {
            outcome: Outcome::Switched {
                collection: info.name,
                generation,
            },
            state: PlaybackState::Playing,
        })
    }

    pub fn play(&self) -> Result<CommandReply> {
        let (outcome, change) = {
            let mut st = self.core.shared.state.lock();
            if st.shutting_down {
                return Err(Error::ShuttingDown);
            }
            match st.state {
                PlaybackState::Idle => {
                    return Err(Error::invalid_state("No collection selected", st.state));
                }
                PlaybackState::Playing => (Outcome::AlreadyPlaying, None),
                PlaybackState::Paused => {
                    let change = st.transition(PlaybackState::Playing);
                    (Outcome::Resumed, change)
                }
                PlaybackState::Stopped => {
                    if st.selection.is_none() {
                        return Err(Error::invalid_state("No collection selected", st.state));
                    }
                    let change = st.transition(PlaybackState::Playing);
                    (Outcome::Started, change)
                }
            }
        };
        self.core.shared.cond.notify_all();
        self.core.emit_state_change(change);

        Ok(CommandReply {
            outcome,
            state: PlaybackState::Playing,
        })
    }

    pub fn pause(&self) -> Result<CommandReply> {
        let change = {
            let mut st = self.core.shared.state.lock();
            if st.state != PlaybackState::Playing {
                return Err(Error::invalid_state("Not playing", st.state));
            }
            let change = st.transition(PlaybackState::Paused);
            st.paused_item = false;
            st.cancel_active(CancelReason::Pause);
            change
        };
        self.core.shared.cond.notify_all();
        self.core.emit_state_change(change);

        Ok(CommandReply {
            outcome: Outcome::Paused,
            state: PlaybackState::Paused,
        })
    }

    /// Stop playback and blank the display
    ///
    /// Waits (bounded) for the loop to release the session before clearing.
    /// Stopping while already stopped does nothing.
    pub fn stop(&self) -> Result<CommandReply> {
        let change = {
            let mut st = self.core.shared.state.lock();
            if st.state == PlaybackState::Stopped {
                return Ok(CommandReply {
                    outcome: Outcome::Stopped,
                    state: PlaybackState::Stopped,
                });
            }
            st.skip_requested = false;
            let change = st.transition(PlaybackState::Stopped);
            st.cancel_active(CancelReason::Stop);
            change
        };
        self.core.shared.cond.notify_all();
        self.core.emit_state_change(change);

        let teardown = self.core.settings.playback.teardown_timeout();
        let still_stopped = {
            let deadline = Instant::now() + teardown;
            let mut st = self.core.shared.state.lock();
            while st.session_active && st.state == PlaybackState::Stopped {
                if self
                    .core
                    .shared
                    .cond
                    .wait_until(&mut st, deadline)
                    .timed_out()
                {
                    warn!("Session still active {:?} after Stop", teardown);
                    break;
                }
            }
            st.state == PlaybackState::Stopped
        };

        // A command that arrived meanwhile owns the screen now
        if still_stopped {
            self.clear_display();
        } else {
            debug!("State left Stopped before teardown finished, display left alone");
        }

        info!("Playback stopped");
        Ok(CommandReply {
            outcome: Outcome::Stopped,
            state: PlaybackState::Stopped,
        })
    }

    pub fn next(&self) -> Result<CommandReply> {
        let (outcome, change) = {
            let mut st = self.core.shared.state.lock();
            match st.state {
                PlaybackState::Idle | PlaybackState::Stopped => {
                    return Err(Error::invalid_state("Nothing is playing", st.state));
                }
                PlaybackState::Paused => {
                    // Paused between items: the following entry never started
                    // and simply plays on resume
                    if st.session_active || st.paused_item {
                        st.skip_requested = true;
                    }
                    let change = st.transition(PlaybackState::Playing);
                    (Outcome::Skipped, change)
                }
                PlaybackState::Playing => {
                    if st.session_active && st.cancel_active(CancelReason::Next) {
                        st.skip_requested = true;
                        (Outcome::Skipped, None)
                    } else {
                        (Outcome::NothingToSkip, None)
                    }
                }
            }
        };
        self.core.shared.cond.notify_all();
        self.core.emit_state_change(change);

        Ok(CommandReply {
            outcome,
            state: PlaybackState::Playing,
        })
    }

    fn clear_display(&self) {
        match self.core.display.clear() {
            Ok(()) => {
                self.core.state.broadcast_event(VitrineEvent::DisplayCleared {
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(e) => warn!("Display clear failed: {}", e),
        }
    }

    /// Tell the loop to exit and cancel whatever it is playing
    pub fn begin_shutdown(&self) {
        let mut st = self.core.shared.state.lock();
        if !st.shutting_down {
            info!("Playback controller shutting down");
        }
        st.shutting_down = true;
        st.cancel_active(CancelReason::Shutdown);
        self.core.shared.cond.notify_all();
    }

    /// Wait for the loop thread to exit; true if it did within `timeout`
    pub fn wait_for_loop_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        {
            let mut st = self.core.shared.state.lock();
            while st.loop_running {
                if self
                    .core
                    .shared
                    .cond
                    .wait_until(&mut st, deadline)
                    .timed_out()
                {
                    return !st.loop_running;
                }
            }
        }

        if let Some(handle) = self.loop_handle.lock().take() {
            if handle.join().is_err() {
                warn!("Playback loop thread panicked");
            }
        }
        true
    }

    pub fn engine(&self) -> &Arc<PlaybackEngine> {
        &self.core.engine
    }
}
