//! Playback engine - adapter over the external media capability
//!
//! **Module Structure:**
//! - `mod.rs`: `PlaybackEngine`, `SessionHandle`, backend traits
//! - `signal.rs`: cancellation token and completion notification
//! - `process.rs`: backend driving an external player program
//!
//! The engine enforces the single-session rule itself: `load_and_play`
//! refuses while a previous `SessionHandle` is still open, so a session must be
//! released before the next one is created.

mod process;
mod signal;

pub use process::ProcessBackend;
pub use signal::{CancelReason, CancelToken, Completion, Wake};

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vitrine_common::events::PlaybackState;

/// One loaded media item inside the external capability
///
/// Implementations report the end of playback through the `Completion`
/// handed to `play`. `release` is called exactly once, after `stop`.
pub trait MediaPlayer: Send {
    /// Start playback; call `completion.finish()` when the item ends on its own
    fn play(&mut self, completion: Arc<Completion>) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// Halt playback; must tolerate an item that already finished
    fn stop(&mut self) -> Result<()>;

    /// Free every resource held by this player
    fn release(&mut self) -> Result<()>;
}

/// Factory for `MediaPlayer`s
pub trait MediaBackend: Send + Sync {
    /// Construct a player for `path`
    ///
    /// Fails with `Error::MediaLoad` when the file cannot be opened and with
    /// `Error::EngineInit` when the output cannot be constructed.
    fn load(&self, path: &Path, looping: bool) -> Result<Box<dyn MediaPlayer>>;

    /// Kill players that outlived their session; returns how many were found
    fn release_orphans(&self) -> usize {
        0
    }

    /// Kill player processes this backend did not start (left by a crashed
    /// earlier run, or started by hand); returns how many were killed
    fn sweep_strays(&self) -> usize {
        0
    }

    fn name(&self) -> &str;
}

/// How a wait on a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Finished,
    Cancelled(CancelReason),
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Playing,
    Paused,
    Finished,
    Released,
}

/// Files whose name contains `loop.` play until cancelled
pub fn is_loop_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase().contains("loop."))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
struct ActiveSession {
    id: u64,
    path: PathBuf,
}

#[derive(Debug, Default)]
struct SessionSlot {
    active: Mutex<Option<ActiveSession>>,
}

impl SessionSlot {
    fn vacate(&self, id: u64) {
        let mut active = self.active.lock();
        if active.as_ref().map(|a| a.id) == Some(id) {
            *active = None;
        }
    }
}

/// Exclusive handle to the media item currently loaded in the engine
///
/// Owned by the playback loop; dropping an unreleased handle releases it.
pub struct SessionHandle {
    id: u64,
    path: PathBuf,
    looping: bool,
    phase: SessionPhase,
    player: Box<dyn MediaPlayer>,
    completion: Arc<Completion>,
    slot: Arc<SessionSlot>,
}

impl SessionHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    fn release(&mut self) {
        if self.phase == SessionPhase::Released {
            return;
        }
        if let Err(e) = self.player.stop() {
            warn!("Failed to stop {}: {}", self.path.display(), e);
        }
        if let Err(e) = self.player.release() {
            warn!("Failed to release {}: {}", self.path.display(), e);
        }
        self.phase = SessionPhase::Released;
        self.slot.vacate(self.id);
        debug!("Session {} released ({})", self.id, self.path.display());
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.phase != SessionPhase::Released {
            warn!("Session {} dropped without release", self.id);
            self.release();
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("looping", &self.looping)
            .field("phase", &self.phase)
            .finish()
    }
}

/// Playback engine - owns at most one session at a time
pub struct PlaybackEngine {
    backend: Arc<dyn MediaBackend>,
    slot: Arc<SessionSlot>,
    next_id: AtomicU64,
}

impl PlaybackEngine {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        info!("Playback engine using {} backend", backend.name());
        Self {
            backend,
            slot: Arc::new(SessionSlot::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Path of the open session, if any
    pub fn active_session(&self) -> Option<PathBuf> {
        self.slot.active.lock().as_ref().map(|a| a.path.clone())
    }

    /// Load `path` and start playing it
    pub fn load_and_play(&self, path: &Path) -> Result<SessionHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut active = self.slot.active.lock();
            if let Some(current) = active.as_ref() {
                return Err(Error::SessionActive(format!(
                    "session {} ({}) still open",
                    current.id,
                    current.path.display()
                )));
            }
            *active = Some(ActiveSession {
                id,
                path: path.to_path_buf(),
            });
        }

        let strays = self.backend.sweep_strays();
        if strays > 0 {
            warn!("Killed {} stray player(s) before loading {}", strays, path.display());
        }

        let looping = is_loop_file(path);
        let mut player = match self.backend.load(path, looping) {
            Ok(player) => player,
            Err(e) => {
                self.slot.vacate(id);
                return Err(e);
            }
        };

        let completion = Completion::new();
        if let Err(e) = player.play(Arc::clone(&completion)) {
            if let Err(release_err) = player.release() {
                warn!("Failed to release player after start error: {}", release_err);
            }
            self.slot.vacate(id);
            return Err(e);
        }

        debug!(
            "Session {} playing {}{}",
            id,
            path.display(),
            if looping { " (loop)" } else { "" }
        );

        Ok(SessionHandle {
            id,
            path: path.to_path_buf(),
            looping,
            phase: SessionPhase::Playing,
            player,
            completion,
            slot: Arc::clone(&self.slot),
        })
    }

    /// Block until the item finishes, `cancel` fires, or `timeout` elapses
    ///
    /// Looping items are restarted when the player reports their end, so this
    /// never returns `Finished` for them unless the restart fails.
    pub fn wait_for_completion_or_signal(
        &self,
        handle: &mut SessionHandle,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> WaitOutcome {
        if handle.phase == SessionPhase::Released || handle.phase == SessionPhase::Finished {
            return WaitOutcome::Finished;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let completion = Arc::clone(&handle.completion);
            completion.subscribe(cancel);

            match cancel.wait_until(deadline, || completion.is_finished()) {
                Wake::Cancelled(reason) => return WaitOutcome::Cancelled(reason),
                Wake::TimedOut => return WaitOutcome::TimedOut,
                Wake::Condition if handle.looping => {
                    debug!("Restarting loop item {}", handle.path.display());
                    let next = Completion::new();
                    if let Err(e) = handle.player.play(Arc::clone(&next)) {
                        warn!("Failed to restart loop item {}: {}", handle.path.display(), e);
                        handle.phase = SessionPhase::Finished;
                        return WaitOutcome::Finished;
                    }
                    handle.completion = next;
                }
                Wake::Condition => {
                    handle.phase = SessionPhase::Finished;
                    return WaitOutcome::Finished;
                }
            }
        }
    }

    pub fn pause(&self, handle: &mut SessionHandle) -> Result<()> {
        if handle.phase != SessionPhase::Playing {
            return Err(Error::invalid_state(
                format!("session {} is not playing", handle.id),
                PlaybackState::Playing,
            ));
        }
        handle.player.pause()?;
        handle.phase = SessionPhase::Paused;
        Ok(())
    }

    pub fn resume(&self, handle: &mut SessionHandle) -> Result<()> {
        if handle.phase != SessionPhase::Paused {
            return Err(Error::invalid_state(
                format!("session {} is not paused", handle.id),
                PlaybackState::Paused,
            ));
        }
        handle.player.resume()?;
        handle.phase = SessionPhase::Playing;
        Ok(())
    }

    /// Stop playback and free the player; safe to call repeatedly
    pub fn stop_and_release(&self, handle: &mut SessionHandle) {
        handle.release();
    }

    /// Kill any player process left behind (shutdown path)
    pub fn release_orphans(&self) -> usize {
        let count = self.backend.release_orphans();
        if count > 0 {
            warn!("Released {} orphaned player(s)", count);
        }
        count
    }

    pub fn sweep_strays(&self) -> usize {
        self.backend.sweep_strays()
    }

    /// Kill every player process, ours included
    ///
    /// The loop sees the current item end and moves on to the next one.
    pub fn emergency_cleanup(&self) -> usize {
        warn!("Emergency cleanup: killing all player processes");
        self.backend.release_orphans() + self.backend.sweep_strays()
    }
}
