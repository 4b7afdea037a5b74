//! Playlist loop
//!
//! Runs on its own thread for the life of the controller. It is the only
//! owner of engine sessions: commands record their intent in
//! `ControllerState` and cancel the active token, the loop observes and acts.
//!
//! Each pass snapshots the selected collection's playlist, then walks it.
//! Before every entry the captured `(path, generation)` is compared with the
//! live selection under the lock; any difference ends the pass and the next
//! one starts from the first entry of the new selection.

use super::model::ControllerState;
use super::ControllerCore;
use crate::engine::{CancelReason, CancelToken, SessionHandle, WaitOutcome};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vitrine_common::config::PauseMode;
use vitrine_common::events::{ItemOutcome, PlaybackState, VitrineEvent};

/// Playlist snapshot for one pass
struct Pass {
    name: String,
    path: PathBuf,
    generation: u64,
    files: Vec<PathBuf>,
}

/// Whether the loop may start the entry at the current index
enum Gate {
    Go(CancelToken),
    Skip,
    Abandon,
}

/// How one entry ended, from the playlist's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemResult {
    /// Played to the end or could not be played; advance
    Done,
    /// Next was requested; advance
    Skipped,
    /// Released by a pause; start the same entry again once resumed
    Replay,
    /// Selection changed, stopped or shutting down; end the pass
    Abandon,
}

impl ControllerCore {
    pub(super) fn run_loop(&self) {
        info!("Playback loop running");
        self.startup_stage();

        while let Some(pass) = self.next_pass() {
            debug!(
                "Pass over {} (generation {}, {} files)",
                pass.name,
                pass.generation,
                pass.files.len()
            );
            self.play_through(&pass);
        }

        let mut st = self.shared.state.lock();
        st.loop_running = false;
        st.active_token = None;
        self.shared.cond.notify_all();
        info!("Playback loop exited");
    }

    /// Boot video, then the initial selection
    fn startup_stage(&self) {
        if let Some(boot) = self.settings.boot_video.clone() {
            if boot.is_file() {
                self.play_boot_video(&boot);
            } else {
                debug!("No boot video at {}", boot.display());
            }
        }
        self.apply_initial_selection();
    }

    fn play_boot_video(&self, path: &Path) {
        let token = {
            let mut st = self.shared.state.lock();
            if st.shutting_down || st.generation != 0 || st.state != PlaybackState::Idle {
                return;
            }
            let token = CancelToken::new();
            st.active_token = Some(token.clone());
            st.current_item = Some(path.to_path_buf());
            st.session_active = true;
            token
        };

        info!("Playing boot video {}", path.display());
        let mut handle = match self.engine.load_and_play(path) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Boot video failed: {}", e);
                self.clear_item(path, ItemOutcome::Failed);
                return;
            }
        };

        let outcome = loop {
            match self.engine.wait_for_completion_or_signal(
                &mut handle,
                &token,
                self.settings.playback.wait_slice(),
            ) {
                WaitOutcome::Finished => break ItemOutcome::Finished,
                WaitOutcome::Cancelled(_) => break ItemOutcome::Cancelled,
                WaitOutcome::TimedOut => {
                    let st = self.shared.state.lock();
                    if st.shutting_down || st.state != PlaybackState::Idle {
                        break ItemOutcome::Cancelled;
                    }
                }
            }
        };
        self.end_item(&mut handle, outcome);
    }

    fn apply_initial_selection(&self) {
        let name = match &self.settings.initial_collection {
            Some(name) => name.clone(),
            None if self.settings.autostart => match self.registry.list_collections().first() {
                Some(first) => first.name.clone(),
                None => {
                    info!("No collections available, waiting for a selection");
                    return;
                }
            },
            None => return,
        };

        let info = match self.registry.resolve(&name) {
            Ok(info) => info,
            Err(e) => {
                warn!("Initial collection {} unavailable: {}", name, e);
                return;
            }
        };

        let (generation, change) = {
            let mut st = self.shared.state.lock();
            // A command already decided what to play
            if st.shutting_down || st.generation != 0 || st.state != PlaybackState::Idle {
                return;
            }
            let recorded = st.record_selection(&info);
            self.shared.cond.notify_all();
            recorded
        };

        info!("Starting with collection {}", info.name);
        self.emit_selection(&info.name, generation);
        self.emit_state_change(change);
    }

    /// Park until there is something to play, then snapshot its playlist
    ///
    /// Returns `None` once shutdown begins.
    fn next_pass(&self) -> Option<Pass> {
        loop {
            let selection = {
                let mut st = self.shared.state.lock();
                loop {
                    if st.shutting_down {
                        return None;
                    }
                    if st.state == PlaybackState::Playing {
                        if let Some(selection) = st.selection.clone() {
                            break selection;
                        }
                    }
                    self.shared
                        .cond
                        .wait_for(&mut st, self.settings.playback.idle_poll());
                }
            };

            // Directory listing happens outside the lock
            let files = self.registry.list_files(&selection.path);
            if !files.is_empty() {
                return Some(Pass {
                    name: selection.name,
                    path: selection.path,
                    generation: selection.generation,
                    files,
                });
            }

            warn!(
                "Collection {} has no playable files, retrying in {:?}",
                selection.name,
                self.settings.playback.empty_backoff()
            );
            self.state.broadcast_event(VitrineEvent::PlaylistEmpty {
                collection: selection.name.clone(),
                timestamp: chrono::Utc::now(),
            });

            let deadline = Instant::now() + self.settings.playback.empty_backoff();
            let mut st = self.shared.state.lock();
            while !st.shutting_down
                && st.state == PlaybackState::Playing
                && st.selection_is(&selection.path, selection.generation)
            {
                if self.shared.cond.wait_until(&mut st, deadline).timed_out() {
                    break;
                }
            }
        }
    }

    fn play_through(&self, pass: &Pass) {
        let mut index = 0;
        while index < pass.files.len() {
            let file = &pass.files[index];
            let token = match self.gate(pass, file) {
                Gate::Go(token) => token,
                Gate::Skip => {
                    index += 1;
                    continue;
                }
                Gate::Abandon => return,
            };

            match self.play_item(pass, file, token) {
                ItemResult::Done | ItemResult::Skipped => index += 1,
                ItemResult::Replay => {}
                ItemResult::Abandon => return,
            }

            let gap = self.settings.playback.inter_item_gap();
            if !gap.is_zero() && index < pass.files.len() {
                self.gap(pass, gap);
            }
        }
        debug!("End of playlist {}, starting over", pass.name);
    }

    /// Re-check the selection before an entry; parks while paused
    fn gate(&self, pass: &Pass, file: &Path) -> Gate {
        let mut st = self.shared.state.lock();
        loop {
            if st.shutting_down || !st.selection_is(&pass.path, pass.generation) {
                return Gate::Abandon;
            }
            match st.state {
                PlaybackState::Playing if st.skip_requested => {
                    st.skip_requested = false;
                    return Gate::Skip;
                }
                PlaybackState::Playing => {
                    let token = CancelToken::new();
                    st.active_token = Some(token.clone());
                    st.current_item = Some(file.to_path_buf());
                    st.session_active = true;
                    return Gate::Go(token);
                }
                PlaybackState::Paused => {
                    self.shared
                        .cond
                        .wait_for(&mut st, self.settings.playback.idle_poll());
                }
                PlaybackState::Idle | PlaybackState::Stopped => return Gate::Abandon,
            }
        }
    }

    fn play_item(&self, pass: &Pass, file: &Path, token: CancelToken) -> ItemResult {
        let mut handle = match self.engine.load_and_play(file) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Skipping {}: {}", file.display(), e);
                self.clear_item(file, ItemOutcome::Failed);
                return ItemResult::Done;
            }
        };
        self.state.broadcast_event(VitrineEvent::ItemStarted {
            collection: Some(pass.name.clone()),
            file: file.to_string_lossy().into_owned(),
            generation: pass.generation,
            timestamp: chrono::Utc::now(),
        });

        let mut token = token;
        loop {
            let outcome = self.engine.wait_for_completion_or_signal(
                &mut handle,
                &token,
                self.settings.playback.wait_slice(),
            );
            match outcome {
                WaitOutcome::Finished => {
                    self.end_item(&mut handle, ItemOutcome::Finished);
                    return ItemResult::Done;
                }
                WaitOutcome::TimedOut => {
                    let st = self.shared.state.lock();
                    if st.shutting_down || !st.selection_is(&pass.path, pass.generation) {
                        drop(st);
                        self.end_item(&mut handle, ItemOutcome::Cancelled);
                        return ItemResult::Abandon;
                    }
                }
                WaitOutcome::Cancelled(CancelReason::Next) => {
                    self.end_item(&mut handle, ItemOutcome::Cancelled);
                    return ItemResult::Skipped;
                }
                WaitOutcome::Cancelled(CancelReason::Pause) => {
                    if self.settle_pause() {
                        debug!("{} skipped before the pause", file.display());
                        self.end_item(&mut handle, ItemOutcome::Cancelled);
                        return ItemResult::Skipped;
                    }
                    match self.settings.playback.pause_mode {
                        PauseMode::Release => {
                            self.end_item(&mut handle, ItemOutcome::Cancelled);
                            return ItemResult::Replay;
                        }
                        PauseMode::Hold => match self.hold(pass, &mut handle) {
                            Ok(resumed) => token = resumed,
                            Err(result) => return result,
                        },
                    }
                }
                WaitOutcome::Cancelled(reason) => {
                    debug!("{} interrupted ({:?})", file.display(), reason);
                    self.end_item(&mut handle, ItemOutcome::Cancelled);
                    return ItemResult::Abandon;
                }
            }
        }
    }

    /// Decide what a pause cancellation means for the current item
    ///
    /// A Next that reached this item before the pause still wins: the
    /// pending skip is consumed and true returned. Otherwise the item is
    /// recorded as the one the pause interrupted.
    fn settle_pause(&self) -> bool {
        let mut st = self.shared.state.lock();
        if std::mem::take(&mut st.skip_requested) {
            return true;
        }
        st.paused_item = true;
        false
    }

    /// Pause the session in place until the controller leaves `Paused`
    ///
    /// Returns the fresh token to keep waiting with, or how the entry ended.
    fn hold(
        &self,
        pass: &Pass,
        handle: &mut SessionHandle,
    ) -> std::result::Result<CancelToken, ItemResult> {
        if let Err(e) = self.engine.pause(handle) {
            warn!("Engine pause failed, releasing instead: {}", e);
            self.end_item(handle, ItemOutcome::Cancelled);
            return Err(ItemResult::Replay);
        }
        debug!("Holding {}", handle.path().display());

        let token = {
            let mut st = self.shared.state.lock();
            loop {
                if st.shutting_down || !st.selection_is(&pass.path, pass.generation) {
                    break None;
                }
                match st.state {
                    PlaybackState::Paused => {
                        self.shared
                            .cond
                            .wait_for(&mut st, self.settings.playback.idle_poll());
                    }
                    PlaybackState::Playing if st.skip_requested => {
                        st.skip_requested = false;
                        drop(st);
                        self.end_item(handle, ItemOutcome::Cancelled);
                        return Err(ItemResult::Skipped);
                    }
                    PlaybackState::Playing => {
                        let token = CancelToken::new();
                        st.active_token = Some(token.clone());
                        break Some(token);
                    }
                    PlaybackState::Idle | PlaybackState::Stopped => break None,
                }
            }
        };

        let Some(token) = token else {
            self.end_item(handle, ItemOutcome::Cancelled);
            return Err(ItemResult::Abandon);
        };

        if let Err(e) = self.engine.resume(handle) {
            warn!("Engine resume failed, replaying {}: {}", handle.path().display(), e);
            self.end_item(handle, ItemOutcome::Cancelled);
            return Err(ItemResult::Replay);
        }
        Ok(token)
    }

    /// Optional pause between entries; cut short by any change
    fn gap(&self, pass: &Pass, gap: Duration) {
        let deadline = Instant::now() + gap;
        let mut st = self.shared.state.lock();
        while Self::undisturbed(&st, pass) {
            if self.shared.cond.wait_until(&mut st, deadline).timed_out() {
                break;
            }
        }
    }

    fn undisturbed(st: &ControllerState, pass: &Pass) -> bool {
        !st.shutting_down
            && st.state == PlaybackState::Playing
            && st.selection_is(&pass.path, pass.generation)
    }

    /// Release the session and clear its bookkeeping
    fn end_item(&self, handle: &mut SessionHandle, outcome: ItemOutcome) {
        self.engine.stop_and_release(handle);
        let path = handle.path().to_path_buf();
        self.clear_item(&path, outcome);
    }

    /// Clear session bookkeeping, wake waiters and report the item's end
    fn clear_item(&self, path: &Path, outcome: ItemOutcome) {
        {
            let mut st = self.shared.state.lock();
            st.session_active = false;
            st.current_item = None;
            st.active_token = None;
            // A skip aimed at this item is spent
            st.skip_requested = false;
            self.shared.cond.notify_all();
        }
        self.state.broadcast_event(VitrineEvent::ItemEnded {
            file: path.to_string_lossy().into_owned(),
            outcome,
            timestamp: chrono::Utc::now(),
        });
    }
}
