//! Controller state guarded by the controller lock
//!
//! Everything the command path and the playback loop share lives in
//! `ControllerState`, behind one mutex paired with one condition variable.
//! The loop parks on the condition variable; every command that changes
//! something the loop cares about notifies it.

use crate::engine::{CancelReason, CancelToken};
use crate::registry::CollectionInfo;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::path::{Path, PathBuf};
use vitrine_common::events::PlaybackState;

/// A recorded collection-switch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSelection {
    pub name: String,
    pub path: PathBuf,
    pub generation: u64,
}

impl CollectionSelection {
    /// The staleness check: a captured selection is current only if both the
    /// path and the generation still match
    pub fn matches(&self, path: &Path, generation: u64) -> bool {
        self.generation == generation && self.path == path
    }
}

#[derive(Debug, Default)]
pub struct ControllerState {
    pub state: PlaybackState,
    pub selection: Option<CollectionSelection>,

    /// Last generation handed out; strictly increasing
    pub generation: u64,

    /// Token of the session the loop is currently waiting on
    pub active_token: Option<CancelToken>,

    pub current_item: Option<PathBuf>,

    /// True from the moment the loop commits to an item until its session
    /// is released (or its load fails)
    pub session_active: bool,

    /// A Next the loop has not acted on yet; consumed when the item it
    /// targets ends, or at the gate when it targets a paused item
    pub skip_requested: bool,

    /// The current pause interrupted an item (released for replay, or held)
    pub paused_item: bool,

    pub shutting_down: bool,
    pub loop_running: bool,
}

impl ControllerState {
    /// Change state, returning `(old, new)` when it actually changed
    pub fn transition(&mut self, new: PlaybackState) -> Option<(PlaybackState, PlaybackState)> {
        let old = self.state;
        self.state = new;
        (old != new).then_some((old, new))
    }

    /// Cancel the active session, if any
    pub fn cancel_active(&mut self, reason: CancelReason) -> bool {
        match &self.active_token {
            Some(token) => {
                token.cancel(reason);
                true
            }
            None => false,
        }
    }

    /// Record a new selection and start playing it
    ///
    /// Always bumps the generation, even for the path already selected, so
    /// re-selecting a collection restarts it from the top.
    pub fn record_selection(
        &mut self,
        info: &CollectionInfo,
    ) -> (u64, Option<(PlaybackState, PlaybackState)>) {
        self.generation += 1;
        self.selection = Some(CollectionSelection {
            name: info.name.clone(),
            path: info.path.clone(),
            generation: self.generation,
        });
        self.skip_requested = false;
        self.cancel_active(CancelReason::Switch);
        let change = self.transition(PlaybackState::Playing);
        (self.generation, change)
    }

    /// Whether the loop's captured `(path, generation)` is still current
    pub fn selection_is(&self, path: &Path, generation: u64) -> bool {
        self.selection
            .as_ref()
            .map(|s| s.matches(path, generation))
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            current_collection: self.selection.as_ref().map(|s| s.name.clone()),
            collection_path: self
                .selection
                .as_ref()
                .map(|s| s.path.to_string_lossy().into_owned()),
            generation: self.generation,
            current_file: self
                .current_item
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            session_active: self.session_active,
            shutting_down: self.shutting_down,
        }
    }
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub state: PlaybackState,
    pub current_collection: Option<String>,
    pub collection_path: Option<String>,
    pub generation: u64,
    pub current_file: Option<String>,
    pub session_active: bool,
    pub shutting_down: bool,
}

/// Lock + condition variable pair
#[derive(Debug, Default)]
pub struct ControllerShared {
    pub state: Mutex<ControllerState>,
    pub cond: Condvar,
}
