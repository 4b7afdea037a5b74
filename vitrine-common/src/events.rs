//! Event types for the Vitrine event system
//!
//! Events are emitted by the playback controller and streamed to control
//! clients over SSE.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Controller playback state
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// No collection selected yet
    #[default]
    Idle,
    Playing,
    Paused,
    /// Explicit user stop; the selection is kept, the playlist position is not
    Stopped,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a media item left the engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemOutcome {
    /// Played to the end
    Finished,
    /// Interrupted by a command or shutdown
    Cancelled,
    /// Could not be loaded or played
    Failed,
}

/// Vitrine event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VitrineEvent {
    /// Playback state changed
    PlaybackStateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A new collection selection was recorded (also for same-path replays)
    CollectionChanged {
        collection: String,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A media item was handed to the engine
    ItemStarted {
        collection: Option<String>,
        file: String,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A media item left the engine
    ItemEnded {
        file: String,
        outcome: ItemOutcome,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Selected collection has no playable files
    PlaylistEmpty {
        collection: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Screen was blanked
    DisplayCleared {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl VitrineEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            VitrineEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            VitrineEvent::CollectionChanged { .. } => "CollectionChanged",
            VitrineEvent::ItemStarted { .. } => "ItemStarted",
            VitrineEvent::ItemEnded { .. } => "ItemEnded",
            VitrineEvent::PlaylistEmpty { .. } => "PlaylistEmpty",
            VitrineEvent::DisplayCleared { .. } => "DisplayCleared",
        }
    }
}

/// Broadcast bus for `VitrineEvent`s
///
/// Emission never blocks and never fails for the caller: the controller emits
/// from its own thread whether or not an SSE client is connected.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VitrineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<VitrineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: VitrineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
