//! Error types for vitrine-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use std::path::PathBuf;
use thiserror::Error;
use vitrine_common::events::PlaybackState;

/// Main error type for vitrine-player
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing collection, bad configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// The media player could not be constructed (program missing, output unavailable)
    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    /// The media file could not be opened
    #[error("Cannot load media {path}: {reason}")]
    MediaLoad { path: PathBuf, reason: String },

    /// Command or engine call not legal in the current state
    #[error("Invalid state: {message} (state: {state})")]
    InvalidState {
        message: String,
        state: PlaybackState,
    },

    /// A session is still open; the engine holds at most one
    #[error("Session already active: {0}")]
    SessionActive(String),

    /// Controller is tearing down; no engine available
    #[error("Shutting down")]
    ShuttingDown,

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_state(message: impl Into<String>, state: PlaybackState) -> Self {
        Error::InvalidState {
            message: message.into(),
            state,
        }
    }

    /// True for errors caused by the request rather than by the kiosk
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::InvalidState { .. } | Error::ShuttingDown
        )
    }
}

/// Convenience Result type using vitrine-player Error
pub type Result<T> = std::result::Result<T, Error>;
