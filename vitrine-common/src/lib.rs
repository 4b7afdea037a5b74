//! # Vitrine Common Library
//!
//! Shared code for the Vitrine kiosk services:
//! - Error type
//! - Bootstrap configuration (TOML) and config file resolution
//! - Event types (`VitrineEvent`, `PlaybackState`) and the event bus
//! - SSE helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
