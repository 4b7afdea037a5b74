//! # Vitrine Player Library (vitrine-player)
//!
//! Kiosk playback controller: plays the files of the selected collection in a
//! loop and exposes HTTP and button controls.
//!
//! **Architecture:** one playback loop thread owns the single engine
//! session; HTTP handlers and the button monitor issue commands that only
//! mutate controller state and cancel the active session.

pub mod api;
pub mod buttons;
pub mod config;
pub mod controller;
pub mod display;
pub mod engine;
pub mod error;
pub mod registry;
pub mod shutdown;
pub mod state;
pub mod sync;

pub use error::{Error, Result};
pub use state::SharedState;
