//! HTTP control surface
//!
//! **Module Structure:**
//! - `server.rs`: router and server loop
//! - `handlers.rs`: control and status endpoints
//! - `sse.rs`: event stream

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{build_router, run, serve, AppContext};
