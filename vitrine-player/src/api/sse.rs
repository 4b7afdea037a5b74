//! Server-Sent Events (SSE) endpoint
//!
//! Streams controller events (state changes, collection switches, item
//! start/end) to connected clients.

use crate::api::server::AppContext;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events - SSE event stream
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = ctx.state.events.subscribe();
    vitrine_common::sse::broadcast_sse_stream("vitrine-player", rx, ctx.state.shutdown_receiver())
}
