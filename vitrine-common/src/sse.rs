//! Server-Sent Events (SSE) utilities

use crate::events::VitrineEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Convert a `VitrineEvent` into an SSE frame (`event:` = event type, `data:` = JSON)
pub fn to_sse_event(event: &VitrineEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            None
        }
    }
}

/// Stream broadcast events to one SSE client
///
/// Sends a `ConnectionStatus` frame first, then every event received. A
/// lagging client skips the events it missed and keeps streaming; the stream
/// ends when `shutdown` turns true or the bus is dropped.
pub fn broadcast_sse_stream(
    service_name: &'static str,
    mut rx: broadcast::Receiver<VitrineEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", service_name);

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            let received = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => None,
                received = rx.recv() => Some(received),
            };
            let Some(received) = received else {
                debug!("SSE: shutting down, ending stream");
                break;
            };

            match received {
                Ok(event) => {
                    debug!("SSE: sending {}", event.event_type());
                    if let Some(frame) = to_sse_event(&event) {
                        yield Ok(frame);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE client lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("SSE: event bus closed, ending stream");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
