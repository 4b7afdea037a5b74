//! HTTP server setup and routing
//!
//! Sets up the Axum router for the control endpoints and SSE.

use crate::controller::PlaybackController;
use crate::error::{Error, Result};
use crate::state::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub state: Arc<SharedState>,
    pub controller: Arc<PlaybackController>,
}

/// Build the router with every control endpoint
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        // Health and build information
        .route("/health", get(super::handlers::health))
        .route("/build_info", get(super::handlers::build_info))

        // Collections
        .route("/collections", get(super::handlers::list_collections))
        .route("/set_collection", post(super::handlers::set_collection))

        // Playback control
        .route("/play", post(super::handlers::play))
        .route("/pause", post(super::handlers::pause))
        .route("/stop", post(super::handlers::stop))
        .route("/next", post(super::handlers::next))
        .route("/status", get(super::handlers::status))
        .route("/emergency_cleanup", post(super::handlers::emergency_cleanup))

        // SSE event stream
        .route("/events", get(super::sse::event_stream))

        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Remote control pages are served from other origins
        .layer(CorsLayer::permissive())
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn run<F>(addr: SocketAddr, ctx: AppContext, shutdown: F, grace: Duration) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    serve(listener, ctx, shutdown, grace).await
}

/// Serve on an already bound listener
///
/// When `shutdown` resolves (or shutdown is requested through
/// `SharedState`) the request is broadcast so SSE streams end, then open
/// connections get at most `grace` to finish.
pub async fn serve<F>(
    listener: TcpListener,
    ctx: AppContext,
    shutdown: F,
    grace: Duration,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = Arc::clone(&ctx.state);
    let app = build_router(ctx);

    let signalled = {
        let state = Arc::clone(&state);
        async move {
            tokio::select! {
                _ = shutdown => state.request_shutdown(),
                _ = state.shutdown_requested() => {}
            }
        }
    };

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(signalled)
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            return result.map_err(|e| Error::Http(format!("Server error: {}", e)));
        }
        _ = state.shutdown_requested() => {}
    }

    match tokio::time::timeout(grace, server).await {
        Ok(result) => result.map_err(|e| Error::Http(format!("Server error: {}", e))),
        Err(_) => {
            warn!("HTTP connections still open after {:?}, closing", grace);
            Ok(())
        }
    }
}
