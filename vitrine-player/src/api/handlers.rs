//! HTTP request handlers
//!
//! Each control endpoint turns the request into a controller `Command` and
//! runs it on the blocking pool (commands take the controller lock and Stop
//! waits for teardown).

use crate::api::server::AppContext;
use crate::controller::{Command, CommandReply, Outcome, StatusSnapshot};
use crate::error::Error;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use vitrine_common::events::PlaybackState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct BuildInfoResponse {
    version: String,
    git_hash: String,
    build_timestamp: String,
    build_profile: String,
    uptime_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct SetCollectionRequest {
    collection: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SetCollectionResponse {
    status: String,
    collection: String,
    playback_state: PlaybackState,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    status: String,
    state: PlaybackState,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    status: String,
    message: String,
    killed: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    status: String,
    message: String,
    state: PlaybackState,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(code: StatusCode, message: impl Into<String>, state: PlaybackState) -> ApiError {
    (
        code,
        Json(ErrorResponse {
            status: "error".to_string(),
            message: message.into(),
            state,
        }),
    )
}

/// Map a controller error to a response; rejections are the client's fault
fn reject(err: Error, current: PlaybackState) -> ApiError {
    match err {
        Error::InvalidState { message, state } => {
            error_response(StatusCode::BAD_REQUEST, message, state)
        }
        Error::Config(message) => error_response(StatusCode::BAD_REQUEST, message, current),
        e if e.is_rejection() => error_response(StatusCode::BAD_REQUEST, e.to_string(), current),
        e => {
            error!("Command failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), current)
        }
    }
}

/// Run a command off the async runtime
async fn run_command(ctx: &AppContext, command: Command) -> Result<CommandReply, ApiError> {
    let controller = Arc::clone(&ctx.controller);
    let joined = tokio::task::spawn_blocking(move || {
        let result = controller.execute(command);
        (result, controller.playback_state())
    })
    .await;

    match joined {
        Ok((Ok(reply), _)) => Ok(reply),
        Ok((Err(e), current)) => Err(reject(e, current)),
        Err(e) => {
            error!("Command task failed: {}", e);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "command task failed",
                PlaybackState::Idle,
            ))
        }
    }
}

fn command_response(reply: CommandReply) -> Json<CommandResponse> {
    let (status, message) = match reply.outcome {
        Outcome::Started => ("started", None),
        Outcome::Resumed => ("resumed", None),
        Outcome::AlreadyPlaying => ("already_playing", None),
        Outcome::Paused => ("paused", None),
        Outcome::Stopped => ("stopped", None),
        Outcome::Skipped => ("skipped", None),
        Outcome::NothingToSkip => ("error", Some("No track currently playing".to_string())),
        Outcome::Switched { .. } | Outcome::Status(_) => ("ok", None),
    };
    Json(CommandResponse {
        status: status.to_string(),
        state: reply.state,
        message,
    })
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "vitrine-player".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /build_info - Build identification and uptime
pub async fn build_info(State(ctx): State<AppContext>) -> Json<BuildInfoResponse> {
    Json(BuildInfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
        uptime_seconds: ctx.state.uptime_seconds(),
    })
}

// ============================================================================
// Collection Endpoints
// ============================================================================

/// GET /collections - Names of the selectable collections
pub async fn list_collections(State(ctx): State<AppContext>) -> Json<Vec<String>> {
    let controller = Arc::clone(&ctx.controller);
    let names = tokio::task::spawn_blocking(move || {
        controller
            .collections()
            .into_iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
    })
    .await
    .unwrap_or_else(|e| {
        warn!("Collection listing failed: {}", e);
        Vec::new()
    });
    Json(names)
}

/// POST /set_collection - Switch to a collection and play it from the top
pub async fn set_collection(
    State(ctx): State<AppContext>,
    body: Bytes,
) -> Result<Json<SetCollectionResponse>, ApiError> {
    let collection = serde_json::from_slice::<SetCollectionRequest>(&body)
        .ok()
        .and_then(|req| req.collection)
        .filter(|name| !name.trim().is_empty());

    let Some(collection) = collection else {
        let current = ctx.controller.playback_state();
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "No collection specified",
            current,
        ));
    };

    info!("Collection switch request: {}", collection);
    let reply = run_command(&ctx, Command::SwitchCollection(collection)).await?;
    let collection = match reply.outcome {
        Outcome::Switched { collection, .. } => collection,
        _ => String::new(),
    };

    Ok(Json(SetCollectionResponse {
        status: "ok".to_string(),
        collection,
        playback_state: reply.state,
    }))
}

// ============================================================================
// Playback Control Endpoints
// ============================================================================

/// POST /play - Start or resume playback
pub async fn play(State(ctx): State<AppContext>) -> Result<Json<CommandResponse>, ApiError> {
    run_command(&ctx, Command::Play).await.map(command_response)
}

/// POST /pause - Pause playback
pub async fn pause(State(ctx): State<AppContext>) -> Result<Json<CommandResponse>, ApiError> {
    run_command(&ctx, Command::Pause).await.map(command_response)
}

/// POST /stop - Stop playback and clear the screen
pub async fn stop(State(ctx): State<AppContext>) -> Result<Json<CommandResponse>, ApiError> {
    run_command(&ctx, Command::Stop).await.map(command_response)
}

/// POST /next - Skip to the next file
pub async fn next(State(ctx): State<AppContext>) -> Result<Json<CommandResponse>, ApiError> {
    run_command(&ctx, Command::Next).await.map(command_response)
}

/// POST /emergency_cleanup - Kill every player process, ours and strays
pub async fn emergency_cleanup(State(ctx): State<AppContext>) -> Json<CleanupResponse> {
    warn!("Emergency cleanup requested");
    let controller = Arc::clone(&ctx.controller);
    let killed = tokio::task::spawn_blocking(move || controller.engine().emergency_cleanup())
        .await
        .unwrap_or_else(|e| {
            error!("Emergency cleanup task failed: {}", e);
            0
        });

    Json(CleanupResponse {
        status: "cleaned_up".to_string(),
        message: "All player processes terminated".to_string(),
        killed,
    })
}

/// GET /status - Controller snapshot
pub async fn status(State(ctx): State<AppContext>) -> Json<StatusSnapshot> {
    Json(ctx.controller.status())
}
