//! Vitrine Player (vitrine-player) - Main entry point
//!
//! Kiosk playback service: loads the bootstrap config, optionally hands the
//! screen to the sync player, then runs the playback loop, the button
//! monitor and the HTTP control surface until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use vitrine_common::config::{load_or_default, ConfigResolver};
use vitrine_player::api::{self, AppContext};
use vitrine_player::buttons::{self, ButtonMonitor};
use vitrine_player::config::{Config, Overrides};
use vitrine_player::controller::{ControllerSettings, PlaybackController};
use vitrine_player::display::{CommandDisplay, DisplayClearer};
use vitrine_player::engine::{PlaybackEngine, ProcessBackend};
use vitrine_player::registry::CollectionRegistry;
use vitrine_player::shutdown::ShutdownCoordinator;
use vitrine_player::state::SharedState;
use vitrine_player::sync;

/// Command-line arguments for vitrine-player
#[derive(Parser, Debug)]
#[command(name = "vitrine-player")]
#[command(about = "Kiosk media playback controller")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "VITRINE_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "VITRINE_PORT")]
    port: Option<u16>,

    /// Bind address (overrides config)
    #[arg(long, env = "VITRINE_BIND")]
    bind: Option<String>,

    /// Media root holding the collections (overrides the configured candidates)
    #[arg(short, long, env = "VITRINE_MEDIA_ROOT")]
    media_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; the config file may lower or raise the level later
    let from_env = EnvFilter::try_from_default_env().ok();
    let level_from_env = from_env.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(from_env.unwrap_or_else(|| default_filter("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!(
        "Starting Vitrine Player v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config_path = ConfigResolver::new("vitrine")
        .with_cli_path(args.config.clone())
        .resolve();
    let toml = load_or_default(config_path.as_deref()).context("Failed to load config")?;

    // RUST_LOG wins over the config file
    if !level_from_env {
        if let Err(e) = filter_handle.reload(default_filter(&toml.logging.level)) {
            warn!("Cannot apply log level {}: {}", toml.logging.level, e);
        }
    }

    let config = Config::new(
        toml,
        Overrides {
            port: args.port,
            bind_address: args.bind,
            media_root: args.media_root,
        },
    );
    let addr = config.socket_addr().context("Invalid server address")?;

    let registry = CollectionRegistry::discover(&config.toml.media.roots, &config.toml.media.extensions)
        .context("No usable media root")?;
    info!("Media root: {}", registry.root().display());

    // Sync role owns the screen until the sync player exits
    if let Some(plan) = sync::plan(&config.toml.startup, registry.root()) {
        tokio::select! {
            result = sync::run(&plan) => {
                if let Err(e) = result {
                    warn!("Sync player failed: {}", e);
                }
            }
            _ = shutdown_signal() => {
                info!("Shutdown requested during sync playback");
                return Ok(());
            }
        }
    }

    let state = Arc::new(SharedState::new());
    let backend = Arc::new(ProcessBackend::from_config(&config.toml.player));
    let engine = Arc::new(PlaybackEngine::new(backend));
    let strays = engine.sweep_strays();
    if strays > 0 {
        info!("Killed {} player process(es) left by a previous run", strays);
    }
    let display: Arc<dyn DisplayClearer> = Arc::new(CommandDisplay::from_config(&config.toml.display));

    let controller = Arc::new(PlaybackController::new(
        registry,
        engine,
        Arc::clone(&display),
        Arc::clone(&state),
        ControllerSettings::from_config(&config.toml),
    ));
    controller
        .start()
        .context("Failed to start playback loop")?;

    let button_monitor = match ButtonMonitor::from_config(&config.toml.buttons) {
        Some(monitor) => Some(
            buttons::spawn(
                monitor,
                Arc::clone(&controller),
                Duration::from_millis(config.toml.buttons.edge_poll_ms),
            )
            .context("Failed to start button monitor")?,
        ),
        None => {
            info!("Buttons disabled");
            None
        }
    };

    let coordinator = Arc::new(ShutdownCoordinator::new(
        Arc::clone(&controller),
        display,
        config.toml.playback.teardown_timeout(),
    ));

    // Teardown starts on the shutdown request, not when the server drains
    let teardown = tokio::spawn(
        Arc::clone(&coordinator).shutdown_when_requested(Arc::clone(&state)),
    );

    let ctx = AppContext {
        state: Arc::clone(&state),
        controller,
    };
    if let Err(e) = api::run(addr, ctx, shutdown_signal(), config.toml.server.shutdown_grace()).await {
        error!("HTTP server stopped: {}", e);
    }
    state.request_shutdown();

    if let Some(monitor) = button_monitor {
        monitor.stop();
    }

    teardown.await.context("Shutdown task failed")?;

    info!("Vitrine Player stopped");
    Ok(())
}

/// Default filter for our crates at `level`
fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!(
        "vitrine_player={level},vitrine_common={level},tower_http={level}"
    ))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
