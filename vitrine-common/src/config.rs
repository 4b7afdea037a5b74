//! Bootstrap configuration loading and config file resolution
//!
//! Configuration is a single TOML file. Every section and every key is optional;
//! missing values fall back to built-in defaults that match a stock Raspberry Pi
//! kiosk image.
//!
//! Config file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. `VITRINE_CONFIG` environment variable
//! 3. User config (`~/.config/vitrine/config.toml`)
//! 4. System config (`/etc/vitrine/config.toml`)
//! 5. No file: compiled defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "VITRINE_CONFIG";

/// Complete bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub media: MediaConfig,
    pub player: PlayerConfig,
    pub display: DisplayConfig,
    pub buttons: ButtonsConfig,
    pub playback: PlaybackConfig,
    pub startup: StartupConfig,
    pub logging: LoggingConfig,
}

/// HTTP control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,

    /// How long open connections may take to finish once shutdown begins
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            shutdown_grace_ms: 3000,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Where collections live and which files count as playable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Candidate media roots, searched in order. The first one holding
    /// collections (or loose media files) wins.
    pub roots: Vec<PathBuf>,

    /// Playable file extensions, compared case-insensitively, without the dot
    pub extensions: Vec<String>,

    /// Collection selected once the startup stage is over
    pub initial_collection: Option<String>,

    /// Select the first collection automatically when no initial collection is configured
    pub autostart: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            roots: vec![
                PathBuf::from("/media/internal"),
                PathBuf::from("/media/videos"),
                PathBuf::from("/media"),
                PathBuf::from("/home/pi/videos"),
            ],
            extensions: ["mp4", "avi", "mkv", "mov", "m4v"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            initial_collection: None,
            autostart: true,
        }
    }
}

/// External player program
///
/// Arguments are templates: `{path}` is replaced by the media file and
/// `{audio_device}` by the value read from `audio_device_file`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub program: String,
    pub args: Vec<String>,

    /// Extra arguments appended for files flagged as loops (`loop.` in the name)
    pub loop_args: Vec<String>,

    /// File whose first character selects the ALSA output device
    pub audio_device_file: PathBuf,

    /// Device used when `audio_device_file` is missing or empty
    pub default_audio_device: String,

    /// Time between SIGTERM and SIGKILL when stopping the player
    pub stop_grace_ms: u64,

    /// Process names killed at startup and before every item when they do
    /// not belong to the current session (`cvlc` runs as `vlc`). Empty
    /// disables the sweep.
    pub stray_process_names: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            program: "cvlc".to_string(),
            args: [
                "--play-and-exit",
                "--fullscreen",
                "--no-osd",
                "-q",
                "-A",
                "alsa",
                "--alsa-audio-device",
                "hw:{audio_device}",
                "{path}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            loop_args: vec!["--input-repeat=999999999".to_string()],
            audio_device_file: PathBuf::from("/boot/alsa.txt"),
            default_audio_device: "0".to_string(),
            stop_grace_ms: 2000,
            stray_process_names: ["vlc", "cvlc", "omxplayer", "omxplayer.bin"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl PlayerConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Commands run (best-effort, in order) to blank the screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub clear_commands: Vec<Vec<String>>,
    pub command_timeout_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        let cmd = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            clear_commands: vec![
                cmd(&["sh", "-c", "cat /dev/zero > /dev/fb0 2>/dev/null || true"]),
                cmd(&["clear"]),
                cmd(&[
                    "sh",
                    "-c",
                    "echo 0 > /sys/class/graphics/fbcon/cursor_blink 2>/dev/null || true",
                ]),
            ],
            command_timeout_ms: 2000,
        }
    }
}

/// Physical buttons
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonsConfig {
    pub enabled: bool,

    /// sysfs value file of the Pause-toggle line (e.g. `/sys/class/gpio/gpio17/value`)
    pub pause_line: Option<PathBuf>,

    /// sysfs value file of the Next line
    pub next_line: Option<PathBuf>,

    /// Samples taken after an edge
    pub samples: u32,

    /// Delay between two samples
    pub sample_interval_us: u64,

    /// A press is accepted when more than this many samples read high
    pub threshold: u32,

    /// Lockout after an accepted Pause press
    pub pause_bounce_ms: u64,

    /// Lockout after an accepted Next press
    pub next_bounce_ms: u64,

    /// Edge detection poll period
    pub edge_poll_ms: u64,
}

impl Default for ButtonsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pause_line: None,
            next_line: None,
            samples: 200,
            sample_interval_us: 1000,
            threshold: 50,
            pause_bounce_ms: 234,
            next_bounce_ms: 1234,
            edge_poll_ms: 10,
        }
    }
}

/// What `Pause` does to the running session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseMode {
    /// Terminate the session; `Play` replays the paused file from its start
    #[default]
    Release,
    /// Pause the player in place; `Play` continues where it stopped
    Hold,
}

/// Playback loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub pause_mode: PauseMode,

    /// Maximum time the loop parks while idle/stopped before re-checking
    pub idle_poll_ms: u64,

    /// Wait after finding an empty playlist (longer than `idle_poll_ms`)
    pub empty_backoff_ms: u64,

    /// Upper bound of a single engine wait before the loop re-validates
    pub wait_slice_ms: u64,

    /// Pause between two consecutive items
    pub inter_item_gap_ms: u64,

    /// How long Stop and shutdown wait for the session to be released
    pub teardown_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            pause_mode: PauseMode::Release,
            idle_poll_ms: 1000,
            empty_backoff_ms: 5000,
            wait_slice_ms: 1000,
            inter_item_gap_ms: 0,
            teardown_timeout_ms: 5000,
        }
    }
}

impl PlaybackConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn empty_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_backoff_ms)
    }

    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_ms)
    }

    pub fn inter_item_gap(&self) -> Duration {
        Duration::from_millis(self.inter_item_gap_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    /// Reject timing combinations the loop cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.idle_poll_ms == 0 || self.wait_slice_ms == 0 {
            return Err(Error::Config(
                "playback.idle_poll_ms and playback.wait_slice_ms must be non-zero".to_string(),
            ));
        }
        if self.empty_backoff_ms <= self.idle_poll_ms {
            return Err(Error::Config(format!(
                "playback.empty_backoff_ms ({}) must be longer than playback.idle_poll_ms ({})",
                self.empty_backoff_ms, self.idle_poll_ms
            )));
        }
        Ok(())
    }
}

/// One-time startup stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Played once before regular scheduling, if the file exists
    pub boot_video: Option<PathBuf>,

    /// Look for sync flag files at startup
    pub sync_enabled: bool,

    /// Extra directories searched for sync flag files (collections are always searched)
    pub sync_search_dirs: Vec<PathBuf>,

    /// Program launched for the leader role; `{path}` is the sync video
    pub sync_leader_command: Vec<String>,

    /// Program launched for the follower role
    pub sync_follower_command: Vec<String>,
}

impl Default for StartupConfig {
    fn default() -> Self {
        let cmd = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            boot_video: Some(PathBuf::from("/home/pi/mp4museum-boot.mp4")),
            sync_enabled: true,
            sync_search_dirs: vec![PathBuf::from("/boot")],
            sync_leader_command: cmd(&["omxplayer-sync", "-u", "-m", "{path}"]),
            sync_follower_command: cmd(&["omxplayer-sync", "-u", "-l", "{path}"]),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Locates the config file following the documented priority order
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    app_name: String,
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            cli_path: None,
        }
    }

    /// Path given on the command line; always wins
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Resolve the config file to read, if any
    ///
    /// Explicit paths (CLI, environment) are returned even when the file does
    /// not exist so the loader can warn about it. Implicit locations are only
    /// returned when present.
    pub fn resolve(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        self.default_locations().into_iter().find(|p| p.exists())
    }

    fn default_locations(&self) -> Vec<PathBuf> {
        let mut locations = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            locations.push(dir.join(&self.app_name).join("config.toml"));
        }
        if cfg!(unix) {
            locations.push(PathBuf::from("/etc").join(&self.app_name).join("config.toml"));
        }
        locations
    }
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_toml_config(&content)
}

/// Parse TOML text into a config, validating playback timings
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    let config: TomlConfig = toml::from_str(content)?;
    config.playback.validate()?;
    Ok(config)
}

/// Load the config from the resolved path, degrading to defaults
///
/// A missing file is not fatal: a warning is logged and compiled defaults are
/// used. A file that exists but cannot be parsed is an error.
pub fn load_or_default(path: Option<&Path>) -> Result<TomlConfig> {
    match path {
        None => {
            info!("No config file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
        Some(path) if !path.exists() => {
            warn!(
                "Config file {} does not exist, using built-in defaults",
                path.display()
            );
            Ok(TomlConfig::default())
        }
        Some(path) => {
            let config = load_toml_config(path).map_err(|e| {
                Error::Config(format!("Failed to load {}: {}", path.display(), e))
            })?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        }
    }
}
