//! Physical button input
//!
//! Two input lines: Pause-toggle and Next. A rising edge on a line starts a
//! debounce window; the press is accepted only when enough samples in that
//! window read high. After an accepted press the line is locked out for its
//! bounce time. Accepted presses become ordinary controller commands.

use crate::controller::{Command, PlaybackController};
use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vitrine_common::config::ButtonsConfig;
use vitrine_common::events::PlaybackState;

/// One boolean input
pub trait InputLine: Send {
    fn is_high(&mut self) -> io::Result<bool>;

    fn name(&self) -> &str;
}

/// GPIO line exposed through a sysfs `value` file
pub struct SysfsLine {
    name: String,
    path: PathBuf,
}

impl SysfsLine {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl InputLine for SysfsLine {
    fn is_high(&mut self) -> io::Result<bool> {
        let value = fs::read_to_string(&self.path)?;
        Ok(value.trim() == "1")
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Sampling window applied after an edge
#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    pub samples: u32,
    pub interval: Duration,
    pub threshold: u32,
}

impl Debouncer {
    pub fn from_config(config: &ButtonsConfig) -> Self {
        Self {
            samples: config.samples,
            interval: Duration::from_micros(config.sample_interval_us),
            threshold: config.threshold,
        }
    }

    /// Sample `line` and decide whether the edge was a genuine press
    pub fn confirm(&self, line: &mut dyn InputLine) -> io::Result<bool> {
        let mut highs = 0;
        for _ in 0..self.samples {
            if line.is_high()? {
                highs += 1;
            }
            if !self.interval.is_zero() {
                thread::sleep(self.interval);
            }
        }
        debug!(
            "Debounce {}: {}/{} high (threshold {})",
            line.name(),
            highs,
            self.samples,
            self.threshold
        );
        Ok(highs > self.threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    PauseToggle,
    Next,
}

struct WatchedLine {
    action: ButtonAction,
    line: Box<dyn InputLine>,
    bounce: Duration,
    last_high: bool,
    locked_until: Option<Instant>,
}

/// Edge detection and lockout for a set of lines
pub struct ButtonMonitor {
    lines: Vec<WatchedLine>,
    debouncer: Debouncer,
}

impl ButtonMonitor {
    pub fn new(debouncer: Debouncer) -> Self {
        Self {
            lines: Vec::new(),
            debouncer,
        }
    }

    pub fn with_line(
        mut self,
        action: ButtonAction,
        line: Box<dyn InputLine>,
        bounce: Duration,
    ) -> Self {
        self.lines.push(WatchedLine {
            action,
            line,
            bounce,
            last_high: false,
            locked_until: None,
        });
        self
    }

    /// Build the monitor from config; `None` when buttons are disabled
    pub fn from_config(config: &ButtonsConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let mut monitor = Self::new(Debouncer::from_config(config));
        if let Some(path) = &config.pause_line {
            monitor = monitor.with_line(
                ButtonAction::PauseToggle,
                Box::new(SysfsLine::new("pause", path.clone())),
                Duration::from_millis(config.pause_bounce_ms),
            );
        }
        if let Some(path) = &config.next_line {
            monitor = monitor.with_line(
                ButtonAction::Next,
                Box::new(SysfsLine::new("next", path.clone())),
                Duration::from_millis(config.next_bounce_ms),
            );
        }
        if monitor.lines.is_empty() {
            warn!("Buttons enabled but no input lines configured");
            return None;
        }
        Some(monitor)
    }

    /// Sample every line once; returns the accepted presses
    pub fn poll_once(&mut self, now: Instant) -> Vec<ButtonAction> {
        let mut accepted = Vec::new();
        for watched in &mut self.lines {
            let high = match watched.line.is_high() {
                Ok(high) => high,
                Err(e) => {
                    debug!("Cannot read {} line: {}", watched.line.name(), e);
                    continue;
                }
            };
            let rising = high && !watched.last_high;
            watched.last_high = high;
            if !rising {
                continue;
            }
            if watched.locked_until.map(|t| now < t).unwrap_or(false) {
                debug!("{} press ignored (bounce lockout)", watched.line.name());
                continue;
            }

            match self.debouncer.confirm(watched.line.as_mut()) {
                Ok(true) => {
                    watched.locked_until = Some(now + watched.bounce);
                    accepted.push(watched.action);
                }
                Ok(false) => debug!("{} edge rejected as noise", watched.line.name()),
                Err(e) => warn!("Debounce read failed on {}: {}", watched.line.name(), e),
            }
        }
        accepted
    }
}

/// Map an accepted press to a controller command
pub fn dispatch(controller: &PlaybackController, action: ButtonAction) {
    let command = match action {
        ButtonAction::PauseToggle if controller.playback_state() == PlaybackState::Playing => {
            Command::Pause
        }
        ButtonAction::PauseToggle => Command::Play,
        ButtonAction::Next => Command::Next,
    };
    info!("Button {:?} -> {:?}", action, command);
    if let Err(e) = controller.execute(command) {
        warn!("Button command rejected: {}", e);
    }
}

/// Running monitor thread
pub struct ButtonMonitorHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ButtonMonitorHandle {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("Button monitor thread panicked");
            }
        }
    }
}

/// Start polling on a dedicated thread
pub fn spawn(
    mut monitor: ButtonMonitor,
    controller: Arc<PlaybackController>,
    poll: Duration,
) -> Result<ButtonMonitorHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let join = thread::Builder::new()
        .name("button-monitor".to_string())
        .spawn(move || {
            info!("Button monitor started ({} lines)", monitor.lines.len());
            while !stop_flag.load(Ordering::SeqCst) {
                for action in monitor.poll_once(Instant::now()) {
                    dispatch(&controller, action);
                }
                thread::sleep(poll);
            }
            debug!("Button monitor stopped");
        })
        .map_err(|e| Error::Internal(format!("cannot spawn button monitor: {}", e)))?;

    Ok(ButtonMonitorHandle {
        stop,
        join: Some(join),
    })
}
