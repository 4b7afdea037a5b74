//! External player program backend
//!
//! Each media item runs as a child process of the configured player program
//! (VLC by default). A watcher thread waits on the child and reports the end
//! of playback through the item's `Completion`. Pause and resume map to
//! SIGSTOP/SIGCONT, stop to SIGTERM followed by SIGKILL after a grace period.

use super::signal::{CancelToken, Completion, Wake};
use super::{MediaBackend, MediaPlayer};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vitrine_common::config::PlayerConfig;

/// Read the ALSA device selector: first character of `file`, else `default`
pub fn read_audio_device(file: &Path, default: &str) -> String {
    match std::fs::read_to_string(file) {
        Ok(content) => match content.trim().chars().next() {
            Some(c) => c.to_string(),
            None => default.to_string(),
        },
        Err(_) => default.to_string(),
    }
}

/// Backend spawning one player process per media item
pub struct ProcessBackend {
    program: String,
    args: Vec<String>,
    loop_args: Vec<String>,
    audio_device: String,
    stop_grace: Duration,
    stray_names: Vec<String>,
    live_pids: Arc<Mutex<HashSet<u32>>>,
}

impl ProcessBackend {
    pub fn from_config(config: &PlayerConfig) -> Self {
        let audio_device =
            read_audio_device(&config.audio_device_file, &config.default_audio_device);
        info!(
            "Player program: {} (audio device {})",
            config.program, audio_device
        );
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            loop_args: config.loop_args.clone(),
            audio_device,
            stop_grace: config.stop_grace(),
            stray_names: config.stray_process_names.clone(),
            live_pids: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Expand the argument templates for one file
    pub fn build_args(&self, path: &Path, looping: bool) -> Vec<String> {
        let path = path.to_string_lossy();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{path}", &path)
                    .replace("{audio_device}", &self.audio_device)
            })
            .collect();
        if looping {
            args.extend(self.loop_args.iter().cloned());
        }
        args
    }

    /// Pids of processes named like a player that this backend did not start
    fn stray_pids(&self) -> Vec<u32> {
        let own = std::process::id();
        let live = self.live_pids.lock().clone();
        let mut pids: Vec<u32> = self
            .stray_names
            .iter()
            .flat_map(|name| pgrep(name))
            .filter(|pid| *pid != own && !live.contains(pid))
            .collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }
}

impl MediaBackend for ProcessBackend {
    fn load(&self, path: &Path, looping: bool) -> Result<Box<dyn MediaPlayer>> {
        File::open(path).map_err(|e| Error::MediaLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Box::new(ProcessPlayer {
            program: self.program.clone(),
            args: self.build_args(path, looping),
            path: path.to_path_buf(),
            stop_grace: self.stop_grace,
            live_pids: Arc::clone(&self.live_pids),
            pid: None,
            paused: false,
            completion: None,
            watcher: None,
        }))
    }

    fn release_orphans(&self) -> usize {
        let pids: Vec<u32> = self.live_pids.lock().drain().collect();
        for pid in &pids {
            warn!("Killing orphaned player process {}", pid);
            send_signal(*pid, "-CONT");
            send_signal(*pid, "-KILL");
        }
        pids.len()
    }

    fn sweep_strays(&self) -> usize {
        let pids = self.stray_pids();
        if pids.is_empty() {
            return 0;
        }

        for pid in &pids {
            warn!("Terminating stray player process {}", pid);
            send_signal(*pid, "-CONT");
            send_signal(*pid, "-TERM");
        }

        let deadline = Instant::now() + self.stop_grace;
        let mut remaining = pids.clone();
        while !remaining.is_empty() && Instant::now() < deadline {
            thread::sleep(STRAY_POLL);
            remaining.retain(|pid| is_alive(*pid));
        }
        for pid in &remaining {
            warn!("Stray player {} ignored SIGTERM, killing", pid);
            send_signal(*pid, "-KILL");
        }
        pids.len()
    }

    fn name(&self) -> &str {
        &self.program
    }
}

struct ProcessPlayer {
    program: String,
    args: Vec<String>,
    path: PathBuf,
    stop_grace: Duration,
    live_pids: Arc<Mutex<HashSet<u32>>>,
    pid: Option<u32>,
    paused: bool,
    completion: Option<Arc<Completion>>,
    watcher: Option<JoinHandle<()>>,
}

impl ProcessPlayer {
    fn join_watcher(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            if watcher.join().is_err() {
                warn!("Player watcher for {} panicked", self.path.display());
            }
        }
    }

    fn running(&self) -> Option<u32> {
        match (&self.completion, self.pid) {
            (Some(completion), Some(pid)) if !completion.is_finished() => Some(pid),
            _ => None,
        }
    }
}

impl MediaPlayer for ProcessPlayer {
    fn play(&mut self, completion: Arc<Completion>) -> Result<()> {
        // A looping restart reuses this player; the previous child is gone
        self.join_watcher();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::EngineInit(format!("cannot start {}: {}", self.program, e)))?;

        let pid = child.id();
        self.live_pids.lock().insert(pid);
        debug!("Started {} (pid {}) for {}", self.program, pid, self.path.display());

        let live_pids = Arc::clone(&self.live_pids);
        let done = Arc::clone(&completion);
        let watcher = thread::Builder::new()
            .name(format!("player-{}", pid))
            .spawn(move || {
                match child.wait() {
                    Ok(status) => debug!("Player pid {} exited: {}", pid, status),
                    Err(e) => warn!("Failed to wait on player pid {}: {}", pid, e),
                }
                live_pids.lock().remove(&pid);
                done.finish();
            })
            .map_err(|e| Error::EngineInit(format!("cannot spawn watcher: {}", e)))?;

        self.pid = Some(pid);
        self.paused = false;
        self.completion = Some(completion);
        self.watcher = Some(watcher);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let pid = self
            .running()
            .ok_or_else(|| Error::Internal("player is not running".to_string()))?;
        send_signal(pid, "-STOP");
        self.paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let pid = self
            .running()
            .ok_or_else(|| Error::Internal("player is not running".to_string()))?;
        send_signal(pid, "-CONT");
        self.paused = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let (Some(pid), Some(completion)) = (self.running(), self.completion.clone()) else {
            return Ok(());
        };

        if self.paused {
            send_signal(pid, "-CONT");
            self.paused = false;
        }
        send_signal(pid, "-TERM");

        let token = CancelToken::new();
        completion.subscribe(&token);
        let wake = token.wait_until(Instant::now() + self.stop_grace, || completion.is_finished());
        if wake != Wake::Condition {
            warn!(
                "Player pid {} ignored SIGTERM for {:?}, killing",
                pid, self.stop_grace
            );
            send_signal(pid, "-KILL");
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.stop()?;
        self.join_watcher();
        self.completion = None;
        self.pid = None;
        Ok(())
    }
}

/// Interval between liveness checks while strays exit
const STRAY_POLL: Duration = Duration::from_millis(50);

/// Pids whose process name is exactly `name`
fn pgrep(name: &str) -> Vec<u32> {
    match Command::new("pgrep").arg("-x").arg(name).output() {
        Ok(output) => String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect(),
        Err(e) => {
            debug!("pgrep {} unavailable: {}", name, e);
            Vec::new()
        }
    }
}

fn is_alive(pid: u32) -> bool {
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn send_signal(pid: u32, signal: &str) {
    match Command::new("kill")
        .arg(signal)
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if !status.success() => {
            debug!("kill {} {} exited with {}", signal, pid, status)
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to run kill {} {}: {}", signal, pid, e),
    }
}
