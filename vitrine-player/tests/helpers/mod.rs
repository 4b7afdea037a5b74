//! Test helpers for vitrine-player integration tests
//!
//! Provides:
//! - `FakeBackend`: media backend that records every engine call, counts
//!   open players and lets the test end the current item on demand
//! - `CountingDisplay`: display clearer that counts clears
//! - `MediaTree`: temporary media root with a few collections
//! - `Harness`: a started controller wired to the fakes

#![allow(dead_code)]

use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use vitrine_common::config::{PauseMode, PlaybackConfig};
use vitrine_player::controller::{ControllerSettings, PlaybackController};
use vitrine_player::display::DisplayClearer;
use vitrine_player::engine::{Completion, MediaBackend, MediaPlayer, PlaybackEngine};
use vitrine_player::error::{Error, Result};
use vitrine_player::registry::CollectionRegistry;
use vitrine_player::shutdown::ShutdownCoordinator;
use vitrine_player::state::SharedState;

pub const WAIT: Duration = Duration::from_secs(3);

/// One engine call observed by the fake backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Player constructed and started
    Loaded(PathBuf),
    Paused(PathBuf),
    Resumed(PathBuf),
    Released(PathBuf),
}

#[derive(Default)]
struct FakeInner {
    calls: Mutex<Vec<Call>>,
    changed: Condvar,
    open: AtomicUsize,
    max_open: AtomicUsize,
    sweeps: AtomicUsize,
    orphan_releases: AtomicUsize,
    current: Mutex<Option<Arc<Completion>>>,
    failing: Mutex<HashSet<PathBuf>>,
}

impl FakeInner {
    fn record(&self, call: Call) {
        self.calls.lock().push(call);
        self.changed.notify_all();
    }
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<FakeInner>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `load` fail for `path`
    pub fn fail_on(&self, path: &Path) {
        self.inner.failing.lock().insert(path.to_path_buf());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().clone()
    }

    pub fn loads(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Loaded(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn max_open(&self) -> usize {
        self.inner.max_open.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Times the engine asked for a stray-process sweep
    pub fn sweeps(&self) -> usize {
        self.inner.sweeps.load(Ordering::SeqCst)
    }

    pub fn orphan_releases(&self) -> usize {
        self.inner.orphan_releases.load(Ordering::SeqCst)
    }

    /// Block until `pred` holds for the call log; false on timeout
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&[Call]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut calls = self.inner.calls.lock();
        while !pred(&calls) {
            if self.inner.changed.wait_until(&mut calls, deadline).timed_out() {
                return pred(&calls);
            }
        }
        true
    }

    /// Wait until `path` has been loaded `times` times in total
    pub fn wait_loaded(&self, path: &Path, times: usize) -> bool {
        self.wait_for(WAIT, |calls| {
            calls
                .iter()
                .filter(|c| **c == Call::Loaded(path.to_path_buf()))
                .count()
                >= times
        })
    }

    pub fn wait_released(&self, path: &Path, times: usize) -> bool {
        self.wait_for(WAIT, |calls| {
            calls
                .iter()
                .filter(|c| **c == Call::Released(path.to_path_buf()))
                .count()
                >= times
        })
    }

    /// End the item currently playing, as if it reached its end
    pub fn finish_current(&self) {
        if let Some(completion) = self.inner.current.lock().take() {
            completion.finish();
        }
    }
}

struct FakePlayer {
    path: PathBuf,
    inner: Arc<FakeInner>,
}

impl MediaPlayer for FakePlayer {
    fn play(&mut self, completion: Arc<Completion>) -> Result<()> {
        *self.inner.current.lock() = Some(completion);
        self.inner.record(Call::Loaded(self.path.clone()));
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.inner.record(Call::Paused(self.path.clone()));
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.inner.record(Call::Resumed(self.path.clone()));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.inner.open.fetch_sub(1, Ordering::SeqCst);
        self.inner.current.lock().take();
        self.inner.record(Call::Released(self.path.clone()));
        Ok(())
    }
}

impl MediaBackend for FakeBackend {
    fn load(&self, path: &Path, _looping: bool) -> Result<Box<dyn MediaPlayer>> {
        if self.inner.failing.lock().contains(path) {
            return Err(Error::MediaLoad {
                path: path.to_path_buf(),
                reason: "injected failure".to_string(),
            });
        }
        let open = self.inner.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(FakePlayer {
            path: path.to_path_buf(),
            inner: Arc::clone(&self.inner),
        }))
    }

    fn release_orphans(&self) -> usize {
        self.inner.orphan_releases.fetch_add(1, Ordering::SeqCst);
        0
    }

    fn sweep_strays(&self) -> usize {
        self.inner.sweeps.fetch_add(1, Ordering::SeqCst);
        0
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[derive(Default)]
pub struct CountingDisplay {
    clears: AtomicUsize,
}

impl CountingDisplay {
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl DisplayClearer for CountingDisplay {
    fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Media root with collections `alpha` (3 files), `beta` (2 files), `empty`
/// and `loops` (a loop item followed by a regular one)
pub struct MediaTree {
    dir: TempDir,
}

impl MediaTree {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for (collection, files) in [
            ("alpha", &["a1.mp4", "a2.mp4", "a3.mp4"][..]),
            ("beta", &["b1.mp4", "b2.mp4"][..]),
            ("empty", &[][..]),
            ("loops", &["idle-loop.mp4", "intro.mp4"][..]),
        ] {
            fs::create_dir(root.join(collection)).unwrap();
            for file in files {
                fs::write(root.join(collection).join(file), b"").unwrap();
            }
        }
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, collection: &str, name: &str) -> PathBuf {
        self.dir.path().join(collection).join(name)
    }
}

pub fn fast_settings(pause_mode: PauseMode) -> ControllerSettings {
    ControllerSettings {
        playback: PlaybackConfig {
            pause_mode,
            idle_poll_ms: 20,
            empty_backoff_ms: 100,
            wait_slice_ms: 50,
            inter_item_gap_ms: 0,
            teardown_timeout_ms: 2000,
        },
        ..Default::default()
    }
}

/// Started controller wired to the fakes
pub struct Harness {
    pub controller: Arc<PlaybackController>,
    pub backend: FakeBackend,
    pub display: Arc<CountingDisplay>,
    pub state: Arc<SharedState>,
    pub media: MediaTree,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_settings(fast_settings(PauseMode::Release))
    }

    pub fn with_settings(settings: ControllerSettings) -> Self {
        let harness = Self::unstarted(settings);
        harness.controller.start().unwrap();
        harness
    }

    pub fn unstarted(settings: ControllerSettings) -> Self {
        let media = MediaTree::new();
        let backend = FakeBackend::new();
        let display = Arc::new(CountingDisplay::default());
        let state = Arc::new(SharedState::new());
        let registry = CollectionRegistry::new(media.root(), &["mp4".to_string()]);
        let engine = Arc::new(PlaybackEngine::new(Arc::new(backend.clone())));

        let controller = Arc::new(PlaybackController::new(
            registry,
            engine,
            Arc::clone(&display) as Arc<dyn DisplayClearer>,
            Arc::clone(&state),
            settings,
        ));

        Self {
            controller,
            backend,
            display,
            state,
            media,
        }
    }

    pub fn file(&self, collection: &str, name: &str) -> PathBuf {
        self.media.file(collection, name)
    }

    pub fn coordinator(&self) -> ShutdownCoordinator {
        ShutdownCoordinator::new(
            Arc::clone(&self.controller),
            Arc::clone(&self.display) as Arc<dyn DisplayClearer>,
            Duration::from_secs(2),
        )
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.controller.begin_shutdown();
        self.controller.wait_for_loop_exit(Duration::from_secs(2));
    }
}
