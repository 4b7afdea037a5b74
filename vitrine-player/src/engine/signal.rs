//! Cancellation token and completion notification
//!
//! The playback loop blocks in exactly one place: waiting for the current
//! media item. That wait must end as soon as either
//! - the player reports that the item finished (`Completion::finish`), or
//! - a command cancels the session (`CancelToken::cancel`).
//!
//! Both paths signal the same condition variable (the token's), so the waiter
//! wakes immediately without polling.
//!
//! Lock order: token state may be held while reading completion state, never
//! the other way round. `Completion` releases its lock before waking tokens.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Instant;

/// Why a session was cancelled
///
/// Ordered by precedence: when several cancellations race, the strongest
/// reason is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CancelReason {
    /// Skip to the following playlist entry
    Next,
    /// Pause requested
    Pause,
    /// Collection selection changed
    Switch,
    /// Explicit user stop
    Stop,
    /// Process termination
    Shutdown,
}

#[derive(Debug, Default)]
struct TokenState {
    reason: Option<CancelReason>,
}

#[derive(Debug, Default)]
struct TokenInner {
    state: Mutex<TokenState>,
    cond: Condvar,
}

/// Lightweight cancellation signal for one wait phase of a session
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

/// Result of `CancelToken::wait_until`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Cancelled(CancelReason),
    Condition,
    TimedOut,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel with `reason`; returns true if the effective reason changed
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let mut state = self.inner.state.lock();
        let changed = match state.reason {
            Some(current) if current >= reason => false,
            _ => {
                state.reason = Some(reason);
                true
            }
        };
        drop(state);
        self.inner.cond.notify_all();
        changed
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.state.lock().reason
    }

    /// Wake waiters so they re-check their condition
    pub fn wake(&self) {
        let _guard = self.inner.state.lock();
        self.inner.cond.notify_all();
    }

    /// Block until cancelled, `condition` holds, or `deadline` passes
    ///
    /// Cancellation wins over the condition when both are true.
    pub fn wait_until(&self, deadline: Instant, mut condition: impl FnMut() -> bool) -> Wake {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(reason) = state.reason {
                return Wake::Cancelled(reason);
            }
            if condition() {
                return Wake::Condition;
            }
            if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                if let Some(reason) = state.reason {
                    return Wake::Cancelled(reason);
                }
                return if condition() {
                    Wake::Condition
                } else {
                    Wake::TimedOut
                };
            }
        }
    }

    fn same(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug, Default)]
struct CompletionState {
    finished: bool,
    listeners: Vec<CancelToken>,
}

/// Completion notification for one run of a media player
///
/// Players call `finish` from whatever context observes the end of playback
/// (a watcher thread, a backend callback).
#[derive(Debug, Default)]
pub struct Completion {
    state: Mutex<CompletionState>,
}

impl Completion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark finished and wake every subscribed token
    pub fn finish(&self) {
        let listeners = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            state.listeners.clone()
        };
        for token in listeners {
            token.wake();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Wake `token` when this run finishes (immediately if it already has)
    pub fn subscribe(&self, token: &CancelToken) {
        let finished = {
            let mut state = self.state.lock();
            if !state.listeners.iter().any(|t| t.same(token)) {
                state.listeners.push(token.clone());
            }
            state.finished
        };
        if finished {
            token.wake();
        }
    }
}
