//! Per-watcher bookkeeping shared by the live-event and scan producers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Result of trying to take ownership of a path for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Claimed,
    AlreadyProcessed,
    InFlight,
    Unsupported,
}

/// Counts reported at shutdown and in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub processed: usize,
    pub unsupported: usize,
    pub in_flight: usize,
}

/// `processed` and `unsupported` only grow and never share a path.
/// `in_flight` holds paths claimed by a handler that has not finished yet.
/// `queued` holds paths with a spawned task, waiting or running, so each
/// path has at most one.
#[derive(Debug, Default)]
struct WatchState {
    processed: HashSet<PathBuf>,
    unsupported: HashSet<PathBuf>,
    in_flight: HashSet<PathBuf>,
    queued: HashSet<PathBuf>,
}

/// Mutex-guarded [`WatchState`]. The lock is never held across an await or
/// a filesystem call.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<WatchState>>,
}

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, WatchState> {
        // A panicking handler can't leave the sets half-updated: every
        // mutation is a single insert/remove.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_unsupported(&self, path: &Path) -> bool {
        self.lock().unsupported.contains(path)
    }

    pub fn is_processed(&self, path: &Path) -> bool {
        self.lock().processed.contains(path)
    }

    /// Record a path as permanently unsupported. No-op for processed paths.
    pub fn mark_unsupported(&self, path: &Path) {
        let mut state = self.lock();
        if !state.processed.contains(path) {
            state.in_flight.remove(path);
            state.unsupported.insert(path.to_path_buf());
        }
    }

    /// Reserve the single task slot for `path`. `false` when a task for it
    /// is already queued or running.
    pub fn enqueue(&self, path: &Path) -> bool {
        self.lock().queued.insert(path.to_path_buf())
    }

    pub fn dequeue(&self, path: &Path) {
        self.lock().queued.remove(path);
    }

    /// Whether a task for `path` is queued or the path is claimed.
    pub fn is_pending(&self, path: &Path) -> bool {
        let state = self.lock();
        state.queued.contains(path) || state.in_flight.contains(path)
    }

    /// Atomically check both caches and the in-flight set, claiming the path
    /// when nobody else has.
    pub fn claim(&self, path: &Path) -> Claim {
        let mut state = self.lock();
        if state.processed.contains(path) {
            Claim::AlreadyProcessed
        } else if state.unsupported.contains(path) {
            Claim::Unsupported
        } else if !state.in_flight.insert(path.to_path_buf()) {
            Claim::InFlight
        } else {
            Claim::Claimed
        }
    }

    /// Move a claimed path into `processed`.
    pub fn complete(&self, path: &Path) {
        let mut state = self.lock();
        state.in_flight.remove(path);
        state.processed.insert(path.to_path_buf());
    }

    /// Drop a claim without recording anything, leaving the path eligible
    /// for the next event or scan.
    pub fn release(&self, path: &Path) {
        self.lock().in_flight.remove(path);
    }

    pub fn stats(&self) -> WatchStats {
        let state = self.lock();
        WatchStats {
            processed: state.processed.len(),
            unsupported: state.unsupported.len(),
            in_flight: state.in_flight.len(),
        }
    }
}

/// Releases a claim on drop unless it was completed or converted to
/// unsupported, so a cancelled or panicking handler never strands a path.
pub(crate) struct ClaimGuard {
    state: SharedState,
    path: PathBuf,
    settled: bool,
}

impl ClaimGuard {
    pub(crate) fn new(state: SharedState, path: PathBuf) -> Self {
        Self {
            state,
            path,
            settled: false,
        }
    }

    pub(crate) fn complete(mut self) {
        self.state.complete(&self.path);
        self.settled = true;
    }

    pub(crate) fn reject(mut self) {
        self.state.mark_unsupported(&self.path);
        self.settled = true;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.state.release(&self.path);
        }
    }
}

/// Frees a path's task slot when the task finishes or is dropped.
pub(crate) struct QueueSlot {
    state: SharedState,
    path: PathBuf,
}

impl QueueSlot {
    /// Wrap a slot already taken with [`SharedState::enqueue`].
    pub(crate) fn new(state: SharedState, path: PathBuf) -> Self {
        Self { state, path }
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.state.dequeue(&self.path);
    }
}
