//! Watcher: one job's runtime state and its two producers.
//!
//! Live `notify` creation events and the periodic scan both feed
//! [`WatcherCore::handle_file`]. Every file is handled in its own task, so a
//! retry backoff on one file never holds up delivery of the next event. The
//! claim in [`SharedState`] guarantees a path reaches the operation executor
//! at most once at a time and never again after it succeeds.

pub mod error;
pub(crate) mod scan;
pub mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Job;
use crate::retry::{self, RetryAction, RetryConfig};
use crate::sort::{OperationOutcome, PathStrategy, SortError};

pub use error::WatchError;
pub use state::{Claim, SharedState, WatchStats};
use state::{ClaimGuard, QueueSlot};

/// Live events buffered between the notify thread and the event loop.
const EVENT_BUFFER: usize = 1024;

/// Size polls before a still-growing live file is handled anyway.
const MAX_SETTLE_POLLS: u32 = 30;

/// Where an event came from. Scan hits are never directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    Live,
    Scan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub is_directory: bool,
    pub origin: EventOrigin,
}

impl FileEvent {
    pub fn live(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            path: path.into(),
            is_directory,
            origin: EventOrigin::Live,
        }
    }

    pub fn scanned(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            origin: EventOrigin::Scan,
        }
    }
}

/// What `handle_file` decided for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Directory,
    /// Rejected earlier; not evaluated again.
    CachedUnsupported,
    /// Rejected now, by the extension filter or the strategy.
    Unsupported,
    /// Destination root missing; the file stays eligible.
    DestinationUnreachable,
    AlreadyProcessed,
    /// Another producer is handling the same path right now.
    InFlight,
    Done(OperationOutcome),
    /// Retries exhausted; the file stays eligible for the next scan.
    Failed,
    /// The watcher is stopping; the file was left untouched.
    Cancelled,
}

/// Knobs shared by every watcher the runner starts.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub retry: RetryConfig,
    /// Files handled concurrently per watcher.
    pub concurrency: usize,
    /// Poll interval while waiting for a live file to stop growing.
    pub settle: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            concurrency: 4,
            settle: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

/// The decision pipeline, shared by the event loop, the scan loop and the
/// per-file tasks they spawn.
pub(crate) struct WatcherCore {
    pub(crate) job: Job,
    strategy: Arc<dyn PathStrategy>,
    retry: RetryConfig,
    pub(crate) state: SharedState,
    permits: Semaphore,
    settle: Duration,
    cancel: CancellationToken,
}

impl WatcherCore {
    /// Spawn a tracked task for `event` unless the same path already has one
    /// waiting or running.
    pub(crate) fn dispatch(self: &Arc<Self>, tracker: &TaskTracker, event: FileEvent) {
        if event.is_directory {
            return;
        }
        if !self.state.enqueue(&event.path) {
            tracing::debug!(job = %self.job.name, path = %event.path.display(), "Already queued");
            return;
        }
        let slot = QueueSlot::new(self.state.clone(), event.path.clone());
        let core = self.clone();
        tracker.spawn(async move {
            let _slot = slot;
            core.handle_file(event).await;
        });
    }

    pub(crate) async fn handle_file(&self, event: FileEvent) -> HandleOutcome {
        let FileEvent {
            path,
            is_directory,
            origin,
        } = event;
        let job = self.job.name.as_str();

        if is_directory {
            return HandleOutcome::Directory;
        }

        if self.state.is_unsupported(&path) {
            tracing::debug!(job, path = %path.display(), "Skipping cached unsupported file");
            return HandleOutcome::CachedUnsupported;
        }

        if let Err(e) = self.admit(&path) {
            self.state.mark_unsupported(&path);
            tracing::info!(job, "Ignoring: {}", e);
            return HandleOutcome::Unsupported;
        }

        if origin == EventOrigin::Live {
            wait_until_settled(&path, self.settle, &self.cancel).await;
        }

        let Ok(_permit) = self.permits.acquire().await else {
            return HandleOutcome::Failed;
        };

        if self.cancel.is_cancelled() {
            tracing::debug!(job, path = %path.display(), "Stopping, leaving file for the next run");
            return HandleOutcome::Cancelled;
        }

        if let Err(e) = self.check_destination().await {
            tracing::warn!(job, path = %path.display(), "{}, will retry later", e);
            return HandleOutcome::DestinationUnreachable;
        }

        let guard = match self.state.claim(&path) {
            Claim::Claimed => ClaimGuard::new(self.state.clone(), path.clone()),
            Claim::AlreadyProcessed => {
                tracing::debug!(job, path = %path.display(), "Already processed");
                return HandleOutcome::AlreadyProcessed;
            }
            Claim::InFlight => {
                tracing::debug!(job, path = %path.display(), "Already being handled");
                return HandleOutcome::InFlight;
            }
            Claim::Unsupported => return HandleOutcome::CachedUnsupported,
        };

        tracing::info!(job, path = %path.display(), "Handling file");

        let dest = match self.build_destination(&path).await {
            Ok(Some(dest)) => dest,
            Ok(None) => {
                guard.reject();
                tracing::warn!(job, path = %path.display(), "No destination for file, marking unsupported");
                return HandleOutcome::Unsupported;
            }
            Err(e) => {
                tracing::error!(job, path = %path.display(), "Destination lookup failed: {}", e);
                return HandleOutcome::Failed;
            }
        };

        match self.run_operation(&path, &dest).await {
            Ok(outcome) => {
                guard.complete();
                tracing::info!(
                    job,
                    op = self.job.operation.as_str(),
                    path = %path.display(),
                    dest = %dest.display(),
                    ?outcome,
                    "Done"
                );
                HandleOutcome::Done(outcome)
            }
            Err(e) => {
                tracing::error!(
                    job,
                    op = self.job.operation.as_str(),
                    path = %path.display(),
                    "Giving up until next scan: {}",
                    e
                );
                HandleOutcome::Failed
            }
        }
    }

    fn admit(&self, path: &Path) -> Result<(), SortError> {
        if self.job.accepts(path) {
            Ok(())
        } else {
            Err(SortError::UnsupportedFileType(path.to_path_buf()))
        }
    }

    /// Existence check on the destination root. Removable and network
    /// drives come and go, so this runs for every file.
    async fn check_destination(&self) -> Result<(), SortError> {
        let root = self.job.dest_root.clone();
        let probe = root.clone();
        if tokio::task::spawn_blocking(move || probe.exists()).await? {
            Ok(())
        } else {
            Err(SortError::DestinationUnreachable(root))
        }
    }

    async fn build_destination(&self, src: &Path) -> Result<Option<PathBuf>, SortError> {
        let strategy = self.strategy.clone();
        let src = src.to_path_buf();
        let dest_root = self.job.dest_root.clone();
        Ok(tokio::task::spawn_blocking(move || strategy.build_destination_path(&src, &dest_root)).await?)
    }

    async fn run_operation(&self, src: &Path, dest: &Path) -> Result<OperationOutcome, SortError> {
        let kind = self.job.operation;
        retry::retry_with_backoff(
            &self.retry,
            |e: &SortError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || {
                let strategy = self.strategy.clone();
                let src = src.to_path_buf();
                let dest = dest.to_path_buf();
                async move {
                    tokio::task::spawn_blocking(move || strategy.execute_operation(kind, &src, &dest))
                        .await?
                }
            },
        )
        .await
    }
}

/// Wait until a freshly created file stops growing. Creation events arrive
/// before the writer has finished.
async fn wait_until_settled(path: &Path, interval: Duration, cancel: &CancellationToken) {
    if interval.is_zero() {
        return;
    }
    let mut last = None;
    for _ in 0..MAX_SETTLE_POLLS {
        let size = tokio::fs::metadata(path).await.map(|m| m.len()).ok();
        if size.is_some() && size == last {
            return;
        }
        last = size;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => return,
        }
    }
    tracing::debug!(path = %path.display(), "File still changing, handling anyway");
}

fn is_creation(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}

/// Owns one job's watcher lifecycle: `Idle -> Running -> Stopped`.
pub struct Watcher {
    core: Arc<WatcherCore>,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    tracker: TaskTracker,
    fs_watcher: Option<RecommendedWatcher>,
    loops: Vec<JoinHandle<()>>,
}

impl Watcher {
    /// `cancel` is usually a child of the process shutdown token, so a
    /// signal stops the loops even before `stop_watching` runs.
    pub fn new(
        job: Job,
        strategy: Arc<dyn PathStrategy>,
        options: WatcherOptions,
        cancel: CancellationToken,
    ) -> Self {
        let core = WatcherCore {
            job,
            strategy,
            retry: options.retry,
            state: SharedState::default(),
            permits: Semaphore::new(options.concurrency.max(1)),
            settle: options.settle,
            cancel: cancel.clone(),
        };
        Self {
            core: Arc::new(core),
            lifecycle: Lifecycle::Idle,
            cancel,
            tracker: TaskTracker::new(),
            fs_watcher: None,
            loops: Vec::new(),
        }
    }

    pub fn job(&self) -> &Job {
        &self.core.job
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn stats(&self) -> WatchStats {
        self.core.state.stats()
    }

    /// Run one event through the decision pipeline.
    pub async fn handle_file(&self, event: FileEvent) -> HandleOutcome {
        self.core.handle_file(event).await
    }

    /// Register the live watch and start the event and scan loops.
    pub fn start_watching(&mut self) -> Result<(), WatchError> {
        if self.lifecycle != Lifecycle::Idle {
            return Err(WatchError::InvalidTransition {
                action: "start",
                state: self.lifecycle,
            });
        }
        let root = self.core.job.watch_root.clone();
        if !root.is_dir() {
            return Err(WatchError::WatchRootMissing(root));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let job_name = self.core.job.name.clone();
        let mut fs_watcher = notify::recommended_watcher(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if !is_creation(&event.kind) {
                        return;
                    }
                    for path in event.paths {
                        let is_directory = path.is_dir();
                        if tx.blocking_send(FileEvent::live(path, is_directory)).is_err() {
                            tracing::debug!(job = %job_name, "Event loop gone, dropping event");
                        }
                    }
                }
                Err(e) => tracing::error!(job = %job_name, "Watch error: {}", e),
            },
        )?;
        fs_watcher.watch(&root, RecursiveMode::Recursive)?;
        self.fs_watcher = Some(fs_watcher);

        self.loops.push(tokio::spawn(event_loop(
            self.core.clone(),
            rx,
            self.cancel.clone(),
            self.tracker.clone(),
        )));
        self.loops.push(tokio::spawn(scan::scan_loop(
            self.core.clone(),
            self.cancel.clone(),
            self.tracker.clone(),
        )));

        self.lifecycle = Lifecycle::Running;
        tracing::info!(
            job = %self.core.job.name,
            watch = %root.display(),
            dest = %self.core.job.dest_root.display(),
            "Watching"
        );
        Ok(())
    }

    /// Deregister the live watch, stop both loops, and wait for in-flight
    /// files to finish. Queued files are abandoned. Stopping twice is a
    /// no-op.
    pub async fn stop_watching(&mut self) {
        if self.lifecycle == Lifecycle::Stopped {
            return;
        }

        // Dropping the notify watcher unregisters it and closes the sender.
        self.fs_watcher = None;
        self.cancel.cancel();
        for handle in self.loops.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!(job = %self.core.job.name, "Watcher loop failed: {}", e);
            }
        }
        self.tracker.close();
        self.tracker.wait().await;

        self.lifecycle = Lifecycle::Stopped;
        let stats = self.stats();
        tracing::info!(
            job = %self.core.job.name,
            processed = stats.processed,
            unsupported = stats.unsupported,
            "Stopped watching"
        );
    }
}

async fn event_loop(
    core: Arc<WatcherCore>,
    mut rx: mpsc::Receiver<FileEvent>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => core.dispatch(&tracker, event),
                None => break,
            },
        }
    }
    tracing::debug!(job = %core.job.name, "Event loop stopping");
}
