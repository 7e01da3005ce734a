//! Periodic full-tree scan, the backstop for live events that were missed
//! before registration or dropped by the notification backend.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use walkdir::WalkDir;

use super::state::SharedState;
use super::{FileEvent, WatcherCore};
use crate::config::Job;

/// Walk the watch root and return files that still need handling: allowed
/// by the job, not cached as unsupported, not processed, and without a task
/// already queued or running.
pub(crate) fn pending_files(job: &Job, state: &SharedState) -> Vec<PathBuf> {
    WalkDir::new(&job.watch_root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                tracing::debug!(job = %job.name, "Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| {
            job.accepts(p)
                && !state.is_unsupported(p)
                && !state.is_processed(p)
                && !state.is_pending(p)
        })
        .collect()
}

/// Scan immediately, then every `scan_interval` until cancelled. Each hit is
/// handled in its own tracked task.
pub(crate) async fn scan_loop(
    core: Arc<WatcherCore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let scan_core = core.clone();
        let pending = tokio::task::spawn_blocking(move || {
            pending_files(&scan_core.job, &scan_core.state)
        })
        .await;

        match pending {
            Ok(paths) => {
                if !paths.is_empty() {
                    tracing::info!(job = %core.job.name, count = paths.len(), "Scan found files to handle");
                }
                for path in paths {
                    if cancel.is_cancelled() {
                        break;
                    }
                    core.dispatch(&tracker, FileEvent::scanned(path));
                }
            }
            Err(e) => tracing::error!(job = %core.job.name, "Scan task failed: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(core.job.scan_interval) => {}
            _ = cancel.cancelled() => {
                tracing::debug!(job = %core.job.name, "Scan loop stopping");
                break;
            }
        }
    }
}
