use std::path::PathBuf;

use thiserror::Error;

use super::Lifecycle;

/// Errors starting or stopping a watcher. Per-file failures never surface
/// here; they are contained in `handle_file`.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch folder does not exist: {}", .0.display())]
    WatchRootMissing(PathBuf),

    #[error("cannot {action} a watcher that is {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: Lifecycle,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
}
