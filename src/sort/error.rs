use std::path::PathBuf;

use thiserror::Error;

/// Typed per-file errors enabling retry classification.
///
/// `is_retryable()` separates transient failures (I/O on a file still being
/// written, a flaky decoder) from terminal ones (unknown file type, a job
/// asking for an operation that doesn't exist) so the retry loop can stop
/// early.
#[derive(Debug, Error)]
pub enum SortError {
    #[error("Unsupported file type: {}", .0.display())]
    UnsupportedFileType(PathBuf),

    #[error("Failed to read metadata from {}: {reason}", path.display())]
    MetadataExtraction { path: PathBuf, reason: String },

    #[error("Destination root is unreachable: {}", .0.display())]
    DestinationUnreachable(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SortError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn metadata(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::MetadataExtraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            SortError::MetadataExtraction { .. } => true,
            SortError::Io { .. } => true,
            SortError::UnsupportedFileType(_) => false,
            SortError::DestinationUnreachable(_) => false,
            SortError::Join(_) => false,
        }
    }
}
