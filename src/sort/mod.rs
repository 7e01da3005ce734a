//! Per-file sorting: capture-date metadata, destination-path strategies, and
//! the copy/move/sync executor.

pub mod error;
pub mod metadata;
pub mod operation;
pub mod strategy;

pub use error::SortError;
pub use operation::OperationOutcome;
pub use strategy::{PathStrategy, file_extension, strategy_for};
