//! Error types for the segmentation pipeline.

use std::fmt;

/// Errors that can abort a segmentation run.
#[derive(Debug, Clone)]
pub enum SegmentationError {
    /// A parameter value is out of its valid range. Raised before any work
    /// is dispatched.
    InvalidConfig(String),

    /// The worker pool could not be constructed.
    ThreadPool(String),

    /// A worker task panicked. This indicates a bug, not bad input.
    WorkerPanic,

    /// A task observed the cancellation flag and returned early. Only ever
    /// raised after another task has already failed.
    Cancelled,
}

impl fmt::Display for SegmentationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentationError::InvalidConfig(msg) => {
                write!(f, "invalid configuration: {}", msg)
            }
            SegmentationError::ThreadPool(msg) => {
                write!(f, "worker pool construction failed: {}", msg)
            }
            SegmentationError::WorkerPanic => {
                write!(f, "a worker task panicked")
            }
            SegmentationError::Cancelled => {
                write!(f, "task cancelled")
            }
        }
    }
}

impl std::error::Error for SegmentationError {}
