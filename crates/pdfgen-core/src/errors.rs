//! Error types for layout, staging, scheduling and rendering

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving a page layout
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("unknown orientation '{0}'")]
    InvalidOrientation(String),

    #[error("invalid page size preset '{0}'")]
    InvalidPreset(String),

    #[error("page size must be positive, got {width}x{height}mm")]
    InvalidSize { width: f64, height: f64 },

    #[error("margin must be a non-negative number of millimeters, got {0}")]
    InvalidMargin(f64),
}

/// Errors raised while staging an uploaded bundle
#[derive(Error, Debug)]
pub enum StageError {
    #[error("generation html is empty")]
    EmptyMainFile,

    #[error("file name '{0}' does not reduce to a bare file name")]
    InvalidFileName(String),

    #[error("duplicate file '{0}'")]
    DuplicateFile(String),

    #[error("file '{0}' was not supplied")]
    MissingFile(String),

    #[error("failed to prepare workdir '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    /// True for errors caused by the request itself rather than the host
    pub fn is_validation(&self) -> bool {
        !matches!(self, StageError::Io { .. })
    }
}

/// Errors reported by a render backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("failed to load '{url}': {message}")]
    Navigation { url: String, message: String },

    #[error("failed to print pdf: {0}")]
    Print(String),
}

/// Outcome of a scheduled render that did not produce bytes
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("render deadline exceeded")]
    DeadlineExceeded,

    #[error("render cancelled")]
    Cancelled,

    #[error("scheduler is closed")]
    Closed,

    #[error("render worker exited without a result")]
    WorkerLost,

    #[error(transparent)]
    Backend(#[from] BackendError),
}
