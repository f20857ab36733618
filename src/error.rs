//! Error types for the consolidation pipeline
//!
//! `MergeError` carries the error kinds of the pipeline's error policy.
//! Recoverable conditions (unreadable source entries, attribute parse
//! failures, provenance hash mismatches) are handled in place by the
//! components and never reach this type; everything here is fatal to a
//! phase or to the process.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, MergeError>;

/// Fatal error conditions of the consolidation pipeline
#[derive(Error, Debug)]
pub enum MergeError {
    /// A required external tool is not on PATH (preflight)
    #[error("required tool not found: {0}")]
    MissingTool(String),

    /// Mutating phases require elevated privilege (preflight)
    #[error("not privileged: {0}")]
    NotPrivileged(String),

    /// File system failure (destination writes, walks, run-directory I/O)
    #[error("file system error: {0}")]
    FileSystem(String),

    /// Malformed CSV content in a persisted artifact
    #[error("CSV format error: {0}")]
    Csv(String),

    /// The manifest phase cannot proceed (missing provenance, bad headers)
    #[error("manifest input invalid: {0}")]
    InvalidManifest(String),

    /// Cooperative cancellation (SIGINT) observed at a file boundary
    #[error("cancelled by signal")]
    Cancelled,

    /// A phase failed; names the current action and where the partial
    /// artifacts were retained
    #[error("{action} failed (artifacts retained in {}): {source}", .run_dir.display())]
    PhaseFailed {
        /// Current-action label at the time of failure
        action: String,
        /// Run directory holding the partial artifacts
        run_dir: PathBuf,
        /// Underlying failure
        source: Box<MergeError>,
    },
}

impl MergeError {
    /// Shorthand for the ubiquitous file-system variant
    pub fn fs(msg: impl Into<String>) -> Self {
        Self::FileSystem(msg.into())
    }
}
