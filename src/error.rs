//! Error types for the refinery
//!
//! Defines one error enum covering all failure modes across the crate.
//! Uses thiserror for ergonomic error handling.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for refinery operations
pub type Result<T> = std::result::Result<T, RefineryError>;

/// Error type for refinery operations
#[derive(Error, Debug)]
pub enum RefineryError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Start requested while a live refinery owns the rig
    #[error("Refinery already running (PID {0})")]
    AlreadyRunning(u32),

    /// Stop or pause requested with no running refinery
    #[error("Refinery is not running")]
    NotRunning,

    /// Resume requested while not paused
    #[error("Refinery is not paused")]
    NotPaused,

    /// State lock held by a live process
    #[error("State lock {path} held by PID {pid}")]
    LockHeld { path: PathBuf, pid: u32 },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Git command errors
    #[error("Git error: {0}")]
    Git(#[from] gitcmd::Error),

    /// Branch discovery failures with no underlying git error
    #[error("Branch discovery error: {0}")]
    Discovery(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}
