//! Error types for the snapkeep library
//!
//! This module defines every error a backup cycle can produce. Errors carry
//! enough context to be reported verbatim in an outcome notification, and each
//! one can be classified into the cycle stage that produced it so the runner
//! can tell a failed snapshot apart from a failed cleanup.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the snapkeep library
pub type Result<T> = std::result::Result<T, SnapError>;

/// Stage of a backup cycle that an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Before any write: lock acquisition, configuration, free-space gate
    Preflight,
    /// Creating the new snapshot or updating the chain pointer
    Snapshot,
    /// Pruning old snapshots after a successful snapshot
    Retention,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureStage::Preflight => write!(f, "preflight"),
            FailureStage::Snapshot => write!(f, "snapshot"),
            FailureStage::Retention => write!(f, "retention"),
        }
    }
}

/// Main error type for all snapkeep operations
#[derive(Debug, Error)]
pub enum SnapError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O errors while preparing the destination, before any snapshot data is written
    #[error("Pre-flight IO error: {0}")]
    PreflightIo(#[source] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Free space on the destination is below the configured threshold
    #[error("Not enough disk space for backup! Only {free_percent:.2}% free.")]
    InsufficientSpace {
        /// Measured free space in percent
        free_percent: f64,
        /// Required minimum in percent
        threshold: f64,
    },

    /// The mirroring copy exited abnormally
    #[error("Snapshot failed: {0}")]
    CopyFailed(String),

    /// Deleting the oldest snapshot failed
    #[error("Failed to delete oldest snapshot {path:?}: {reason}")]
    Retention {
        /// Snapshot that could not be removed
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Delivery of an outcome notification failed
    #[error("Notification failed: {0}")]
    Notify(String),

    /// Another cycle holds the destination lock
    #[error("Backup already running: lock held on {0:?}")]
    AlreadyRunning(PathBuf),

    /// A snapshot with the generated name already exists
    #[error("Snapshot already exists: {0:?}")]
    SnapshotExists(PathBuf),

    /// Directory name is not a snapshot timestamp
    #[error("Invalid snapshot name: {0}")]
    InvalidSnapshotName(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Exclude pattern could not be compiled
    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<globset::Error> for SnapError {
    fn from(err: globset::Error) -> Self {
        SnapError::InvalidPattern(err.to_string())
    }
}

impl SnapError {
    /// Create a copy failure with a custom message
    pub fn copy_failed(msg: impl Into<String>) -> Self {
        SnapError::CopyFailed(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        SnapError::InvalidConfiguration(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        SnapError::Internal(msg.into())
    }

    /// Reclassify a plain I/O error as a pre-flight failure
    pub fn into_preflight(self) -> Self {
        match self {
            SnapError::Io(e) => SnapError::PreflightIo(e),
            other => other,
        }
    }

    /// Stage of the cycle this error aborts
    ///
    /// Plain I/O errors default to [`FailureStage::Snapshot`]. The runner
    /// rewraps the ones raised before the snapshot stage with
    /// [`into_preflight`](Self::into_preflight).
    pub fn stage(&self) -> FailureStage {
        match self {
            SnapError::InsufficientSpace { .. }
            | SnapError::PreflightIo(_)
            | SnapError::AlreadyRunning(_)
            | SnapError::InvalidConfiguration(_)
            | SnapError::InvalidPattern(_) => FailureStage::Preflight,
            SnapError::Retention { .. } => FailureStage::Retention,
            _ => FailureStage::Snapshot,
        }
    }

    /// Whether the data already on disk is still intact after this error
    pub fn is_data_intact(&self) -> bool {
        !matches!(self.stage(), FailureStage::Snapshot)
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            SnapError::AlreadyRunning(path) => {
                format!(
                    "Another backup is already running (lock {:?}). Wait for it to finish or remove a stale lock holder.",
                    path
                )
            }
            SnapError::SnapshotExists(path) => {
                format!(
                    "Snapshot {:?} already exists. Backups started within the same second collide; retry in a moment.",
                    path
                )
            }
            SnapError::InsufficientSpace { free_percent, threshold } => {
                format!(
                    "Only {:.2}% free on the backup destination, {:.2}% required. Free up space or lower the threshold.",
                    free_percent, threshold
                )
            }
            _ => self.to_string(),
        }
    }
}
