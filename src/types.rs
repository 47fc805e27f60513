//! Core data types used throughout the snapkeep library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Snapshots**: [`Snapshot`] - a timestamp-named directory under the snapshot root
//! - **Copy results**: [`MirrorStats`] - what a mirroring copy did
//! - **Cycle results**: [`BackupOutcome`] - the single report a backup cycle produces
//!
//! ## Snapshot naming
//!
//! Snapshots are named with the UTC time at which the cycle started, using the
//! zero-padded format `YYYY-MM-DD_HH-MM-SS`. Because every field is fixed width,
//! sorting names lexically sorts snapshots chronologically.
//!
//! ```rust
//! use snapkeep::types::Snapshot;
//! use chrono::NaiveDate;
//!
//! let at = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap().and_hms_opt(4, 5, 6).unwrap();
//! let name = Snapshot::format_name(at);
//! assert_eq!(name, "2025-03-07_04-05-06");
//! assert_eq!(Snapshot::parse_name(&name).unwrap(), at);
//! ```

use crate::error::{FailureStage, Result, SnapError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `strftime` format of snapshot directory names
pub const SNAPSHOT_NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Suffix of a snapshot directory that is still being built
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Subject of a fully successful cycle notification
pub const SUBJECT_SUCCESS: &str = "Backup Successful";

/// Subject of a cycle that failed before or during the snapshot
pub const SUBJECT_FAILURE: &str = "Backup Failed";

/// Subject of a cycle whose snapshot succeeded but whose cleanup failed
pub const SUBJECT_CLEANUP_FAILURE: &str = "Backup Cleanup Failed";

/// Format used for human-readable times in notification bodies
pub const REPORT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A completed snapshot directory
///
/// Snapshots are immutable once created. They are ordered by name, which is
/// equivalent to ordering them by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Directory name, the timestamp string
    pub name: String,
    /// Absolute location of the snapshot directory
    pub path: PathBuf,
    /// Creation time derived from the name
    pub created_at: NaiveDateTime,
}

impl Snapshot {
    /// Build a snapshot record from its directory path
    ///
    /// # Errors
    ///
    /// - [`SnapError::InvalidSnapshotName`] if the final path component is not
    ///   a snapshot timestamp
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SnapError::InvalidSnapshotName(path.display().to_string()))?;
        let created_at = Self::parse_name(name)?;

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            created_at,
        })
    }

    /// Render a timestamp as a snapshot name
    pub fn format_name(at: NaiveDateTime) -> String {
        at.format(SNAPSHOT_NAME_FORMAT).to_string()
    }

    /// Parse a snapshot name back into its timestamp
    ///
    /// Only the exact zero-padded form is accepted, so a name that parses
    /// always sorts correctly against every other snapshot name.
    pub fn parse_name(name: &str) -> Result<NaiveDateTime> {
        let at = NaiveDateTime::parse_from_str(name, SNAPSHOT_NAME_FORMAT)
            .map_err(|_| SnapError::InvalidSnapshotName(name.to_string()))?;
        if Self::format_name(at) != name {
            return Err(SnapError::InvalidSnapshotName(name.to_string()));
        }
        Ok(at)
    }

    /// Whether `name` is a valid snapshot name
    pub fn is_snapshot_name(name: &str) -> bool {
        Self::parse_name(name).is_ok()
    }
}

impl PartialOrd for Snapshot {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Snapshot {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

/// Statistics reported by a mirroring copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorStats {
    /// Regular files whose bytes were written
    pub files_copied: usize,
    /// Regular files hard-linked against the link-reference
    pub files_linked: usize,
    /// Previous versions relocated into the archive
    pub files_archived: usize,
    /// Directories created in the destination
    pub dirs_created: usize,
    /// Symbolic links recreated in the destination
    pub symlinks: usize,
    /// Bytes written for copied files
    pub bytes_copied: u64,
    /// Bytes shared with the link-reference
    pub bytes_linked: u64,
}

impl MirrorStats {
    /// Total number of regular files placed in the destination
    pub fn total_files(&self) -> usize {
        self.files_copied + self.files_linked
    }

    /// Fold another set of counters into this one
    pub fn merge(&mut self, other: &MirrorStats) {
        self.files_copied += other.files_copied;
        self.files_linked += other.files_linked;
        self.files_archived += other.files_archived;
        self.dirs_created += other.dirs_created;
        self.symlinks += other.symlinks;
        self.bytes_copied += other.bytes_copied;
        self.bytes_linked += other.bytes_linked;
    }
}

/// Result of one backup cycle
///
/// Exactly one outcome is produced per cycle and handed to the notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupOutcome {
    /// Whether every stage succeeded
    pub success: bool,
    /// Notification subject
    pub subject: String,
    /// Human-readable report, used as the notification body
    pub message: String,
    /// Stringified error, if any stage failed
    pub error: Option<String>,
    /// Stage that failed, if any
    pub stage: Option<FailureStage>,
    /// Snapshot created by this cycle, if the snapshot stage succeeded
    pub snapshot: Option<PathBuf>,
    /// Snapshot removed by retention, if any
    pub pruned: Option<PathBuf>,
    /// Copy statistics, if the snapshot stage succeeded
    pub stats: Option<MirrorStats>,
}

impl BackupOutcome {
    /// Outcome of a fully successful cycle
    pub fn succeeded(
        finished_at: NaiveDateTime,
        snapshot: PathBuf,
        pruned: Option<PathBuf>,
        stats: MirrorStats,
    ) -> Self {
        Self {
            success: true,
            subject: SUBJECT_SUCCESS.to_string(),
            message: format!(
                "Backup and cleanup completed successfully at {}.",
                finished_at.format(REPORT_TIME_FORMAT)
            ),
            error: None,
            stage: None,
            snapshot: Some(snapshot),
            pruned,
            stats: Some(stats),
        }
    }

    /// Outcome of a cycle aborted by `error`
    ///
    /// `snapshot` and `stats` are set when the failure happened after the new
    /// snapshot was already complete (a retention failure).
    pub fn failed(
        finished_at: NaiveDateTime,
        error: &SnapError,
        snapshot: Option<PathBuf>,
        stats: Option<MirrorStats>,
    ) -> Self {
        let stage = error.stage();
        let subject = match stage {
            FailureStage::Retention => SUBJECT_CLEANUP_FAILURE,
            _ => SUBJECT_FAILURE,
        };
        let mut message = format!(
            "Backup or cleanup failed at {}.\n\nError Details:\n{}",
            finished_at.format(REPORT_TIME_FORMAT),
            error
        );
        if let (true, Some(path)) = (error.is_data_intact(), snapshot.as_ref()) {
            message.push_str(&format!(
                "\n\nThe new snapshot {} completed and is intact; only pruning failed.",
                path.display()
            ));
        }

        Self {
            success: false,
            subject: subject.to_string(),
            message,
            error: Some(error.to_string()),
            stage: Some(stage),
            snapshot,
            pruned: None,
            stats,
        }
    }

    /// Process exit code for this outcome
    ///
    /// - `0`: full success
    /// - `1`: pre-flight or snapshot failure
    /// - `2`: snapshot succeeded, retention failed
    pub fn exit_code(&self) -> i32 {
        match (self.success, self.stage) {
            (true, _) => 0,
            (false, Some(FailureStage::Retention)) => 2,
            (false, _) => 1,
        }
    }
}
