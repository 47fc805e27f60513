//! Backup configuration
//!
//! [`BackupConfig`] is the single explicit value a [`BackupRunner`](crate::BackupRunner)
//! is built from. It can be assembled in code, derived from a backup home
//! directory, or loaded from a JSON file:
//!
//! ```json
//! {
//!   "source_dir": "/var/lib/docker/volumes",
//!   "snapshot_root": "/backup/snapshots",
//!   "previous_versions_dir": "/backup/previous_versions",
//!   "chain_file": "/backup/last_snapshot.txt",
//!   "max_snapshots": 3,
//!   "min_free_percent": 10.0,
//!   "recipient": "ops@example.com"
//! }
//! ```
//!
//! Fields missing from the file take the defaults documented on each field.

use crate::error::{Result, SnapError};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default number of snapshots kept
pub const DEFAULT_MAX_SNAPSHOTS: usize = 3;

/// Default minimum free space on the destination, in percent
pub const DEFAULT_MIN_FREE_PERCENT: f64 = 10.0;

/// Default notification recipient
pub const DEFAULT_RECIPIENT: &str = "recipient-email@example.com";

/// Which mirroring implementation performs the copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorKind {
    /// In-process copy with hard-link reuse
    #[default]
    Native,
    /// External `rsync` process
    Rsync,
}

/// How the native mirror decides a file is unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
    /// Same size, modification time and permissions
    #[default]
    Metadata,
    /// Same size and permissions, and identical SHA-256 of the content
    Checksum,
}

/// Configuration of one backup job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory being backed up
    pub source_dir: PathBuf,
    /// Directory holding the timestamp-named snapshots
    pub snapshot_root: PathBuf,
    /// Directory receiving displaced file versions, one subdirectory per cycle
    pub previous_versions_dir: PathBuf,
    /// Text file holding the path of the last successful snapshot
    pub chain_file: PathBuf,
    /// Maximum number of snapshots retained (default 3)
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,
    /// Minimum free space on the destination in percent (default 10)
    #[serde(default = "default_min_free_percent")]
    pub min_free_percent: f64,
    /// Recipient of outcome notifications
    #[serde(default = "default_recipient")]
    pub recipient: String,
    /// Mirroring implementation
    #[serde(default)]
    pub mirror: MirrorKind,
    /// Change detection used by the native mirror
    #[serde(default)]
    pub compare: CompareMode,
    /// Glob patterns, relative to the source, left out of snapshots
    #[serde(default)]
    pub excludes: Vec<String>,
    /// Worker threads used for file transfer (0 = number of CPUs)
    #[serde(default)]
    pub parallel_workers: usize,
}

fn default_max_snapshots() -> usize {
    DEFAULT_MAX_SNAPSHOTS
}

fn default_min_free_percent() -> f64 {
    DEFAULT_MIN_FREE_PERCENT
}

fn default_recipient() -> String {
    DEFAULT_RECIPIENT.to_string()
}

impl BackupConfig {
    /// Build a configuration with explicit paths and default policy
    pub fn new(
        source_dir: impl Into<PathBuf>,
        snapshot_root: impl Into<PathBuf>,
        previous_versions_dir: impl Into<PathBuf>,
        chain_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            snapshot_root: snapshot_root.into(),
            previous_versions_dir: previous_versions_dir.into(),
            chain_file: chain_file.into(),
            max_snapshots: DEFAULT_MAX_SNAPSHOTS,
            min_free_percent: DEFAULT_MIN_FREE_PERCENT,
            recipient: default_recipient(),
            mirror: MirrorKind::default(),
            compare: CompareMode::default(),
            excludes: Vec::new(),
            parallel_workers: 0,
        }
    }

    /// Build a configuration using the standard layout under `backup_home`
    ///
    /// ```text
    /// backup_home/
    /// ├── snapshots/            # timestamp-named snapshots
    /// ├── previous_versions/    # displaced versions, per cycle
    /// └── last_snapshot.txt     # chain pointer
    /// ```
    pub fn with_backup_home(source_dir: impl Into<PathBuf>, backup_home: impl AsRef<Path>) -> Self {
        let home = backup_home.as_ref();
        Self::new(
            source_dir,
            home.join("snapshots"),
            home.join("previous_versions"),
            home.join("last_snapshot.txt"),
        )
    }

    /// Set the retention bound
    pub fn max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max;
        self
    }

    /// Set the free-space threshold
    pub fn min_free_percent(mut self, percent: f64) -> Self {
        self.min_free_percent = percent;
        self
    }

    /// Set the notification recipient
    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = recipient.into();
        self
    }

    /// Set the mirroring implementation
    pub fn mirror(mut self, mirror: MirrorKind) -> Self {
        self.mirror = mirror;
        self
    }

    /// Set the change detection mode
    pub fn compare(mut self, compare: CompareMode) -> Self {
        self.compare = compare;
        self
    }

    /// Set exclude patterns
    pub fn excludes(mut self, patterns: Vec<String>) -> Self {
        self.excludes = patterns;
        self
    }

    /// Set the number of transfer workers
    pub fn parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers;
        self
    }

    /// Effective number of transfer workers
    pub fn workers(&self) -> usize {
        if self.parallel_workers == 0 {
            num_cpus::get()
        } else {
            self.parallel_workers
        }
    }

    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {:?}", path);
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Write this configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        utils::atomic_write(path, json.as_bytes())
    }

    /// Copy of this configuration with every path made absolute
    ///
    /// Relative paths resolve against the current directory. Cycles run on
    /// the result, so the chain pointer always names an absolute snapshot path.
    pub fn to_absolute(&self) -> Result<Self> {
        let mut config = self.clone();
        for path in [
            &mut config.source_dir,
            &mut config.snapshot_root,
            &mut config.previous_versions_dir,
            &mut config.chain_file,
        ] {
            if !path.is_absolute() {
                *path = std::path::absolute(&*path)?;
            }
        }
        Ok(config)
    }

    /// Check the configuration before a cycle touches the disk
    ///
    /// # Errors
    ///
    /// - [`SnapError::InvalidConfiguration`] if the retention bound is zero, the
    ///   threshold is outside `0..=100`, the source is not a directory, or the
    ///   snapshot root or archive lies inside the source
    pub fn validate(&self) -> Result<()> {
        if self.max_snapshots == 0 {
            return Err(SnapError::config("max_snapshots must be at least 1"));
        }
        if !(0.0..=100.0).contains(&self.min_free_percent) {
            return Err(SnapError::config(format!(
                "min_free_percent must be between 0 and 100, got {}",
                self.min_free_percent
            )));
        }
        if !self.source_dir.is_dir() {
            return Err(SnapError::config(format!(
                "source directory {:?} does not exist",
                self.source_dir
            )));
        }
        for (label, dir) in [
            ("snapshot_root", &self.snapshot_root),
            ("previous_versions_dir", &self.previous_versions_dir),
        ] {
            if utils::is_within(dir, &self.source_dir) {
                return Err(SnapError::config(format!(
                    "{} {:?} must not be inside the source directory",
                    label, dir
                )));
            }
        }
        Ok(())
    }
}
