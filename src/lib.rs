//! # Snapkeep - Incremental hard-linked snapshot backups
//!
//! Snapkeep periodically captures a source directory into timestamp-named
//! snapshot directories. Unchanged files are hard-linked against the previous
//! snapshot, so every snapshot is a complete browsable tree while only changed
//! files consume new space.
//!
//! ## Overview
//!
//! One backup cycle:
//! - Refuses to start when the destination filesystem is too full
//! - Mirrors the source into a new snapshot, linking against the last good one
//! - Moves overwritten and deleted versions into a per-cycle archive directory
//! - Records the new snapshot in a chain pointer file
//! - Deletes the oldest snapshot once the configured bound is reached
//! - Reports the outcome exactly once through a [`Notifier`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snapkeep::{BackupConfig, BackupRunner};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::with_backup_home("/var/lib/docker/volumes", "/backup");
//! let outcome = BackupRunner::new(config)?.execute();
//!
//! println!("{}: {}", outcome.subject, outcome.message);
//! std::process::exit(outcome.exit_code());
//! # }
//! ```
//!
//! ## Customizing a Runner
//!
//! ```rust,no_run
//! use snapkeep::{BackupConfig, BackupRunner, CommandNotifier, CompareMode, MirrorKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::with_backup_home("/srv/data", "/backup")
//!     .max_snapshots(7)
//!     .min_free_percent(15.0)
//!     .mirror(MirrorKind::Rsync)
//!     .compare(CompareMode::Checksum)
//!     .excludes(vec!["*.tmp".to_string(), "cache/**".to_string()]);
//!
//! let runner = BackupRunner::builder(config)
//!     .notifier(Box::new(CommandNotifier::from_command_line(
//!         "mail -s {subject} {recipient}",
//!     )?))
//!     .build()?;
//! let outcome = runner.execute();
//! # Ok(())
//! # }
//! ```
//!
//! ## On-disk Layout
//!
//! ```text
//! <backup_home>/
//! ├── snapshots/
//! │   ├── .snapkeep.lock
//! │   ├── 2025-03-07_02-00-00/
//! │   └── 2025-03-08_02-00-00/
//! ├── previous_versions/
//! │   └── 2025-03-08_02-00-00/   versions displaced by that cycle
//! └── last_snapshot.txt          path of the newest good snapshot
//! ```
//!
//! ## Error Handling
//!
//! Library operations return [`Result<T>`](Result) with [`SnapError`]. Each
//! error maps to the cycle stage it belongs to ([`FailureStage`]), which picks
//! the notification subject and the process exit code.
//!
//! ## Module Organization
//!
//! - [`runner`]: cycle driver
//! - [`engine`]: snapshot creation
//! - [`mirror`]: native and rsync mirroring copies
//! - [`chain`]: last-snapshot pointer
//! - [`retention`]: snapshot listing and pruning
//! - [`space`]: free-space guard
//! - [`notify`]: outcome delivery
//! - [`config`]: cycle configuration
//! - [`types`]: common data types
//! - [`error`]: error types

pub mod chain;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod mirror;
pub mod notify;
pub mod retention;
pub mod runner;
pub mod space;
pub mod types;

// Internal helpers, public for the CLI and integration tests
#[doc(hidden)]
pub mod utils;

pub use chain::SnapshotChain;
pub use clock::{Clock, FixedClock, SteppingClock, SystemClock};
pub use config::{BackupConfig, CompareMode, MirrorKind};
pub use engine::{CompletedSnapshot, SnapshotEngine};
pub use error::{FailureStage, Result, SnapError};
pub use lock::CycleLock;
pub use mirror::{MirrorCopy, MirrorRequest, NativeMirror, RsyncMirror};
pub use notify::{CommandNotifier, LogNotifier, Notification, Notifier, RecordingNotifier};
pub use retention::{list_snapshots, RetentionManager};
pub use runner::{BackupRunner, BackupRunnerBuilder};
pub use space::{DiskUsage, FixedSpaceProbe, FsSpaceProbe, SpaceGuard, SpaceProbe};
pub use types::{BackupOutcome, MirrorStats, Snapshot};
