//! Backup cycle driver
//!
//! [`BackupRunner`] runs one complete cycle:
//!
//! ```text
//! lock ─► SpaceGuard ─► SnapshotEngine ─► RetentionManager ─► Notifier
//! ```
//!
//! The first failing stage ends the cycle. Whatever happens, the runner
//! produces exactly one [`BackupOutcome`] and hands it to the notifier exactly
//! once. The runner keeps no state between cycles; lineage lives in the chain
//! pointer file.
//!
//! ## Example
//!
//! ```rust,no_run
//! use snapkeep::{BackupConfig, BackupRunner, LogNotifier};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::with_backup_home("/var/lib/docker/volumes", "/backup")
//!     .max_snapshots(3)
//!     .min_free_percent(10.0);
//!
//! let runner = BackupRunner::builder(config)
//!     .notifier(Box::new(LogNotifier))
//!     .build()?;
//!
//! let outcome = runner.execute();
//! std::process::exit(outcome.exit_code());
//! # }
//! ```

use crate::chain::SnapshotChain;
use crate::clock::{Clock, SystemClock};
use crate::config::BackupConfig;
use crate::engine::{CompletedSnapshot, SnapshotEngine};
use crate::error::{Result, SnapError};
use crate::lock::CycleLock;
use crate::mirror::{self, MirrorCopy};
use crate::notify::{LogNotifier, Notifier};
use crate::retention::RetentionManager;
use crate::space::{SpaceGuard, SpaceProbe};
use crate::types::BackupOutcome;
use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Builder for [`BackupRunner`]
///
/// Every collaborator has a production default; tests and embedders swap
/// them individually.
pub struct BackupRunnerBuilder {
    config: BackupConfig,
    mirror: Option<Box<dyn MirrorCopy>>,
    space_probe: Option<Box<dyn SpaceProbe>>,
    notifier: Option<Box<dyn Notifier>>,
    clock: Option<Arc<dyn Clock>>,
    remover: Option<fn(&Path) -> io::Result<()>>,
}

impl BackupRunnerBuilder {
    /// Use a specific mirroring copy instead of the one `config.mirror` selects
    pub fn mirror(mut self, mirror: Box<dyn MirrorCopy>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Measure free space through `probe`
    pub fn space_probe(mut self, probe: Box<dyn SpaceProbe>) -> Self {
        self.space_probe = Some(probe);
        self
    }

    /// Report outcomes through `notifier` (default: [`LogNotifier`])
    pub fn notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Name snapshots from `clock` (default: UTC system time)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Delete pruned snapshots with `remove` instead of `remove_dir_all`
    pub fn retention_remover(mut self, remove: fn(&Path) -> io::Result<()>) -> Self {
        self.remover = Some(remove);
        self
    }

    /// Build the runner
    ///
    /// # Errors
    ///
    /// - [`SnapError::InvalidPattern`](crate::SnapError::InvalidPattern) if an
    ///   exclude pattern does not compile
    pub fn build(self) -> Result<BackupRunner> {
        let mirror = match self.mirror {
            Some(mirror) => mirror,
            None => mirror::mirror_for(&self.config)?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let space_guard = match self.space_probe {
            Some(probe) => SpaceGuard::new(probe),
            None => SpaceGuard::default(),
        };
        let mut retention = RetentionManager::new(self.config.max_snapshots);
        if let Some(remove) = self.remover {
            retention = retention.with_remover(remove);
        }

        Ok(BackupRunner {
            engine: SnapshotEngine::new(mirror, clock),
            space_guard,
            retention,
            notifier: self.notifier.unwrap_or_else(|| Box::new(LogNotifier)),
            config: self.config,
        })
    }
}

/// Top-level driver of one backup cycle
pub struct BackupRunner {
    config: BackupConfig,
    space_guard: SpaceGuard,
    engine: SnapshotEngine,
    retention: RetentionManager,
    notifier: Box<dyn Notifier>,
}

impl std::fmt::Debug for BackupRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupRunner")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl BackupRunner {
    /// Start building a runner for `config`
    pub fn builder(config: BackupConfig) -> BackupRunnerBuilder {
        BackupRunnerBuilder {
            config,
            mirror: None,
            space_probe: None,
            notifier: None,
            clock: None,
            remover: None,
        }
    }

    /// Runner with every collaborator at its default
    pub fn new(config: BackupConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Configuration this runner was built from
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Run one cycle and report it
    ///
    /// Never fails: every error becomes a failed [`BackupOutcome`], which is
    /// also delivered to the notifier.
    #[instrument(skip(self), fields(source = ?self.config.source_dir))]
    pub fn execute(&self) -> BackupOutcome {
        let start = Instant::now();
        info!("Starting backup cycle");

        let result = self.run_stages();
        let finished_at = Local::now().naive_local();

        let outcome = match result {
            Ok((done, Ok(pruned))) => {
                BackupOutcome::succeeded(finished_at, done.snapshot.path, pruned, done.stats)
            }
            Ok((done, Err(e))) => {
                error!("Error: {}", e);
                BackupOutcome::failed(finished_at, &e, Some(done.snapshot.path), Some(done.stats))
            }
            Err(e) => {
                error!("Error: {}", e);
                BackupOutcome::failed(finished_at, &e, None, None)
            }
        };

        info!(
            success = outcome.success,
            "Backup cycle finished in {}",
            humantime::format_duration(Duration::from_millis(start.elapsed().as_millis() as u64))
        );
        self.report(&outcome);
        outcome
    }

    /// Pre-flight and snapshot stages; the retention result is returned
    /// separately because the snapshot is already complete when it runs
    fn run_stages(&self) -> Result<(CompletedSnapshot, Result<Option<PathBuf>>)> {
        let (config, _lock) = self.preflight().map_err(SnapError::into_preflight)?;

        let chain = SnapshotChain::new(&config.chain_file);
        let done = self.engine.run(
            &config.source_dir,
            &config.snapshot_root,
            &config.previous_versions_dir,
            &chain,
        )?;

        let pruned = self
            .retention
            .prune_except(&config.snapshot_root, Some(&done.snapshot.path));
        Ok((done, pruned))
    }

    /// Resolve paths, validate, prepare the destination, lock it and check
    /// free space; no snapshot data is written before this passes
    fn preflight(&self) -> Result<(BackupConfig, CycleLock)> {
        let config = self.config.to_absolute()?;
        config.validate()?;

        fs::create_dir_all(&config.snapshot_root)?;
        fs::create_dir_all(&config.previous_versions_dir)?;
        let lock = CycleLock::acquire(&config.snapshot_root)?;

        self.space_guard.check(&config.snapshot_root, config.min_free_percent)?;
        Ok((config, lock))
    }

    /// Deliver `outcome`; delivery failures are only logged
    fn report(&self, outcome: &BackupOutcome) {
        let mut body = outcome.message.clone();
        if let Ok(host) = hostname::get() {
            body.push_str(&format!("\n\nHost: {}", host.to_string_lossy()));
        }

        if let Err(e) = self.notifier.notify(&outcome.subject, &body, &self.config.recipient) {
            warn!("Failed to send email: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteppingClock;
    use crate::error::FailureStage;
    use crate::notify::RecordingNotifier;
    use crate::space::FixedSpaceProbe;
    use crate::types::{SUBJECT_CLEANUP_FAILURE, SUBJECT_FAILURE, SUBJECT_SUCCESS};
    use chrono::{Duration, NaiveDate};
    use tempfile::TempDir;

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify(&self, _: &str, _: &str, _: &str) -> Result<()> {
            Err(SnapError::Notify("smtp unreachable".into()))
        }
    }

    fn clock() -> Arc<dyn Clock> {
        let start = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(3, 0, 0).unwrap();
        Arc::new(SteppingClock::new(start, Duration::seconds(5)))
    }

    fn setup() -> (TempDir, BackupConfig) {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("data.txt"), b"data").unwrap();
        let config = BackupConfig::with_backup_home(&source, temp.path().join("backup"));
        (temp, config)
    }

    #[test]
    fn test_success_reports_once() {
        let (_temp, config) = setup();
        let notifier = RecordingNotifier::new();
        let runner = BackupRunner::builder(config.clone())
            .notifier(Box::new(notifier.clone()))
            .clock(clock())
            .build()
            .unwrap();

        let outcome = runner.execute();

        assert!(outcome.success);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.snapshot, Some(config.snapshot_root.join("2024-06-01_03-00-00")));
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, SUBJECT_SUCCESS);
        assert_eq!(sent[0].recipient, config.recipient);
    }

    #[test]
    fn test_space_failure_aborts_before_write() {
        let (_temp, config) = setup();
        let notifier = RecordingNotifier::new();
        let runner = BackupRunner::builder(config.clone())
            .notifier(Box::new(notifier.clone()))
            .space_probe(Box::new(FixedSpaceProbe::new(100, 5)))
            .clock(clock())
            .build()
            .unwrap();

        let outcome = runner.execute();

        assert!(!outcome.success);
        assert_eq!(outcome.stage, Some(FailureStage::Preflight));
        assert_eq!(outcome.exit_code(), 1);
        assert!(crate::retention::list_snapshots(&config.snapshot_root).unwrap().is_empty());
        assert!(!config.chain_file.exists());
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, SUBJECT_FAILURE);
        assert!(sent[0].body.contains("5.00% free"));
    }

    #[test]
    fn test_retention_failure_is_distinct() {
        let (_temp, config) = setup();
        let config = config.max_snapshots(1);
        let notifier = RecordingNotifier::new();
        let runner = BackupRunner::builder(config.clone())
            .notifier(Box::new(notifier.clone()))
            .clock(clock())
            .retention_remover(|_| Err(io::Error::new(io::ErrorKind::Other, "device busy")))
            .build()
            .unwrap();

        assert!(runner.execute().success);
        let outcome = runner.execute();

        assert!(!outcome.success);
        assert_eq!(outcome.stage, Some(FailureStage::Retention));
        assert_eq!(outcome.exit_code(), 2);
        let second = config.snapshot_root.join("2024-06-01_03-00-05");
        assert_eq!(outcome.snapshot, Some(second.clone()));
        // The new snapshot is complete and linked even though pruning failed
        assert_eq!(SnapshotChain::new(&config.chain_file).read().unwrap(), Some(second));
        assert_eq!(notifier.sent().last().unwrap().subject, SUBJECT_CLEANUP_FAILURE);
    }

    #[test]
    fn test_notifier_failure_does_not_change_outcome() {
        let (_temp, config) = setup();
        let runner = BackupRunner::builder(config)
            .notifier(Box::new(FailingNotifier))
            .clock(clock())
            .build()
            .unwrap();

        let outcome = runner.execute();
        assert!(outcome.success);
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn test_concurrent_cycle_fails_fast() {
        let (_temp, config) = setup();
        fs::create_dir_all(&config.snapshot_root).unwrap();
        let _held = CycleLock::acquire(&config.snapshot_root).unwrap();

        let notifier = RecordingNotifier::new();
        let runner = BackupRunner::builder(config.clone())
            .notifier(Box::new(notifier.clone()))
            .clock(clock())
            .build()
            .unwrap();
        let outcome = runner.execute();

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("already running"));
        assert!(crate::retention::list_snapshots(&config.snapshot_root).unwrap().is_empty());
        assert_eq!(notifier.sent().len(), 1);
    }

    #[test]
    fn test_unwritable_destination_is_preflight_failure() {
        let (temp, _) = setup();
        // A regular file where the backup home should be
        fs::write(temp.path().join("backup"), b"not a directory").unwrap();
        let config = BackupConfig::with_backup_home(temp.path().join("source"), temp.path().join("backup"));

        let notifier = RecordingNotifier::new();
        let runner = BackupRunner::builder(config)
            .notifier(Box::new(notifier.clone()))
            .clock(clock())
            .build()
            .unwrap();
        let outcome = runner.execute();

        assert!(!outcome.success);
        assert_eq!(outcome.stage, Some(FailureStage::Preflight));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(notifier.sent()[0].subject, SUBJECT_FAILURE);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let (_temp, config) = setup();
        let notifier = RecordingNotifier::new();
        let runner = BackupRunner::builder(config.max_snapshots(0))
            .notifier(Box::new(notifier.clone()))
            .build()
            .unwrap();

        let outcome = runner.execute();
        assert_eq!(outcome.stage, Some(FailureStage::Preflight));
        assert_eq!(notifier.sent().len(), 1);
    }
}
