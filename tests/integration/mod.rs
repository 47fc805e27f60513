//! End-to-end tests for snapkeep backup cycles
//!
//! Each test drives a full [`BackupRunner`] cycle against temporary
//! directories with a deterministic clock and space probe, then inspects the
//! resulting on-disk layout.

use ::snapkeep::*;
use ::snapkeep::utils;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

/// Test harness owning a source directory and a backup home
pub struct BackupHarness {
    pub temp_dir: TempDir,
    pub config: BackupConfig,
    pub notifier: RecordingNotifier,
    clock: Arc<SteppingClock>,
    free_percent: u64,
}

impl BackupHarness {
    /// Create a harness with an empty source and abundant free space
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("volumes");
        fs::create_dir_all(&source).unwrap();
        let config = BackupConfig::with_backup_home(&source, temp_dir.path().join("backup"));

        Self {
            temp_dir,
            config,
            notifier: RecordingNotifier::new(),
            clock: Arc::new(SteppingClock::new(Self::start(), Duration::minutes(1))),
            free_percent: 80,
        }
    }

    /// Time of the first cycle
    pub fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 7).unwrap().and_hms_opt(2, 0, 0).unwrap()
    }

    pub fn source(&self) -> &Path {
        &self.config.source_dir
    }

    pub fn write(&self, rel: &str, content: &[u8]) {
        let path = self.source().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn runner(&self) -> BackupRunner {
        BackupRunner::builder(self.config.clone())
            .notifier(Box::new(self.notifier.clone()))
            .space_probe(Box::new(FixedSpaceProbe::new(100, self.free_percent)))
            .clock(self.clock.clone())
            .build()
            .unwrap()
    }

    /// Run one cycle and log its subject
    pub fn cycle(&self) -> BackupOutcome {
        let outcome = self.runner().execute();
        info!(subject = %outcome.subject, "cycle finished");
        outcome
    }

    pub fn snapshot_names(&self) -> Vec<String> {
        list_snapshots(&self.config.snapshot_root)
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect()
    }

    pub fn chain_target(&self) -> Option<PathBuf> {
        SnapshotChain::new(&self.config.chain_file).read().unwrap()
    }
}

impl Default for BackupHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn same_inode(a: &Path, b: &Path) -> bool {
    utils::file_identity(a).unwrap() == utils::file_identity(b).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_first_cycle_takes_full_snapshot() {
        let harness = BackupHarness::new();
        harness.write("app/data.bin", &vec![7u8; 10 * 1024]);

        let outcome = harness.cycle();

        assert!(outcome.success);
        assert_eq!(outcome.exit_code(), 0);
        let snapshot = harness.config.snapshot_root.join("2025-03-07_02-00-00");
        assert_eq!(outcome.snapshot.as_ref(), Some(&snapshot));
        assert_eq!(fs::read(snapshot.join("app/data.bin")).unwrap().len(), 10 * 1024);
        assert_eq!(harness.chain_target(), Some(snapshot));

        let sent = harness.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Backup Successful");
        assert!(sent[0]
            .body
            .starts_with("Backup and cleanup completed successfully at "));
    }

    #[test]
    fn test_low_space_aborts_without_writing() {
        let mut harness = BackupHarness::new();
        harness.write("data.txt", b"payload");
        harness.free_percent = 5;

        let outcome = harness.cycle();

        assert!(!outcome.success);
        assert_ne!(outcome.exit_code(), 0);
        assert!(harness.snapshot_names().is_empty());
        assert_eq!(harness.chain_target(), None);
        let sent = harness.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Backup Failed");
        assert!(sent[0].body.contains("5.00% free"));
    }

    #[test]
    fn test_full_root_prunes_oldest() {
        let harness = BackupHarness::new();
        harness.write("data.txt", b"payload");
        let existing = ["2025-03-04_02-00-00", "2025-03-05_02-00-00", "2025-03-06_02-00-00"];
        for name in existing {
            fs::create_dir_all(harness.config.snapshot_root.join(name)).unwrap();
        }

        let outcome = harness.cycle();

        assert!(outcome.success);
        assert_eq!(
            outcome.pruned,
            Some(harness.config.snapshot_root.join("2025-03-04_02-00-00"))
        );
        assert_eq!(
            harness.snapshot_names(),
            vec!["2025-03-05_02-00-00", "2025-03-06_02-00-00", "2025-03-07_02-00-00"]
        );
    }

    #[test]
    fn test_deleted_file_moves_to_previous_versions() {
        let harness = BackupHarness::new();
        harness.write("keep.txt", b"stays");
        harness.write("old/report.txt", b"quarterly numbers");
        assert!(harness.cycle().success);

        fs::remove_file(harness.source().join("old/report.txt")).unwrap();
        let outcome = harness.cycle();

        assert!(outcome.success);
        let snapshot = outcome.snapshot.unwrap();
        assert!(snapshot.join("keep.txt").exists());
        assert!(!snapshot.join("old/report.txt").exists());

        let archived = harness
            .config
            .previous_versions_dir
            .join("2025-03-07_02-01-00")
            .join("old/report.txt");
        assert_eq!(fs::read(archived).unwrap(), b"quarterly numbers");
    }

    #[cfg(unix)]
    #[test]
    fn test_unchanged_file_shares_storage_across_snapshots() {
        let harness = BackupHarness::new();
        harness.write("big/blob.bin", &vec![1u8; 64 * 1024]);
        harness.write("notes.txt", b"v1");
        let first = harness.cycle().snapshot.unwrap();

        // Rewrite with a different size so the quick check sees the change
        harness.write("notes.txt", b"version two");
        let second = harness.cycle();
        let second_path = second.snapshot.clone().unwrap();

        assert!(same_inode(&first.join("big/blob.bin"), &second_path.join("big/blob.bin")));
        assert!(!same_inode(&first.join("notes.txt"), &second_path.join("notes.txt")));
        assert_eq!(fs::read(first.join("notes.txt")).unwrap(), b"v1");
        assert_eq!(fs::read(second_path.join("notes.txt")).unwrap(), b"version two");

        let stats = second.stats.unwrap();
        assert_eq!(stats.files_linked, 1);
        assert_eq!(stats.files_copied, 1);
    }

    #[test]
    fn test_steady_state_respects_bound() {
        let harness = BackupHarness::new();
        harness.write("data.txt", b"payload");

        for i in 0..6 {
            harness.write("counter.txt", format!("run {i:03}").as_bytes());
            let outcome = harness.cycle();
            assert!(outcome.success, "cycle {i} failed: {:?}", outcome.error);
            assert!(harness.snapshot_names().len() <= harness.config.max_snapshots);
        }

        // The chain always names the newest snapshot
        let newest = harness.snapshot_names().pop().unwrap();
        assert_eq!(harness.chain_target(), Some(harness.config.snapshot_root.join(newest)));
    }

    #[test]
    fn test_lock_held_by_another_cycle() {
        let harness = BackupHarness::new();
        harness.write("data.txt", b"payload");
        fs::create_dir_all(&harness.config.snapshot_root).unwrap();
        let held = CycleLock::acquire(&harness.config.snapshot_root).unwrap();

        let blocked = harness.cycle();
        assert!(!blocked.success);
        assert_eq!(blocked.stage, Some(FailureStage::Preflight));
        assert!(harness.snapshot_names().is_empty());

        drop(held);
        assert!(harness.cycle().success);
        assert_eq!(harness.notifier.sent().len(), 2);
    }

    #[test]
    fn test_config_file_round_trip_drives_cycle() {
        let harness = BackupHarness::new();
        harness.write("data.txt", b"payload");
        let file = harness.temp_dir.path().join("snapkeep.json");
        harness.config.clone().max_snapshots(5).save(&file).unwrap();

        let loaded = BackupConfig::load(&file).unwrap();
        assert_eq!(loaded.max_snapshots, 5);
        assert_eq!(loaded.snapshot_root, harness.config.snapshot_root);

        let outcome = BackupRunner::builder(loaded)
            .space_probe(Box::new(FixedSpaceProbe::new(100, 50)))
            .notifier(Box::new(harness.notifier.clone()))
            .build()
            .unwrap()
            .execute();
        assert!(outcome.success);
    }
}
