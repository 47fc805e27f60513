//! Main test module for snapkeep
//!
//! This module includes all test suites:
//! - Integration tests for end-to-end backup cycles
//! - Property-based tests for retention and chain invariants

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::snapkeep::*;
    use chrono::{Duration, NaiveDate};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn runner(config: BackupConfig, notifier: &RecordingNotifier) -> BackupRunner {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        BackupRunner::builder(config)
            .notifier(Box::new(notifier.clone()))
            .space_probe(Box::new(FixedSpaceProbe::new(1000, 900)))
            .clock(Arc::new(SteppingClock::new(start, Duration::seconds(1))))
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_source_directory() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("empty");
        fs::create_dir_all(&source).unwrap();
        let config = BackupConfig::with_backup_home(&source, temp_dir.path().join("backup"));

        let notifier = RecordingNotifier::new();
        let outcome = runner(config, &notifier).execute();

        assert!(outcome.success);
        let snapshot = outcome.snapshot.unwrap();
        assert!(snapshot.is_dir());
        assert_eq!(fs::read_dir(&snapshot).unwrap().count(), 0);
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        fs::create_dir_all(&source).unwrap();

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.multiple.dots.txt",
            "ünïcödé.txt",
            "2025-01-01_00-00-00",
        ];
        for name in &special_names {
            fs::write(source.join(name), name.as_bytes()).unwrap();
        }

        let config = BackupConfig::with_backup_home(&source, temp_dir.path().join("backup"));
        let notifier = RecordingNotifier::new();
        let outcome = runner(config, &notifier).execute();

        let snapshot = outcome.snapshot.unwrap();
        for name in &special_names {
            assert_eq!(fs::read(snapshot.join(name)).unwrap(), name.as_bytes());
        }
    }

    #[test]
    fn test_missing_source_fails_preflight() {
        let temp_dir = TempDir::new().unwrap();
        let config = BackupConfig::with_backup_home(
            temp_dir.path().join("does-not-exist"),
            temp_dir.path().join("backup"),
        );

        let notifier = RecordingNotifier::new();
        let outcome = runner(config, &notifier).execute();

        assert!(!outcome.success);
        assert_eq!(outcome.stage, Some(FailureStage::Preflight));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[test]
    fn test_snapshot_root_inside_source_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        let config = BackupConfig::with_backup_home(&source, source.join("backup"));

        let notifier = RecordingNotifier::new();
        let outcome = runner(config.clone(), &notifier).execute();

        assert!(!outcome.success);
        assert!(!config.snapshot_root.exists());
    }

    #[test]
    fn test_operator_files_in_root_survive_retention() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a"), b"a").unwrap();
        let config = BackupConfig::with_backup_home(&source, temp_dir.path().join("backup")).max_snapshots(1);
        fs::create_dir_all(config.snapshot_root.join("README")).unwrap();
        fs::create_dir_all(config.snapshot_root.join("2020-01-01_00-00-00.partial")).unwrap();

        let notifier = RecordingNotifier::new();
        let runner = runner(config.clone(), &notifier);
        for _ in 0..3 {
            assert!(runner.execute().success);
        }

        assert!(config.snapshot_root.join("README").exists());
        assert!(config.snapshot_root.join("2020-01-01_00-00-00.partial").exists());
        assert_eq!(list_snapshots(&config.snapshot_root).unwrap().len(), 1);
    }

    #[test]
    fn test_chain_pointer_with_trailing_newline() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("2025-01-01_00-00-00");
        fs::create_dir_all(&target).unwrap();
        let file = temp_dir.path().join("last_snapshot.txt");
        fs::write(&file, format!("  {}\n", target.display())).unwrap();

        let chain = SnapshotChain::new(&file);
        assert_eq!(chain.read().unwrap(), Some(target.clone()));
        assert_eq!(chain.link_reference().unwrap(), Some(target));
    }

    #[test]
    fn test_dangling_chain_pointer_means_full_copy() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a"), b"a").unwrap();
        let config = BackupConfig::with_backup_home(&source, temp_dir.path().join("backup"));
        fs::create_dir_all(config.chain_file.parent().unwrap()).unwrap();
        fs::write(&config.chain_file, "/nowhere/2019-01-01_00-00-00").unwrap();

        let notifier = RecordingNotifier::new();
        let outcome = runner(config.clone(), &notifier).execute();

        assert!(outcome.success);
        let stats = outcome.stats.unwrap();
        assert_eq!(stats.files_copied, 1);
        assert_eq!(stats.files_linked, 0);
        assert_eq!(
            SnapshotChain::new(&config.chain_file).read().unwrap(),
            outcome.snapshot
        );
    }
}
