//! Property-based testing for snapkeep
//!
//! Uses proptest to verify retention, naming and chain invariants across
//! randomly generated snapshot sets.

use ::snapkeep::*;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Generate timestamps within a few years, at second granularity
fn timestamp_strategy() -> impl Strategy<Value = NaiveDateTime> {
    (0i64..(3 * 365 * 24 * 3600)).prop_map(|offset| {
        NaiveDate::from_ymd_opt(2023, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::seconds(offset)
    })
}

/// Generate a set of distinct snapshot names
fn snapshot_names_strategy(max: usize) -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(timestamp_strategy().prop_map(Snapshot::format_name), 0..max)
}

/// Create an empty snapshot directory for every name
fn materialize(root: &Path, names: &BTreeSet<String>) {
    for name in names {
        fs::create_dir_all(root.join(name)).unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_prune_removes_exactly_the_oldest(
        names in snapshot_names_strategy(8),
        max in 1usize..8,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        materialize(root, &names);

        let removed = RetentionManager::new(max).prune(root).unwrap();
        let remaining: Vec<String> = list_snapshots(root).unwrap().into_iter().map(|s| s.name).collect();

        if names.len() >= max {
            let oldest = names.iter().next().unwrap();
            prop_assert_eq!(removed, Some(root.join(oldest)));
            prop_assert_eq!(remaining.len(), names.len() - 1);
            prop_assert!(!remaining.contains(oldest));
        } else {
            prop_assert_eq!(removed, None);
            prop_assert_eq!(remaining.len(), names.len());
        }
    }

    #[test]
    fn prop_name_order_matches_time_order(a in timestamp_strategy(), b in timestamp_strategy()) {
        let (na, nb) = (Snapshot::format_name(a), Snapshot::format_name(b));
        prop_assert_eq!(na.cmp(&nb), a.cmp(&b));
        prop_assert_eq!(Snapshot::parse_name(&na).unwrap(), a);
    }

    #[test]
    fn prop_chain_read_returns_last_write(
        segments in prop::collection::vec("[a-zA-Z0-9 _.-]{1,12}", 1..4),
        overwrite in any::<bool>(),
    ) {
        let temp_dir = TempDir::new().unwrap();
        let chain = SnapshotChain::new(temp_dir.path().join("last_snapshot.txt"));
        prop_assert_eq!(chain.read().unwrap(), None);

        let mut path = PathBuf::from("/backup/snapshots");
        for segment in &segments {
            path.push(segment.trim());
        }
        if overwrite {
            chain.write(Path::new("/backup/snapshots/older")).unwrap();
        }
        chain.write(&path).unwrap();

        prop_assert_eq!(chain.read().unwrap(), Some(path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_cycles_never_exceed_bound(max in 1usize..5, cycles in 1usize..7) {
            let temp_dir = TempDir::new().unwrap();
            let source = temp_dir.path().join("source");
            fs::create_dir_all(&source).unwrap();
            fs::write(source.join("file.txt"), b"content").unwrap();

            let config = BackupConfig::with_backup_home(&source, temp_dir.path().join("backup"))
                .max_snapshots(max);
            let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
            let runner = BackupRunner::builder(config.clone())
                .notifier(Box::new(RecordingNotifier::new()))
                .space_probe(Box::new(FixedSpaceProbe::new(100, 50)))
                .clock(Arc::new(SteppingClock::new(start, Duration::hours(1))))
                .build()
                .unwrap();

            for _ in 0..cycles {
                let outcome = runner.execute();
                prop_assert!(outcome.success);

                let snapshots = list_snapshots(&config.snapshot_root).unwrap();
                prop_assert!(snapshots.len() <= max);
                let newest = snapshots.last().map(|s| s.path.clone());
                prop_assert_eq!(SnapshotChain::new(&config.chain_file).read().unwrap(), newest);
            }
        }
    }
}
