//! Snapshot retention
//!
//! After a successful snapshot, [`RetentionManager`] lists the snapshots under
//! the snapshot root, oldest first, and removes the oldest one when the count
//! has reached the configured maximum. At most one snapshot is removed per
//! pass.
//!
//! Only directories whose names are complete snapshot timestamps take part:
//! the lock file, `<name>.partial` leftovers and anything else an operator
//! placed in the root are never counted and never deleted.

use crate::error::{Result, SnapError};
use crate::types::Snapshot;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// List the snapshots under `root`, sorted oldest first
///
/// A missing root has no snapshots.
pub fn list_snapshots(root: &Path) -> Result<Vec<Snapshot>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        match Snapshot::from_path(&entry.path()) {
            Ok(snapshot) => snapshots.push(snapshot),
            Err(_) => debug!("Ignoring non-snapshot entry {:?}", entry.path()),
        }
    }
    snapshots.sort();
    Ok(snapshots)
}

fn remove_snapshot_dir(path: &Path) -> io::Result<()> {
    fs::remove_dir_all(path)
}

/// Removes the oldest snapshot once the retention bound is reached
#[derive(Clone)]
pub struct RetentionManager {
    max_snapshots: usize,
    remove: fn(&Path) -> io::Result<()>,
}

impl std::fmt::Debug for RetentionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionManager")
            .field("max_snapshots", &self.max_snapshots)
            .finish_non_exhaustive()
    }
}

impl RetentionManager {
    /// Manager keeping at most `max_snapshots` snapshots
    pub fn new(max_snapshots: usize) -> Self {
        Self {
            max_snapshots,
            remove: remove_snapshot_dir,
        }
    }

    /// Replace the function used to delete a snapshot directory
    pub fn with_remover(mut self, remove: fn(&Path) -> io::Result<()>) -> Self {
        self.remove = remove;
        self
    }

    /// Configured bound
    pub fn max_snapshots(&self) -> usize {
        self.max_snapshots
    }

    /// Delete the oldest snapshot under `root` if the count is at or above the bound
    ///
    /// Returns the deleted snapshot's path, or `None` when nothing was removed.
    ///
    /// # Errors
    ///
    /// - [`SnapError::InvalidConfiguration`] if the bound is zero
    /// - [`SnapError::Retention`] if listing or deletion fails; nothing is retried
    pub fn prune(&self, root: &Path) -> Result<Option<PathBuf>> {
        self.prune_except(root, None)
    }

    /// Same as [`prune`](Self::prune), but never deletes `keep`
    ///
    /// Used by the runner to protect the snapshot the chain pointer names,
    /// which would otherwise be removed when it is the only snapshot and the
    /// bound is 1.
    #[instrument(skip(self), fields(max = self.max_snapshots))]
    pub fn prune_except(&self, root: &Path, keep: Option<&Path>) -> Result<Option<PathBuf>> {
        if self.max_snapshots == 0 {
            return Err(SnapError::config("max_snapshots must be at least 1"));
        }

        let snapshots = list_snapshots(root).map_err(|e| SnapError::Retention {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

        if snapshots.len() < self.max_snapshots {
            info!("No need to delete snapshots. Current count: {}", snapshots.len());
            return Ok(None);
        }

        let Some(oldest) = snapshots.first() else {
            return Ok(None);
        };
        if keep == Some(oldest.path.as_path()) {
            warn!(
                "Oldest snapshot {:?} is the current chain target; not deleting it",
                oldest.path
            );
            return Ok(None);
        }

        (self.remove)(&oldest.path).map_err(|e| SnapError::Retention {
            path: oldest.path.clone(),
            reason: e.to_string(),
        })?;

        info!("Deleted oldest snapshot: {:?}", oldest.path);
        Ok(Some(oldest.path.clone()))
    }
}
