//! Snapshot creation
//!
//! [`SnapshotEngine`] produces one new snapshot per call:
//!
//! 1. Name the snapshot after the current UTC time (`YYYY-MM-DD_HH-MM-SS`).
//! 2. Resolve the link-reference from the [`SnapshotChain`].
//! 3. Mirror the source into `<name>.partial` through the configured
//!    [`MirrorCopy`], hard-linking against the link-reference and relocating
//!    displaced versions into `<previous_versions>/<name>/`.
//! 4. Rename `<name>.partial` to `<name>` and only then advance the chain.
//!
//! A visible `<name>` directory is therefore always complete. A failed copy
//! leaves `<name>.partial` on disk for inspection and the chain untouched, so
//! the next cycle still links against the last good snapshot.

use crate::chain::SnapshotChain;
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SnapError};
use crate::mirror::{MirrorCopy, MirrorRequest, NativeMirror};
use crate::types::{MirrorStats, Snapshot, PARTIAL_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// A snapshot produced by [`SnapshotEngine::run`]
#[derive(Debug, Clone)]
pub struct CompletedSnapshot {
    /// The new snapshot
    pub snapshot: Snapshot,
    /// Snapshot that unchanged files were linked against
    pub link_reference: Option<PathBuf>,
    /// Per-cycle archive directory for displaced versions
    pub archive_dir: PathBuf,
    /// Transfer statistics
    pub stats: MirrorStats,
}

/// Creates snapshots and maintains the chain pointer
pub struct SnapshotEngine {
    mirror: Box<dyn MirrorCopy>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SnapshotEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotEngine")
            .field("mirror", &self.mirror.name())
            .finish_non_exhaustive()
    }
}

impl Default for SnapshotEngine {
    fn default() -> Self {
        Self::new(Box::new(NativeMirror::new()), Arc::new(SystemClock))
    }
}

impl SnapshotEngine {
    /// Engine copying through `mirror` and naming snapshots from `clock`
    pub fn new(mirror: Box<dyn MirrorCopy>, clock: Arc<dyn Clock>) -> Self {
        Self { mirror, clock }
    }

    /// Name of the in-progress directory for snapshot `name`
    pub fn partial_name(name: &str) -> String {
        format!("{}{}", name, PARTIAL_SUFFIX)
    }

    /// Take one snapshot of `source` under `destination_root`
    ///
    /// # Errors
    ///
    /// - [`SnapError::SnapshotExists`] if a snapshot with the generated name
    ///   already exists (two cycles within the same second)
    /// - [`SnapError::CopyFailed`] if the mirroring copy fails; the partial
    ///   directory is left in place and the chain is not updated
    /// - [`SnapError::Io`] if the snapshot cannot be finalized or the chain
    ///   pointer cannot be written
    #[instrument(skip(self, chain), fields(mirror = self.mirror.name()))]
    pub fn run(
        &self,
        source: &Path,
        destination_root: &Path,
        previous_versions_dir: &Path,
        chain: &SnapshotChain,
    ) -> Result<CompletedSnapshot> {
        let start = Instant::now();
        let name = Snapshot::format_name(self.clock.now());
        let final_path = destination_root.join(&name);
        let partial_path = destination_root.join(Self::partial_name(&name));

        if fs::symlink_metadata(&final_path).is_ok() {
            return Err(SnapError::SnapshotExists(final_path));
        }

        let link_reference = chain.link_reference()?;
        match &link_reference {
            Some(reference) => info!("Linking snapshot {} against {:?}", name, reference),
            None => info!("No previous snapshot; taking full copy {}", name),
        }

        if partial_path.exists() {
            warn!("Removing stale partial snapshot {:?}", partial_path);
            fs::remove_dir_all(&partial_path)?;
        }
        fs::create_dir_all(&partial_path)?;

        let archive_dir = previous_versions_dir.join(&name);
        let request = MirrorRequest {
            source,
            destination: &partial_path,
            link_reference: link_reference.as_deref(),
            archive_dir: &archive_dir,
        };

        let stats = match self.mirror.mirror(&request) {
            Ok(stats) => stats,
            Err(e) => {
                error!("Snapshot {} failed, partial copy left at {:?}: {}", name, partial_path, e);
                return Err(e);
            }
        };

        fs::rename(&partial_path, &final_path)?;
        chain.write(&final_path)?;
        debug!("Finalized {:?}", final_path);

        info!(
            "Snapshot taken successfully at {:?} ({} copied, {} linked, {} archived) in {:?}",
            final_path,
            stats.files_copied,
            stats.files_linked,
            stats.files_archived,
            start.elapsed()
        );

        Ok(CompletedSnapshot {
            snapshot: Snapshot::from_path(&final_path)?,
            link_reference,
            archive_dir,
            stats,
        })
    }
}
