//! Free-space gate run before any snapshot write
//!
//! [`SpaceGuard`] measures the free space of the filesystem holding the
//! backup destination and refuses to start a cycle when it is below the
//! configured percentage. The measurement itself goes through the
//! [`SpaceProbe`] trait so a nearly-full disk can be simulated in tests.

use crate::error::{Result, SnapError};
use std::path::Path;
use tracing::{debug, info};

/// Capacity of a filesystem in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    /// Total size of the filesystem
    pub total: u64,
    /// Bytes available to an unprivileged writer
    pub free: u64,
}

impl DiskUsage {
    /// Free space as a percentage of the total
    pub fn free_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.free as f64 / self.total as f64 * 100.0
    }
}

/// Source of filesystem capacity figures
pub trait SpaceProbe: Send + Sync {
    /// Capacity of the filesystem containing `path`
    fn usage(&self, path: &Path) -> Result<DiskUsage>;
}

/// Probe backed by `statvfs`/`GetDiskFreeSpaceEx` through `fs2`
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn usage(&self, path: &Path) -> Result<DiskUsage> {
        // The destination may not exist yet; measure its closest existing ancestor
        let existing = path
            .ancestors()
            .find(|p| p.exists())
            .ok_or_else(|| SnapError::internal(format!("No existing ancestor for {:?}", path)))?;

        Ok(DiskUsage {
            total: fs2::total_space(existing)?,
            free: fs2::available_space(existing)?,
        })
    }
}

/// Probe reporting fixed figures
#[derive(Debug, Clone, Copy)]
pub struct FixedSpaceProbe {
    usage: DiskUsage,
}

impl FixedSpaceProbe {
    /// Probe reporting `free` out of `total` bytes for every path
    pub fn new(total: u64, free: u64) -> Self {
        Self { usage: DiskUsage { total, free } }
    }
}

impl SpaceProbe for FixedSpaceProbe {
    fn usage(&self, _path: &Path) -> Result<DiskUsage> {
        Ok(self.usage)
    }
}

/// Pre-flight free-space check
pub struct SpaceGuard {
    probe: Box<dyn SpaceProbe>,
}

impl std::fmt::Debug for SpaceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceGuard").finish_non_exhaustive()
    }
}

impl Default for SpaceGuard {
    fn default() -> Self {
        Self::new(Box::new(FsSpaceProbe))
    }
}

impl SpaceGuard {
    /// Create a guard measuring through `probe`
    pub fn new(probe: Box<dyn SpaceProbe>) -> Self {
        Self { probe }
    }

    /// Verify that at least `threshold_percent` of the filesystem is free
    ///
    /// Returns the measured free percentage. Has no side effects.
    ///
    /// # Errors
    ///
    /// - [`SnapError::InsufficientSpace`] when the free percentage is below the threshold
    /// - [`SnapError::Io`] when the filesystem cannot be queried
    pub fn check(&self, path: &Path, threshold_percent: f64) -> Result<f64> {
        let usage = self.probe.usage(path)?;
        let free_percent = usage.free_percent();
        debug!(
            "Disk usage for {:?}: {} free of {} bytes",
            path, usage.free, usage.total
        );

        if free_percent < threshold_percent {
            return Err(SnapError::InsufficientSpace {
                free_percent,
                threshold: threshold_percent,
            });
        }

        info!("Disk space check passed: {:.2}% free.", free_percent);
        Ok(free_percent)
    }
}
