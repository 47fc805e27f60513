//! Exclusive lock serializing backup cycles on one destination
//!
//! Cross-platform (fs2) advisory lock on `<snapshot_root>/.snapkeep.lock`.
//! Acquisition never blocks: a second cycle on the same destination fails
//! immediately with [`SnapError::AlreadyRunning`]. The lock is released when
//! the guard is dropped, on every exit path.

use crate::error::{Result, SnapError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the lock inside the snapshot root
pub const LOCK_FILE_NAME: &str = ".snapkeep.lock";

/// Held lock on a destination root
#[derive(Debug)]
pub struct CycleLock {
    file: File,
    path: PathBuf,
}

impl CycleLock {
    /// Try to take the lock for `root`, creating the root if needed
    ///
    /// # Errors
    ///
    /// - [`SnapError::AlreadyRunning`] if another holder has the lock
    /// - [`SnapError::Io`] if the lock file cannot be opened
    pub fn acquire(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let path = root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired cycle lock {:?}", path);
                Ok(Self { file, path })
            }
            Err(e) if is_contended(&e) => Err(SnapError::AlreadyRunning(path)),
            Err(e) => Err(e.into()),
        }
    }

    /// Location of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        // Unlock errors on drop are ignored; closing the file releases the lock anyway.
        let _ = self.file.unlock();
        debug!("Released cycle lock {:?}", self.path);
    }
}
