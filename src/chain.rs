//! Snapshot lineage pointer
//!
//! The chain pointer is a single text file whose entire content is the
//! absolute path of the most recently completed snapshot. It selects the
//! link-reference for the next cycle.
//!
//! The pointer is only ever replaced whole, through an atomic rename, so a
//! crash during [`SnapshotChain::write`] leaves either the old or the new path
//! in place.

use crate::error::Result;
use crate::utils;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persisted pointer to the last successful snapshot
#[derive(Debug, Clone)]
pub struct SnapshotChain {
    file: PathBuf,
}

impl SnapshotChain {
    /// Chain stored in `file`
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }

    /// Location of the pointer file
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Previously recorded snapshot path, or `None` before the first success
    ///
    /// Surrounding whitespace is ignored, so a pointer edited by hand with a
    /// trailing newline still resolves. An empty file counts as no pointer.
    pub fn read(&self) -> Result<Option<PathBuf>> {
        let content = match fs::read_to_string(&self.file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No chain pointer at {:?}", self.file);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            warn!("Chain pointer {:?} is empty", self.file);
            return Ok(None);
        }
        Ok(Some(PathBuf::from(trimmed)))
    }

    /// Link-reference for the next snapshot
    ///
    /// Same as [`read`](Self::read), except a pointer naming a directory that
    /// no longer exists is treated as absent so the next cycle performs a full
    /// copy instead of linking against nothing.
    pub fn link_reference(&self) -> Result<Option<PathBuf>> {
        match self.read()? {
            Some(path) if path.is_dir() => Ok(Some(path)),
            Some(path) => {
                warn!(
                    "Chain pointer names missing snapshot {:?}; performing full copy",
                    path
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Persist `path` as the new pointer, replacing any prior value
    ///
    /// Must only be called once the snapshot at `path` is complete.
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = path.to_string_lossy();
        utils::atomic_write(&self.file, text.as_bytes())?;
        debug!("Chain pointer now {:?}", path);
        Ok(())
    }
}
