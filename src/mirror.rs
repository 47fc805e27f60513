//! Mirroring copy with hard-link reuse
//!
//! A mirroring copy makes a destination directory an exact replica of a
//! source directory. The [`MirrorCopy`] trait is the seam between the
//! snapshot engine and the transfer mechanism; two implementations ship:
//!
//! - [`NativeMirror`]: in-process copy built on `walkdir` and `rayon`
//! - [`RsyncMirror`]: the external `rsync` tool
//!
//! ## Semantics
//!
//! Given a [`MirrorRequest`], a mirror guarantees on success:
//!
//! 1. The destination holds exactly the source's directories, regular files
//!    and symbolic links (minus excluded paths). Extraneous destination
//!    entries are removed.
//! 2. Nothing is silently lost: a destination entry that would be
//!    overwritten or removed is first relocated into the archive directory at
//!    the same relative path. With a link-reference, versions present in the
//!    reference but changed or deleted in the source are preserved in the
//!    archive as well.
//! 3. With a link-reference, a source file identical to the reference's copy
//!    is hard-linked to it instead of being rewritten, so unchanged content
//!    occupies storage once across snapshots.
//!
//! ## Change detection
//!
//! [`CompareMode::Metadata`] treats files as identical when size, permissions
//! and modification time (whole seconds) match, the same quick check `rsync`
//! uses. [`CompareMode::Checksum`] replaces the time comparison with a SHA-256
//! of the content.
//!
//! ## Example
//!
//! ```rust,no_run
//! use snapkeep::mirror::{MirrorCopy, MirrorRequest, NativeMirror};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mirror = NativeMirror::new();
//! let stats = mirror.mirror(&MirrorRequest {
//!     source: Path::new("/data"),
//!     destination: Path::new("/backup/snapshots/2025-01-01_00-00-00"),
//!     link_reference: Some(Path::new("/backup/snapshots/2024-12-31_00-00-00")),
//!     archive_dir: Path::new("/backup/previous_versions/2025-01-01_00-00-00"),
//! })?;
//! println!("{} linked, {} copied", stats.files_linked, stats.files_copied);
//! # Ok(())
//! # }
//! ```

use crate::config::{BackupConfig, CompareMode, MirrorKind};
use crate::error::{Result, SnapError};
use crate::types::MirrorStats;
use crate::utils;
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Inputs of one mirroring copy
#[derive(Debug, Clone, Copy)]
pub struct MirrorRequest<'a> {
    /// Directory to replicate
    pub source: &'a Path,
    /// Directory made into the replica; created if missing
    pub destination: &'a Path,
    /// Previous snapshot to hard-link unchanged files against
    pub link_reference: Option<&'a Path>,
    /// Where displaced versions are relocated
    pub archive_dir: &'a Path,
}

/// Capability performing a mirroring copy
pub trait MirrorCopy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Replicate `request.source` into `request.destination`
    ///
    /// # Errors
    ///
    /// - [`SnapError::CopyFailed`] with a description of the failing transfer
    fn mirror(&self, request: &MirrorRequest<'_>) -> Result<MirrorStats>;
}

/// Build the mirror selected by `config`
pub fn mirror_for(config: &BackupConfig) -> Result<Box<dyn MirrorCopy>> {
    match config.mirror {
        MirrorKind::Native => Ok(Box::new(
            NativeMirror::new()
                .with_compare_mode(config.compare)
                .with_excludes(&config.excludes)?
                .with_parallel_workers(config.workers()),
        )),
        MirrorKind::Rsync => Ok(Box::new(RsyncMirror::new().with_excludes(config.excludes.clone()))),
    }
}

/// Entry discovered in the source tree
#[derive(Debug)]
enum SourceEntry {
    Dir { rel: PathBuf, mode: u32 },
    File { rel: PathBuf, meta: fs::Metadata },
    Symlink { rel: PathBuf, target: PathBuf },
}

impl SourceEntry {
    fn rel(&self) -> &Path {
        match self {
            SourceEntry::Dir { rel, .. }
            | SourceEntry::File { rel, .. }
            | SourceEntry::Symlink { rel, .. } => rel,
        }
    }
}

/// In-process mirroring copy
#[derive(Debug)]
pub struct NativeMirror {
    compare: CompareMode,
    excludes: Option<GlobSet>,
    parallel_workers: usize,
}

impl Default for NativeMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeMirror {
    /// Mirror with metadata comparison, no excludes and one worker per CPU
    pub fn new() -> Self {
        Self {
            compare: CompareMode::Metadata,
            excludes: None,
            parallel_workers: num_cpus::get(),
        }
    }

    /// Set how unchanged files are detected
    pub fn with_compare_mode(mut self, compare: CompareMode) -> Self {
        self.compare = compare;
        self
    }

    /// Set glob patterns (relative to the source) left out of the mirror
    ///
    /// # Errors
    ///
    /// - [`SnapError::InvalidPattern`] if a pattern does not compile
    pub fn with_excludes(mut self, patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            self.excludes = None;
            return Ok(self);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern)?);
        }
        self.excludes = Some(builder.build()?);
        Ok(self)
    }

    /// Set the number of transfer threads (minimum 1)
    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers.max(1);
        self
    }

    fn is_excluded(&self, rel: &Path) -> bool {
        self.excludes.as_ref().is_some_and(|set| set.is_match(rel))
    }

    /// Walk the source tree, parents before children
    fn scan_source(&self, source: &Path) -> Result<Vec<SourceEntry>> {
        let mut entries = Vec::new();
        let walker = WalkDir::new(source)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| match e.path().strip_prefix(source) {
                Ok(rel) => !self.is_excluded(rel),
                Err(_) => true,
            });

        for entry in walker {
            let entry = entry?;
            let rel = utils::make_relative(entry.path(), source)?;
            let file_type = entry.file_type();

            if file_type.is_dir() {
                let mode = utils::get_permissions(&entry.metadata()?);
                entries.push(SourceEntry::Dir { rel, mode });
            } else if file_type.is_file() {
                entries.push(SourceEntry::File { rel, meta: entry.metadata()? });
            } else if file_type.is_symlink() {
                let target = utils::read_symlink(entry.path())?;
                entries.push(SourceEntry::Symlink { rel, target });
            } else {
                warn!("Skipping non-regular file {:?}", entry.path());
            }
        }
        Ok(entries)
    }

    /// Whether the file at `other` holds the same version as the source file
    fn same_version(&self, src: &Path, src_meta: &fs::Metadata, other: &Path, other_meta: &fs::Metadata) -> Result<bool> {
        if !other_meta.is_file()
            || src_meta.len() != other_meta.len()
            || utils::get_permissions(src_meta) != utils::get_permissions(other_meta)
        {
            return Ok(false);
        }
        match self.compare {
            CompareMode::Metadata => {
                let a = filetime::FileTime::from_last_modification_time(src_meta);
                let b = filetime::FileTime::from_last_modification_time(other_meta);
                Ok(a.unix_seconds() == b.unix_seconds())
            }
            CompareMode::Checksum => Ok(utils::hash_file_content(src)? == utils::hash_file_content(other)?),
        }
    }

    /// Move an existing destination entry into the archive
    fn relocate(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        clear_path(to)?;
        match fs::rename(from, to) {
            Ok(()) => {}
            Err(e) => {
                // Rename fails across filesystems; fall back to copy and delete
                debug!("Rename {:?} -> {:?} failed ({}), copying", from, to, e);
                preserve_tree(from, to)?;
                clear_path(from)?;
            }
        }
        trace!("Relocated {:?} to {:?}", from, to);
        Ok(())
    }

    /// Ensure a destination directory exists, displacing a non-directory in its way
    fn ensure_dir(&self, request: &MirrorRequest<'_>, rel: &Path) -> Result<usize> {
        let dst = request.destination.join(rel);
        let mut archived = 0;

        match fs::symlink_metadata(&dst) {
            Ok(meta) if meta.is_dir() => return Ok(0),
            Ok(_) => {
                self.relocate(&dst, &request.archive_dir.join(rel))?;
                archived += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(reference) = request.link_reference {
            let prev = reference.join(rel);
            if let Ok(meta) = fs::symlink_metadata(&prev) {
                if !meta.is_dir() {
                    archived += preserve_tree(&prev, &request.archive_dir.join(rel))?;
                }
            }
        }

        fs::create_dir_all(&dst)?;
        Ok(archived)
    }

    /// Place one regular file into the destination
    fn transfer_file(&self, request: &MirrorRequest<'_>, rel: &Path, meta: &fs::Metadata) -> Result<MirrorStats> {
        let src = request.source.join(rel);
        let dst = request.destination.join(rel);
        let mut stats = MirrorStats::default();

        match fs::symlink_metadata(&dst) {
            Ok(existing) => {
                if self.same_version(&src, meta, &dst, &existing)? {
                    return Ok(stats);
                }
                self.relocate(&dst, &request.archive_dir.join(rel))?;
                stats.files_archived += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(reference) = request.link_reference {
            let prev = reference.join(rel);
            if let Ok(prev_meta) = fs::symlink_metadata(&prev) {
                if self.same_version(&src, meta, &prev, &prev_meta)? {
                    match fs::hard_link(&prev, &dst) {
                        Ok(()) => {
                            stats.files_linked += 1;
                            stats.bytes_linked += meta.len();
                            return Ok(stats);
                        }
                        Err(e) => warn!("Hard link {:?} failed ({}); copying instead", prev, e),
                    }
                } else {
                    stats.files_archived += preserve_tree(&prev, &request.archive_dir.join(rel))?;
                }
            }
        }

        fs::copy(&src, &dst)?;
        utils::copy_mtime(meta, &dst)?;
        stats.files_copied += 1;
        stats.bytes_copied += meta.len();
        Ok(stats)
    }

    /// Recreate one symbolic link in the destination
    fn transfer_symlink(&self, request: &MirrorRequest<'_>, rel: &Path, target: &Path) -> Result<MirrorStats> {
        let dst = request.destination.join(rel);
        let mut stats = MirrorStats::default();

        match fs::symlink_metadata(&dst) {
            Ok(meta) => {
                if meta.file_type().is_symlink() && utils::read_symlink(&dst)? == target {
                    return Ok(stats);
                }
                self.relocate(&dst, &request.archive_dir.join(rel))?;
                stats.files_archived += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(reference) = request.link_reference {
            let prev = reference.join(rel);
            if let Ok(meta) = fs::symlink_metadata(&prev) {
                let unchanged = meta.file_type().is_symlink() && utils::read_symlink(&prev)? == target;
                if !unchanged {
                    stats.files_archived += preserve_tree(&prev, &request.archive_dir.join(rel))?;
                }
            }
        }

        utils::create_symlink(target, &dst)?;
        stats.symlinks += 1;
        Ok(stats)
    }

    /// Top-most entries under `root` that are not part of the source
    fn extraneous(&self, root: &Path, keep: &HashSet<PathBuf>) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut walker = WalkDir::new(root).follow_links(false).min_depth(1).sort_by_file_name().into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry?;
            let rel = utils::make_relative(entry.path(), root)?;
            let is_dir = entry.file_type().is_dir();
            if self.is_excluded(&rel) || !keep.contains(&rel) {
                if is_dir {
                    walker.skip_current_dir();
                }
                if !self.is_excluded(&rel) {
                    found.push(rel);
                }
            }
        }
        Ok(found)
    }

    fn run(&self, request: &MirrorRequest<'_>) -> Result<MirrorStats> {
        if !request.source.is_dir() {
            return Err(SnapError::copy_failed(format!(
                "source directory {:?} does not exist",
                request.source
            )));
        }
        fs::create_dir_all(request.destination)?;

        let entries = self.scan_source(request.source)?;
        let keep: HashSet<PathBuf> = entries.iter().map(|e| e.rel().to_path_buf()).collect();
        debug!("Scanned {} entries in {:?}", entries.len(), request.source);

        let mut stats = MirrorStats::default();

        // Deletions first, so nothing stale blocks the new entries
        for rel in self.extraneous(request.destination, &keep)? {
            self.relocate(&request.destination.join(&rel), &request.archive_dir.join(&rel))?;
            stats.files_archived += 1;
        }

        for entry in &entries {
            if let SourceEntry::Dir { rel, .. } = entry {
                stats.files_archived += self.ensure_dir(request, rel)?;
                stats.dirs_created += 1;
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallel_workers)
            .build()
            .map_err(|e| SnapError::internal(format!("thread pool: {e}")))?;

        let transferred: Vec<MirrorStats> = pool.install(|| {
            entries
                .par_iter()
                .filter_map(|entry| match entry {
                    SourceEntry::File { rel, meta } => Some(
                        self.transfer_file(request, rel, meta)
                            .map_err(|e| SnapError::copy_failed(format!("{}: {}", rel.display(), e))),
                    ),
                    SourceEntry::Symlink { rel, target } => Some(
                        self.transfer_symlink(request, rel, target)
                            .map_err(|e| SnapError::copy_failed(format!("{}: {}", rel.display(), e))),
                    ),
                    SourceEntry::Dir { .. } => None,
                })
                .collect::<Result<Vec<_>>>()
        })?;
        for s in &transferred {
            stats.merge(s);
        }

        // Versions deleted from the source since the link-reference
        if let Some(reference) = request.link_reference {
            for rel in self.extraneous(reference, &keep)? {
                stats.files_archived += preserve_tree(&reference.join(&rel), &request.archive_dir.join(&rel))?;
            }
        }

        // Directory modes last, deepest first, so read-only directories were writable while filling
        for entry in entries.iter().rev() {
            if let SourceEntry::Dir { rel, mode } = entry {
                utils::set_permissions(&request.destination.join(rel), *mode)?;
            }
        }

        Ok(stats)
    }
}

impl MirrorCopy for NativeMirror {
    fn name(&self) -> &'static str {
        "native"
    }

    fn mirror(&self, request: &MirrorRequest<'_>) -> Result<MirrorStats> {
        info!(
            "Mirroring {:?} -> {:?} (link-reference: {:?})",
            request.source, request.destination, request.link_reference
        );
        self.run(request).map_err(|e| match e {
            SnapError::CopyFailed(_) => e,
            other => SnapError::copy_failed(other.to_string()),
        })
    }
}

/// Remove whatever sits at `path`, if anything
fn clear_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Link (or copy) the entry at `from` to `to`, recursively; returns files preserved
///
/// Leaves `from` untouched. Regular files are hard-linked when possible so the
/// preserved version costs no additional storage.
fn preserve_tree(from: &Path, to: &Path) -> Result<usize> {
    let mut preserved = 0;
    for entry in WalkDir::new(from).follow_links(false).follow_root_links(false).sort_by_file_name() {
        let entry = entry?;
        let rel = utils::make_relative(entry.path(), from)?;
        let target = if rel.as_os_str().is_empty() { to.to_path_buf() } else { to.join(&rel) };
        let file_type = entry.file_type();

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        clear_path(&target)?;
        if file_type.is_symlink() {
            utils::create_symlink(&utils::read_symlink(entry.path())?, &target)?;
        } else if fs::hard_link(entry.path(), &target).is_err() {
            fs::copy(entry.path(), &target)?;
            utils::copy_mtime(&entry.metadata()?, &target)?;
        }
        preserved += 1;
    }
    Ok(preserved)
}

/// Mirroring copy through an external `rsync`
///
/// Runs `rsync -a --delete --backup --backup-dir=<archive> [--link-dest=<ref>]
/// <source>/ <destination>/`.
#[derive(Debug, Clone)]
pub struct RsyncMirror {
    binary: PathBuf,
    excludes: Vec<String>,
}

impl Default for RsyncMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl RsyncMirror {
    /// Mirror using `rsync` from `PATH`
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("rsync"),
            excludes: Vec::new(),
        }
    }

    /// Use a specific `rsync` executable
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Pass `--exclude` patterns
    pub fn with_excludes(mut self, patterns: Vec<String>) -> Self {
        self.excludes = patterns;
        self
    }

    /// Command-line arguments for `request`
    pub fn args(&self, request: &MirrorRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "-a".to_string(),
            "--delete".to_string(),
            "--backup".to_string(),
            format!("--backup-dir={}", request.archive_dir.display()),
            "--stats".to_string(),
        ];
        if let Some(reference) = request.link_reference {
            args.push(format!("--link-dest={}", reference.display()));
        }
        for pattern in &self.excludes {
            args.push(format!("--exclude={}", pattern));
        }
        args.push(format!("{}/", request.source.display()));
        args.push(format!("{}/", request.destination.display()));
        args
    }
}

/// Pull the counters out of `rsync --stats` output
fn parse_rsync_stats(stdout: &str) -> MirrorStats {
    fn number(line: &str) -> Option<u64> {
        let value = line.split(':').nth(1)?;
        let digits: String = value
            .split_whitespace()
            .next()?
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }

    let mut stats = MirrorStats::default();
    for line in stdout.lines().map(str::trim) {
        if line.starts_with("Number of regular files transferred:") {
            stats.files_copied = number(line).unwrap_or(0) as usize;
        } else if line.starts_with("Total transferred file size:") {
            stats.bytes_copied = number(line).unwrap_or(0);
        }
    }
    stats
}

impl MirrorCopy for RsyncMirror {
    fn name(&self) -> &'static str {
        "rsync"
    }

    fn mirror(&self, request: &MirrorRequest<'_>) -> Result<MirrorStats> {
        let args = self.args(request);
        info!("Running {} {}", self.binary.display(), args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(|e| SnapError::copy_failed(format!("failed to start {}: {}", self.binary.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SnapError::copy_failed(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(parse_rsync_stats(&String::from_utf8_lossy(&output.stdout)))
    }
}
