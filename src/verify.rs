//! Destination count and byte snapshots
//!
//! Records file count, directory count, and total allocated bytes of the
//! destination before and after deduplication. Bytes follow `du`-style
//! accounting (real blocks), so a successful hardlink pass shows up as a
//! byte drop with unchanged counts.

use crate::config::{cancelled, RunConfig};
use crate::error::{MergeError, Result};
use std::fs::File;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

/// One destination snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestinationCounts {
    /// Regular files
    pub files: u64,
    /// Directories (the root included)
    pub dirs: u64,
    /// Allocated bytes (`st_blocks` × 512), counted once per inode
    pub bytes: u64,
}

/// Walk the destination and count files, directories, and allocated bytes
///
/// Hardlinked inodes are counted once, matching `du`.
///
/// # Errors
///
/// Returns an error when the root cannot be walked or on cancellation.
pub fn count_destination(uno_root: &Path) -> Result<DestinationCounts> {
    let mut counts = DestinationCounts::default();
    let mut seen_inodes = std::collections::HashSet::new();
    for entry in WalkDir::new(uno_root) {
        if cancelled() {
            return Err(MergeError::Cancelled);
        }
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable destination entry: {e}");
                continue;
            }
        };
        let Ok(md) = entry.metadata() else { continue };
        if md.is_dir() {
            counts.dirs += 1;
        } else if md.is_file() {
            counts.files += 1;
            if seen_inodes.insert((md.dev(), md.ino())) {
                counts.bytes += md.blocks() * 512;
            }
        }
    }
    Ok(counts)
}

/// Snapshot the destination into the pre- or post-dedupe counts file
///
/// # Errors
///
/// Returns an error on walk or write failure.
pub fn write_snapshot(cfg: &RunConfig, post_dedupe: bool) -> Result<DestinationCounts> {
    let counts = count_destination(&cfg.uno_root)?;
    let path = cfg.counts_path(post_dedupe);
    let mut file = File::create(&path)
        .map_err(|e| MergeError::fs(format!("failed to create {}: {e}", path.display())))?;
    writeln!(
        file,
        "files={}\ndirs={}\nbytes={}",
        counts.files, counts.dirs, counts.bytes
    )
    .map_err(|e| MergeError::fs(format!("failed to write {}: {e}", path.display())))?;
    info!(
        "destination snapshot ({}): {} files, {} dirs, {} bytes",
        if post_dedupe { "post-dedupe" } else { "pre-dedupe" },
        counts.files,
        counts.dirs,
        counts.bytes
    );
    Ok(counts)
}
