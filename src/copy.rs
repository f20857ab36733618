//! Tree mirroring with overlay semantics
//!
//! Two modes: *authoritative* seeds the destination from the first source and
//! overwrites stale copies; *overlay* layers the second source and never
//! overwrites an existing destination file; those paths are deferred to the
//! collision resolver. Modification times are preserved, destination mode
//! bits follow the share policy, and ownership is applied best-effort (the
//! actual normalization pass is outside this pipeline).
//!
//! After every copy pass the engine re-walks the source in the same mode and
//! reports residual differences; a non-empty recheck report is a warning,
//! not a failure.

use crate::config::{cancelled, RunConfig};
use crate::error::{MergeError, Result};
use crate::metadata::unix_secs;
use crate::taxonomy::is_excluded_os_name;
use std::ffi::CString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Destination directory mode: group-writable with setgid
pub const DIR_MODE: u32 = 0o2775;
/// Destination file mode: owner/group read-write
pub const FILE_MODE: u32 = 0o660;

/// Copy pass mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Seed pass: overwrite destination files whose size or mtime differ
    Authoritative,
    /// Overlay pass: never overwrite, defer existing paths to the resolver
    Overlay,
}

/// Counters for one copy pass
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyStats {
    /// Files written to the destination
    pub files_copied: u64,
    /// Files already up to date (authoritative mode)
    pub files_skipped: u64,
    /// Files deferred to the collision resolver (overlay mode)
    pub files_deferred: u64,
    /// Directories created
    pub dirs_created: u64,
    /// Bytes written
    pub bytes_copied: u64,
    /// Unreadable source entries skipped
    pub errors: u64,
}

impl CopyStats {
    /// Fold another pass into this one
    pub fn merge(&mut self, other: &Self) {
        self.files_copied += other.files_copied;
        self.files_skipped += other.files_skipped;
        self.files_deferred += other.files_deferred;
        self.dirs_created += other.dirs_created;
        self.bytes_copied += other.bytes_copied;
        self.errors += other.errors;
    }
}

/// Line-oriented action log for one copy phase
pub struct CopyLog {
    writer: BufWriter<File>,
}

impl CopyLog {
    /// Create (truncate) the log file
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be created.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| MergeError::fs(format!("failed to create {}: {e}", path.display())))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Append one action line
    ///
    /// # Errors
    ///
    /// Returns an error on write failure; the copy log lives in the run
    /// directory, so failures here are destination write failures.
    pub fn line(&mut self, text: &str) -> Result<()> {
        writeln!(self.writer, "{text}")
            .map_err(|e| MergeError::fs(format!("failed to write copy log: {e}")))
    }

    /// Flush buffered lines
    ///
    /// # Errors
    ///
    /// Returns an error on flush failure.
    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| MergeError::fs(format!("failed to flush copy log: {e}")))
    }
}

/// Tree copier carrying the run configuration and resolved ownership
pub struct CopyEngine {
    dry_run: bool,
    ownership: Option<(libc::uid_t, libc::gid_t)>,
}

impl CopyEngine {
    /// Build an engine, resolving the destination owner/group once
    #[must_use]
    pub fn new(cfg: &RunConfig) -> Self {
        let ownership = resolve_ownership(&cfg.owner, &cfg.group);
        if ownership.is_none() {
            debug!(
                "owner {}:{} not resolvable on this host, ownership left as-is",
                cfg.owner, cfg.group
            );
        }
        Self {
            dry_run: cfg.dry_run,
            ownership,
        }
    }

    /// Mirror `src_root` into `dest_dir`
    ///
    /// # Errors
    ///
    /// Destination write failures abort the pass. Unreadable source entries
    /// are logged, counted, and skipped.
    pub fn mirror_tree(
        &self,
        src_root: &Path,
        dest_dir: &Path,
        mode: CopyMode,
        log: &mut CopyLog,
    ) -> Result<CopyStats> {
        let mut stats = CopyStats::default();
        self.ensure_dir(dest_dir, &mut stats)?;

        let walker = WalkDir::new(src_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_excluded_os_name(e.file_name()));
        for entry in walker {
            if cancelled() {
                log.flush()?;
                return Err(MergeError::Cancelled);
            }
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("skipping unreadable source entry: {e}");
                    stats.errors += 1;
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(src_root)
                .map_err(|e| MergeError::fs(format!("walk escaped {}: {e}", src_root.display())))?;
            let dest = dest_dir.join(rel);
            let file_type = entry.file_type();
            if file_type.is_dir() {
                self.ensure_dir(&dest, &mut stats)?;
            } else if file_type.is_file() {
                self.copy_file_entry(entry.path(), &dest, mode, log, &mut stats)?;
            } else {
                warn!("skipping non-regular source entry {}", entry.path().display());
                stats.errors += 1;
            }
        }
        log.flush()?;
        info!(
            "mirrored {} -> {}: {} copied, {} skipped, {} deferred, {} dirs, {} bytes, {} errors",
            src_root.display(),
            dest_dir.display(),
            stats.files_copied,
            stats.files_skipped,
            stats.files_deferred,
            stats.dirs_created,
            stats.bytes_copied,
            stats.errors
        );
        Ok(stats)
    }

    /// Copy a single loose file to its routed destination path
    ///
    /// # Errors
    ///
    /// Same failure semantics as [`Self::mirror_tree`].
    pub fn copy_loose_file(
        &self,
        src: &Path,
        dest: &Path,
        mode: CopyMode,
        log: &mut CopyLog,
    ) -> Result<CopyStats> {
        let mut stats = CopyStats::default();
        if let Some(parent) = dest.parent() {
            self.ensure_dir(parent, &mut stats)?;
        }
        self.copy_file_entry(src, dest, mode, log, &mut stats)?;
        log.flush()?;
        Ok(stats)
    }

    fn copy_file_entry(
        &self,
        src: &Path,
        dest: &Path,
        mode: CopyMode,
        log: &mut CopyLog,
        stats: &mut CopyStats,
    ) -> Result<()> {
        let src_md = match fs::metadata(src) {
            Ok(md) => md,
            Err(e) => {
                warn!("skipping unreadable source file {}: {e}", src.display());
                stats.errors += 1;
                return Ok(());
            }
        };
        if dest.exists() {
            match mode {
                CopyMode::Overlay => {
                    log.line(&format!("defer {}", dest.display()))?;
                    stats.files_deferred += 1;
                    return Ok(());
                }
                CopyMode::Authoritative => {
                    if let Ok(dest_md) = fs::metadata(dest) {
                        if dest_md.len() == src_md.len()
                            && unix_secs(dest_md.modified().unwrap_or(std::time::UNIX_EPOCH))
                                == unix_secs(src_md.modified().unwrap_or(std::time::UNIX_EPOCH))
                        {
                            stats.files_skipped += 1;
                            return Ok(());
                        }
                    }
                }
            }
        }
        if self.dry_run {
            log.line(&format!("would copy {} -> {}", src.display(), dest.display()))?;
            return Ok(());
        }
        self.copy_contents(src, dest, &src_md)?;
        log.line(&format!("copy {} -> {}", src.display(), dest.display()))?;
        stats.files_copied += 1;
        stats.bytes_copied += src_md.len();
        Ok(())
    }

    /// Copy content and apply the destination metadata policy
    ///
    /// # Errors
    ///
    /// Write failures here are fatal to the phase.
    pub fn copy_contents(&self, src: &Path, dest: &Path, src_md: &fs::Metadata) -> Result<()> {
        fs::copy(src, dest).map_err(|e| {
            MergeError::fs(format!(
                "failed to copy {} -> {}: {e}",
                src.display(),
                dest.display()
            ))
        })?;
        fs::set_permissions(dest, fs::Permissions::from_mode(FILE_MODE))
            .map_err(|e| MergeError::fs(format!("failed to chmod {}: {e}", dest.display())))?;
        let mtime = filetime::FileTime::from_last_modification_time(src_md);
        filetime::set_file_mtime(dest, mtime)
            .map_err(|e| MergeError::fs(format!("failed to set mtime on {}: {e}", dest.display())))?;
        self.apply_ownership(dest);
        Ok(())
    }

    /// Create a destination directory (and parents) under the share policy
    fn ensure_dir(&self, dir: &Path, stats: &mut CopyStats) -> Result<()> {
        if dir.exists() {
            return Ok(());
        }
        if self.dry_run {
            return Ok(());
        }
        let mut pending = Vec::new();
        let mut cursor = Some(dir);
        while let Some(p) = cursor {
            if p.exists() {
                break;
            }
            pending.push(p.to_path_buf());
            cursor = p.parent();
        }
        fs::create_dir_all(dir)
            .map_err(|e| MergeError::fs(format!("failed to create {}: {e}", dir.display())))?;
        for created in pending.iter().rev() {
            fs::set_permissions(created, fs::Permissions::from_mode(DIR_MODE)).map_err(|e| {
                MergeError::fs(format!("failed to chmod {}: {e}", created.display()))
            })?;
            self.apply_ownership(created);
            stats.dirs_created += 1;
        }
        Ok(())
    }

    fn apply_ownership(&self, path: &Path) {
        let Some((uid, gid)) = self.ownership else {
            return;
        };
        let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) else {
            return;
        };
        let rc = unsafe { libc::chown(cpath.as_ptr(), uid, gid) };
        if rc != 0 {
            // ownership normalization is an external concern; EPERM here is
            // expected when running unprivileged
            debug!(
                "chown {}:{} failed on {}: {}",
                uid,
                gid,
                path.display(),
                std::io::Error::last_os_error()
            );
        }
    }

    /// Re-walk the source and report residual differences in the given mode
    ///
    /// Overlay mode reports only missing destinations (existing files are
    /// deferred collisions, not differences); authoritative mode also
    /// reports size/mtime drift. Returns the number of differences.
    ///
    /// # Errors
    ///
    /// Returns an error when the report file cannot be written.
    pub fn recheck_tree(
        &self,
        src_root: &Path,
        dest_dir: &Path,
        mode: CopyMode,
        report: &mut CopyLog,
    ) -> Result<u64> {
        let mut differences = 0u64;
        let walker = WalkDir::new(src_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_excluded_os_name(e.file_name()));
        for entry in walker {
            if cancelled() {
                report.flush()?;
                return Err(MergeError::Cancelled);
            }
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(src_root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let dest = dest_dir.join(rel);
            if !dest.exists() {
                report.line(&format!("missing {}", dest.display()))?;
                differences += 1;
                continue;
            }
            if mode == CopyMode::Authoritative {
                let (Ok(src_md), Ok(dest_md)) = (entry.metadata(), fs::metadata(&dest)) else {
                    continue;
                };
                if src_md.len() != dest_md.len() {
                    report.line(&format!(
                        "size {} ({} != {})",
                        dest.display(),
                        src_md.len(),
                        dest_md.len()
                    ))?;
                    differences += 1;
                } else if unix_secs(src_md.modified().unwrap_or(std::time::UNIX_EPOCH))
                    != unix_secs(dest_md.modified().unwrap_or(std::time::UNIX_EPOCH))
                {
                    report.line(&format!("mtime {}", dest.display()))?;
                    differences += 1;
                }
            }
        }
        report.flush()?;
        Ok(differences)
    }
}

fn resolve_ownership(owner: &str, group: &str) -> Option<(libc::uid_t, libc::gid_t)> {
    let owner_c = CString::new(owner).ok()?;
    let group_c = CString::new(group).ok()?;
    let uid = unsafe {
        let pw = libc::getpwnam(owner_c.as_ptr());
        if pw.is_null() {
            return None;
        }
        (*pw).pw_uid
    };
    let gid = unsafe {
        let gr = libc::getgrnam(group_c.as_ptr());
        if gr.is_null() {
            return None;
        }
        (*gr).gr_gid
    };
    Some((uid, gid))
}
