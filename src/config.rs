//! Run configuration and cancellation
//!
//! Everything a phase needs is carried in an immutable [`RunConfig`] passed
//! explicitly to each component; there is no process-global state apart from
//! the SIGINT flag, which has to be a static because signal handlers cannot
//! capture.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Default mount point of the first legacy source volume
pub const DEFAULT_UNOE_ROOT: &str = "/mnt/UNOE";
/// Default mount point of the second legacy source volume
pub const DEFAULT_DOSE_ROOT: &str = "/mnt/DOSE";
/// Default root of the consolidated destination volume
pub const DEFAULT_UNO_ROOT: &str = "/srv/storage/UNO";

/// Destination subpath holding per-run log directories
pub const CONSOLIDATION_LOGS_SUBPATH: &str = "90_System_Artifacts/Consolidation_Logs";

/// Source volume label, carried verbatim through provenance and collision logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    /// First source volume; seeds the destination authoritatively
    Unoe,
    /// Second source volume; overlaid on top of the seed
    Dose,
}

impl Origin {
    /// The literal label used in file names, suffixes, and CSV fields
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unoe => "UNOE",
            Self::Dose => "DOSE",
        }
    }

    /// The opposite source
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Unoe => Self::Dose,
            Self::Dose => Self::Unoe,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable configuration for a single pipeline run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root of the UNOE source volume (read-only)
    pub unoe_root: PathBuf,
    /// Root of the DOSE source volume (read-only)
    pub dose_root: PathBuf,
    /// Root of the UNO destination volume
    pub uno_root: PathBuf,
    /// Opaque run identifier; names the run directory
    pub run_id: String,
    /// Run directory holding all persisted state for this run
    pub run_dir: PathBuf,
    /// No destructive operations in copy/resolve/dedupe/manifest phases
    pub dry_run: bool,
    /// Skip the effective-uid check in preflight
    pub allow_unprivileged: bool,
    /// Name of the external hardlink deduper binary
    pub dedupe_tool: String,
    /// Destination owner applied by the copy engine (best effort)
    pub owner: String,
    /// Destination group applied by the copy engine (best effort)
    pub group: String,
}

impl RunConfig {
    /// Source root for an origin
    #[must_use]
    pub fn source_root(&self, origin: Origin) -> &Path {
        match origin {
            Origin::Unoe => &self.unoe_root,
            Origin::Dose => &self.dose_root,
        }
    }

    /// Default run directory for a run identifier under a destination root
    #[must_use]
    pub fn default_run_dir(uno_root: &Path, run_id: &str) -> PathBuf {
        uno_root.join(CONSOLIDATION_LOGS_SUBPATH).join(run_id)
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.run_dir.join(name)
    }

    /// Preflight environment inventory dump
    #[must_use]
    pub fn preflight_path(&self) -> PathBuf {
        self.artifact("preflight.txt")
    }

    /// Per-origin copy log
    #[must_use]
    pub fn copy_log_path(&self, origin: Origin) -> PathBuf {
        match origin {
            Origin::Unoe => self.artifact("copy_unoe.log"),
            Origin::Dose => self.artifact("copy_dose.log"),
        }
    }

    /// Per-origin post-copy recheck report
    #[must_use]
    pub fn recheck_log_path(&self, origin: Origin) -> PathBuf {
        match origin {
            Origin::Unoe => self.artifact("copy_unoe_recheck.log"),
            Origin::Dose => self.artifact("copy_dose_recheck.log"),
        }
    }

    /// Collision candidates table (all collisions seen)
    #[must_use]
    pub fn candidates_path(&self) -> PathBuf {
        self.artifact("candidates.csv")
    }

    /// Collision resolutions table (final action per conflict)
    #[must_use]
    pub fn resolutions_path(&self) -> PathBuf {
        self.artifact("resolutions.csv")
    }

    /// Free-form action log of the resolver
    #[must_use]
    pub fn actions_log_path(&self) -> PathBuf {
        self.artifact("actions.log")
    }

    /// Append-only provenance store
    #[must_use]
    pub fn provenance_path(&self) -> PathBuf {
        self.artifact("provenance.csv")
    }

    /// Destination count/byte snapshot, pre or post dedupe
    #[must_use]
    pub fn counts_path(&self, post_dedupe: bool) -> PathBuf {
        if post_dedupe {
            self.artifact("counts_post_dedupe.txt")
        } else {
            self.artifact("counts_pre_dedupe.txt")
        }
    }

    /// Persisted hash-sample path list
    #[must_use]
    pub fn sample_list_path(&self) -> PathBuf {
        self.artifact("hash_sample_paths.txt")
    }

    /// Hash sample CSV, pre or post dedupe
    #[must_use]
    pub fn sample_csv_path(&self, post_dedupe: bool) -> PathBuf {
        if post_dedupe {
            self.artifact("hash_sample_post.csv")
        } else {
            self.artifact("hash_sample_pre.csv")
        }
    }

    /// Deduper stderr capture
    #[must_use]
    pub fn dedupe_report_path(&self) -> PathBuf {
        self.artifact("dedupe_report.log")
    }

    /// Deduper per-action trace
    #[must_use]
    pub fn dedupe_actions_path(&self) -> PathBuf {
        self.artifact("dedupe_actions.log")
    }

    /// Deduper space-savings summary
    #[must_use]
    pub fn dedupe_savings_path(&self) -> PathBuf {
        self.artifact("dedupe_savings.log")
    }

    /// Creation-time manifest
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.artifact("creation_times.csv")
    }

    /// Destinations with no recoverable creation time
    #[must_use]
    pub fn missing_times_path(&self) -> PathBuf {
        self.artifact("missing_creation_times.csv")
    }

    /// Human-readable instructions for the Windows-side apply tool
    #[must_use]
    pub fn instructions_path(&self) -> PathBuf {
        self.artifact("WINDOWS_APPLY_INSTRUCTIONS.txt")
    }
}

static CANCELLED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_sig: libc::c_int) {
    CANCELLED.store(true, Ordering::Relaxed);
}

/// Install the SIGINT handler backing [`cancelled`]
///
/// Cancellation is cooperative: walk loops check the flag between files, so
/// the in-flight file operation always completes atomically.
pub fn install_cancel_handler() {
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }
}

/// Whether a cancel signal has been observed
#[must_use]
pub fn cancelled() -> bool {
    CANCELLED.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_labels_are_literal() {
        assert_eq!(Origin::Unoe.label(), "UNOE");
        assert_eq!(Origin::Dose.label(), "DOSE");
        assert_eq!(Origin::Unoe.other(), Origin::Dose);
    }

    #[test]
    fn run_dir_lands_under_consolidation_logs() {
        let dir = RunConfig::default_run_dir(Path::new("/srv/storage/UNO"), "2024-01-01_000000");
        assert_eq!(
            dir,
            Path::new("/srv/storage/UNO/90_System_Artifacts/Consolidation_Logs/2024-01-01_000000")
        );
    }
}
