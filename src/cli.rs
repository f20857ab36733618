//! Command-line interface definitions
//!
//! Arguments are grouped by the subsystem that consumes them: volume roots,
//! run control, and destination policy.

use crate::config::{RunConfig, DEFAULT_DOSE_ROOT, DEFAULT_UNOE_ROOT, DEFAULT_UNO_ROOT};
use crate::phases::Phase;
use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;

/// Consolidate the UNOE and DOSE volumes into UNO with provenance,
/// deterministic conflict resolution, and integrity verification
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Volume root configuration
    #[command(flatten)]
    pub volumes: VolumeConfig,

    /// Run control (phase selection, run identity, dry run)
    #[command(flatten)]
    pub run: RunControl,

    /// Destination and tooling policy
    #[command(flatten)]
    pub policy: PolicyConfig,

    /// Run a lightweight CSV and taxonomy self-check and exit
    /// (touches no volumes, needs no privilege)
    #[arg(long)]
    pub self_test: bool,
}

/// Volume roots
///
/// Used by: every phase
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Volume Roots")]
pub struct VolumeConfig {
    /// Root of the UNOE source volume (read-only)
    #[arg(long, value_name = "PATH", default_value = DEFAULT_UNOE_ROOT)]
    pub unoe_root: PathBuf,

    /// Root of the DOSE source volume (read-only)
    #[arg(long, value_name = "PATH", default_value = DEFAULT_DOSE_ROOT)]
    pub dose_root: PathBuf,

    /// Root of the UNO destination volume
    #[arg(long, value_name = "PATH", default_value = DEFAULT_UNO_ROOT)]
    pub uno_root: PathBuf,
}

/// Run control
///
/// Used by: `PhaseRunner`
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Run Control")]
pub struct RunControl {
    /// Phase to run (each phase is individually re-runnable for a run id)
    #[arg(long, value_enum, default_value = "all")]
    pub phase: PhaseSelect,

    /// Run identifier; defaults to the launch timestamp.
    /// Re-using an identifier continues into the existing run directory.
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Run directory override (default lives under the destination volume)
    #[arg(long, value_name = "PATH")]
    pub log_dir: Option<PathBuf>,

    /// No destructive operations in the copy/resolve/dedupe/manifest
    /// phases; detection passes still run
    #[arg(long)]
    pub dry_run: bool,
}

/// Destination and tooling policy
///
/// Used by: preflight, `CopyEngine`, dedupe
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Policy Options")]
pub struct PolicyConfig {
    /// Hardlink deduper binary invoked by the dedupe phase
    #[arg(long, value_name = "TOOL", default_value = "jdupes")]
    pub dedupe_tool: String,

    /// Destination owner applied by the copy engine (best effort)
    #[arg(long, value_name = "USER", default_value = "tom")]
    pub owner: String,

    /// Destination group applied by the copy engine (best effort)
    #[arg(long, value_name = "GROUP", default_value = "sambashare")]
    pub group: String,

    /// Skip the preflight root-privilege check
    #[arg(long)]
    pub allow_unprivileged: bool,
}

/// Phase selector for `--phase`
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PhaseSelect {
    /// All nine phases in order
    All,
    /// Environment inventory and checks
    Preflight,
    /// Destination skeleton and run directory
    Prepare,
    /// Authoritative seed copy from UNOE
    CopyUnoe,
    /// Overlay copy from DOSE
    CopyDose,
    /// Collision resolution and provenance
    Resolve,
    /// Pre-dedupe counts and hash sample
    VerifyPre,
    /// External hardlink deduplication
    Dedupe,
    /// Creation-time manifest
    Manifest,
    /// Post-dedupe counts and sample comparison
    VerifyPost,
}

impl PhaseSelect {
    /// The phases this selection expands to, in execution order
    #[must_use]
    pub fn phases(self) -> Vec<Phase> {
        match self {
            Self::All => Phase::ALL.to_vec(),
            Self::Preflight => vec![Phase::Preflight],
            Self::Prepare => vec![Phase::Prepare],
            Self::CopyUnoe => vec![Phase::CopyUnoe],
            Self::CopyDose => vec![Phase::CopyDose],
            Self::Resolve => vec![Phase::Resolve],
            Self::VerifyPre => vec![Phase::VerifyPre],
            Self::Dedupe => vec![Phase::Dedupe],
            Self::Manifest => vec![Phase::Manifest],
            Self::VerifyPost => vec![Phase::VerifyPost],
        }
    }
}

impl Args {
    /// Validate argument combinations before any phase runs
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed run identifier or relative volume
    /// roots.
    pub fn validate(&self) -> Result<()> {
        if let Some(run_id) = &self.run.run_id {
            if run_id.is_empty() {
                anyhow::bail!("run id must not be empty");
            }
            if run_id.contains('/') || run_id.contains("..") {
                anyhow::bail!("run id must not contain '/' or '..', got: {run_id}");
            }
        }
        for (label, root) in [
            ("--unoe-root", &self.volumes.unoe_root),
            ("--dose-root", &self.volumes.dose_root),
            ("--uno-root", &self.volumes.uno_root),
        ] {
            if !root.is_absolute() {
                anyhow::bail!("{label} must be absolute, got: {}", root.display());
            }
        }
        Ok(())
    }

    /// Resolve the effective run identifier
    #[must_use]
    pub fn effective_run_id(&self) -> String {
        self.run
            .run_id
            .clone()
            .unwrap_or_else(|| Utc::now().format("%Y-%m-%d_%H%M%S").to_string())
    }

    /// Build the immutable run configuration handed to every component
    #[must_use]
    pub fn to_config(&self) -> RunConfig {
        let run_id = self.effective_run_id();
        let run_dir = self
            .run
            .log_dir
            .clone()
            .unwrap_or_else(|| RunConfig::default_run_dir(&self.volumes.uno_root, &run_id));
        RunConfig {
            unoe_root: self.volumes.unoe_root.clone(),
            dose_root: self.volumes.dose_root.clone(),
            uno_root: self.volumes.uno_root.clone(),
            run_id,
            run_dir,
            dry_run: self.run.dry_run,
            allow_unprivileged: self.policy.allow_unprivileged,
            dedupe_tool: self.policy.dedupe_tool.clone(),
            owner: self.policy.owner.clone(),
            group: self.policy.group.clone(),
        }
    }
}
