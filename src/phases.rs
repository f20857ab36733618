//! Phase sequencing and the run directory
//!
//! Nine phases run in a fixed order, each individually invocable by name.
//! All state between phases lives in the run directory, so any phase can be
//! re-run idempotently for the same run identifier. The controller keeps a
//! current-action label that is attached, together with the run directory,
//! to any error that escapes a phase.

use crate::collision::{enumerate_collisions, provenance_sweep, Resolver};
use crate::config::{Origin, RunConfig};
use crate::copy::{CopyEngine, CopyLog, CopyMode, CopyStats};
use crate::csvio;
use crate::error::{MergeError, Result};
use crate::manifest::build_manifest;
use crate::provenance::ProvenanceStore;
use crate::sampler::{
    build_sample_list, compare_samples, hash_sample, read_sample_list, write_sample_list,
};
use crate::taxonomy::{Route, Taxonomy, CONTENT_HEAVY_BUCKETS};
use crate::verify::write_snapshot;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{error, info, warn};

/// The nine pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Environment inventory and privilege/tool checks
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

impl Phase {
    /// Every phase in execution order
    pub const ALL: [Self; 9] = [
        Self::Preflight,
        Self::Prepare,
        Self::CopyUnoe,
        Self::CopyDose,
        Self::Resolve,
        Self::VerifyPre,
        Self::Dedupe,
        Self::Manifest,
        Self::VerifyPost,
    ];

    /// Phase identifier used on the command line and in logs
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::Prepare => "prepare",
            Self::CopyUnoe => "copy-unoe",
            Self::CopyDose => "copy-dose",
            Self::Resolve => "resolve",
            Self::VerifyPre => "verify-pre",
            Self::Dedupe => "dedupe",
            Self::Manifest => "manifest",
            Self::VerifyPost => "verify-post",
        }
    }
}

/// Sequences phases and owns the current-action label
pub struct PhaseRunner {
    cfg: RunConfig,
    tax: Taxonomy,
    action: String,
}

impl PhaseRunner {
    /// Create the runner and ensure the run directory exists
    ///
    /// # Errors
    ///
    /// Returns an error when the run directory cannot be created.
    pub fn new(cfg: RunConfig) -> Result<Self> {
        fs::create_dir_all(&cfg.run_dir).map_err(|e| {
            MergeError::fs(format!(
                "failed to create run directory {}: {e}",
                cfg.run_dir.display()
            ))
        })?;
        info!("run {} using {}", cfg.run_id, cfg.run_dir.display());
        Ok(Self {
            cfg,
            tax: Taxonomy::new(),
            action: String::from("startup"),
        })
    }

    /// The current-action label
    #[must_use]
    pub fn current_action(&self) -> &str {
        &self.action
    }

    fn begin(&mut self, action: impl Into<String>) {
        self.action = action.into();
        info!("{}", self.action);
    }

    /// Run the given phases in order, attaching the action label and run
    /// directory to any failure
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::PhaseFailed`] wrapping the first phase error.
    pub fn run(&mut self, phases: &[Phase]) -> Result<()> {
        for &phase in phases {
            self.begin(format!("phase {}", phase.name()));
            if let Err(e) = self.dispatch(phase) {
                error!("phase {} failed during '{}': {e}", phase.name(), self.action);
                return Err(MergeError::PhaseFailed {
                    action: self.action.clone(),
                    run_dir: self.cfg.run_dir.clone(),
                    source: Box::new(e),
                });
            }
            info!("phase {} complete", phase.name());
        }
        Ok(())
    }

    fn dispatch(&mut self, phase: Phase) -> Result<()> {
        match phase {
            Phase::Preflight => self.preflight(),
            Phase::Prepare => self.prepare(),
            Phase::CopyUnoe => self.copy_phase(Origin::Unoe),
            Phase::CopyDose => self.copy_phase(Origin::Dose),
            Phase::Resolve => self.resolve(),
            Phase::VerifyPre => self.verify_pre(),
            Phase::Dedupe => self.dedupe(),
            Phase::Manifest => self.manifest(),
            Phase::VerifyPost => self.verify_post(),
        }
    }

    fn preflight(&mut self) -> Result<()> {
        self.begin("preflight: environment inventory");
        let tool_path = which(&self.cfg.dedupe_tool)
            .ok_or_else(|| MergeError::MissingTool(self.cfg.dedupe_tool.clone()))?;

        let euid = unsafe { libc::geteuid() };
        if euid != 0 && !self.cfg.allow_unprivileged && !self.cfg.dry_run {
            return Err(MergeError::NotPrivileged(format!(
                "mutating phases need root, running as uid {euid}"
            )));
        }

        for (label, root) in [
            ("UNOE", &self.cfg.unoe_root),
            ("DOSE", &self.cfg.dose_root),
            ("UNO", &self.cfg.uno_root),
        ] {
            if !root.is_dir() {
                return Err(MergeError::fs(format!(
                    "{label} volume root {} is not a directory",
                    root.display()
                )));
            }
        }

        let path = self.cfg.preflight_path();
        let mut file = fs::File::create(&path)
            .map_err(|e| MergeError::fs(format!("failed to create {}: {e}", path.display())))?;
        writeln!(
            file,
            "run_id={}\ndry_run={}\nunoe_root={}\ndose_root={}\nuno_root={}\ndedupe_tool={}\neuid={euid}",
            self.cfg.run_id,
            self.cfg.dry_run,
            self.cfg.unoe_root.display(),
            self.cfg.dose_root.display(),
            self.cfg.uno_root.display(),
            tool_path.display(),
        )
        .map_err(|e| MergeError::fs(format!("failed to write {}: {e}", path.display())))?;
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        self.begin("prepare: destination skeleton");
        if self.cfg.dry_run {
            info!("dry run: skipping skeleton creation");
            return Ok(());
        }
        for sub in self.tax.skeleton_subpaths() {
            let dir = self.cfg.uno_root.join(&sub);
            if dir.exists() {
                continue;
            }
            fs::create_dir_all(&dir)
                .map_err(|e| MergeError::fs(format!("failed to create {}: {e}", dir.display())))?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(crate::copy::DIR_MODE))
                .map_err(|e| MergeError::fs(format!("failed to chmod {}: {e}", dir.display())))?;
        }
        Ok(())
    }

    fn copy_phase(&mut self, origin: Origin) -> Result<()> {
        let mode = match origin {
            Origin::Unoe => CopyMode::Authoritative,
            Origin::Dose => CopyMode::Overlay,
        };
        let engine = CopyEngine::new(&self.cfg);
        let mut log = CopyLog::create(&self.cfg.copy_log_path(origin))?;
        let mut stats = CopyStats::default();

        for (name, path) in top_level_entries(self.cfg.source_root(origin))? {
            if path.is_dir() {
                match self.tax.classify_dir(origin, &name) {
                    Route::Excluded => {
                        log.line(&format!("exclude {name}"))?;
                    }
                    route => {
                        if let Some(sub) = route.subpath() {
                            self.begin(format!("copy {origin}: {name}"));
                            let dest = self.cfg.uno_root.join(sub);
                            stats.merge(&engine.mirror_tree(&path, &dest, mode, &mut log)?);
                        }
                    }
                }
            } else if path.is_file() {
                if let Route::LooseFile(sub) = self.tax.classify_loose_file(origin, &name) {
                    self.begin(format!("copy {origin}: loose file {name}"));
                    let dest = self.cfg.uno_root.join(sub);
                    stats.merge(&engine.copy_loose_file(&path, &dest, mode, &mut log)?);
                }
            }
        }
        info!(
            "copy {origin} done: {} copied, {} skipped, {} deferred, {} errors",
            stats.files_copied, stats.files_skipped, stats.files_deferred, stats.errors
        );

        self.begin(format!("copy {origin}: recheck"));
        let mut report = CopyLog::create(&self.cfg.recheck_log_path(origin))?;
        let mut differences = 0u64;
        for (name, path) in top_level_entries(self.cfg.source_root(origin))? {
            if path.is_dir() {
                if let Some(sub) = self.tax.classify_dir(origin, &name).subpath() {
                    let dest = self.cfg.uno_root.join(sub);
                    differences += engine.recheck_tree(&path, &dest, mode, &mut report)?;
                }
            } else if path.is_file() {
                if let Route::LooseFile(sub) = self.tax.classify_loose_file(origin, &name) {
                    let dest = self.cfg.uno_root.join(sub);
                    if !dest.exists() {
                        report.line(&format!("missing {}", dest.display()))?;
                        differences += 1;
                    }
                }
            }
        }
        if differences > 0 {
            warn!(
                "copy {origin} recheck found {differences} residual differences, see {}",
                self.cfg.recheck_log_path(origin).display()
            );
        }
        Ok(())
    }

    fn resolve(&mut self) -> Result<()> {
        self.begin("resolve: enumerate collisions");
        let collisions = enumerate_collisions(&self.cfg, &self.tax)?;

        let mut store = ProvenanceStore::open(&self.cfg.provenance_path())?;
        self.begin("resolve: apply newer/larger policy");
        {
            let mut resolver = Resolver::open(&self.cfg, &mut store)?;
            resolver.resolve_all(&collisions)?;
        }

        if self.cfg.dry_run {
            info!("dry run: skipping provenance sweep");
            return Ok(());
        }
        self.begin("resolve: provenance sweep");
        provenance_sweep(&self.cfg, &self.tax, &mut store)?;
        Ok(())
    }

    fn verify_pre(&mut self) -> Result<()> {
        self.begin("verify-pre: destination counts");
        write_snapshot(&self.cfg, false)?;
        self.begin("verify-pre: build hash sample");
        let samples = build_sample_list(&self.cfg)?;
        write_sample_list(&self.cfg.sample_list_path(), &samples)?;
        self.begin("verify-pre: hash sample");
        hash_sample(&self.cfg, &samples, &self.cfg.sample_csv_path(false))?;
        Ok(())
    }

    fn dedupe(&mut self) -> Result<()> {
        let targets: Vec<PathBuf> = CONTENT_HEAVY_BUCKETS
            .iter()
            .map(|b| self.cfg.uno_root.join(b))
            .filter(|p| p.is_dir())
            .collect();
        if targets.is_empty() {
            info!("dedupe: no content-heavy buckets present, nothing to do");
            return Ok(());
        }

        self.begin("dedupe: space summary");
        let summary = self.run_deduper(&["-r", "-m"], &targets)?;
        write_file(&self.cfg.dedupe_savings_path(), &summary.stdout)?;
        append_file(&self.cfg.dedupe_report_path(), &summary.stderr)?;
        if !summary.status.success() {
            warn!("deduper summary pass exited {:?}", summary.status.code());
        }

        if self.cfg.dry_run {
            info!("dry run: skipping hardlink pass");
            return Ok(());
        }
        self.begin("dedupe: hardlink pass");
        let link = self.run_deduper(&["-r", "-L"], &targets)?;
        write_file(&self.cfg.dedupe_actions_path(), &link.stdout)?;
        append_file(&self.cfg.dedupe_report_path(), &link.stderr)?;
        if !link.status.success() {
            return Err(MergeError::fs(format!(
                "deduper hardlink pass exited {:?}",
                link.status.code()
            )));
        }
        Ok(())
    }

    fn run_deduper(&self, flags: &[&str], targets: &[PathBuf]) -> Result<std::process::Output> {
        Command::new(&self.cfg.dedupe_tool)
            .args(flags)
            .args(targets)
            .output()
            .map_err(|e| MergeError::MissingTool(format!("{}: {e}", self.cfg.dedupe_tool)))
    }

    fn manifest(&mut self) -> Result<()> {
        if self.cfg.dry_run {
            info!("dry run: skipping creation-time manifest");
            return Ok(());
        }
        self.begin("manifest: join provenance by content identity");
        build_manifest(&self.cfg)?;
        Ok(())
    }

    fn verify_post(&mut self) -> Result<()> {
        self.begin("verify-post: destination counts");
        write_snapshot(&self.cfg, true)?;
        self.begin("verify-post: re-hash persisted sample");
        let samples = read_sample_list(&self.cfg.sample_list_path())?;
        hash_sample(&self.cfg, &samples, &self.cfg.sample_csv_path(true))?;
        let mismatched = compare_samples(
            &self.cfg.sample_csv_path(false),
            &self.cfg.sample_csv_path(true),
        )?;
        if !mismatched.is_empty() {
            for rel in &mismatched {
                error!("content changed across dedupe: {rel}");
            }
            return Err(MergeError::fs(format!(
                "{} sampled files changed content across deduplication",
                mismatched.len()
            )));
        }
        info!("verify-post: all sampled hashes unchanged");
        Ok(())
    }
}

/// Sorted depth-1 entries of a source root as (UTF-8 name, absolute path)
fn top_level_entries(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut entries: Vec<(String, PathBuf)> = fs::read_dir(root)
        .map_err(|e| MergeError::fs(format!("failed to list {}: {e}", root.display())))?
        .filter_map(std::result::Result::ok)
        .filter_map(|e| {
            let path = e.path();
            match e.file_name().into_string() {
                Ok(name) => Some((name, path)),
                Err(_) => {
                    warn!("skipping non-UTF-8 name under {}", root.display());
                    None
                }
            }
        })
        .collect();
    entries.sort();
    Ok(entries)
}

/// Locate an executable on PATH
#[must_use]
pub fn which(tool: &str) -> Option<PathBuf> {
    let tool_path = Path::new(tool);
    if tool_path.is_absolute() {
        return is_executable(tool_path).then(|| tool_path.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|md| md.is_file() && md.permissions().mode() & 0o111 != 0)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes)
        .map_err(|e| MergeError::fs(format!("failed to write {}: {e}", path.display())))
}

fn append_file(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::fs::OpenOptions;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| f.write_all(bytes))
        .map_err(|e| MergeError::fs(format!("failed to append {}: {e}", path.display())))
}

/// Lightweight self-check of the CSV layer and the static taxonomy
///
/// Touches neither the volumes nor the run directory and needs no
/// privilege.
///
/// # Errors
///
/// Returns an error describing the first failed check.
pub fn self_test() -> Result<()> {
    // CSV round trip over the awkward cases
    let fields = ["a,b", "say \"hi\"", "multi\nline", " padded ", "plain", ""];
    let encoded = csvio::encode_row(&fields);
    let rows = csvio::parse(&encoded)?;
    if rows.len() != 1 || rows[0] != fields {
        return Err(MergeError::Csv(format!(
            "self-test: CSV round trip produced {rows:?}"
        )));
    }

    let tax = Taxonomy::new();
    let checks: [(&str, Option<&str>); 4] = [
        ("Pictures", Some("02_Media/Photos")),
        ("found.000", Some(crate::taxonomy::RECOVERY_SUBPATH)),
        ("Backups", Some("Backups")),
        ("No Such Bucket", None),
    ];
    for (name, expected) in checks {
        let got = tax.shared_bucket(name);
        if got.as_deref().and_then(Path::to_str) != expected {
            return Err(MergeError::Csv(format!(
                "self-test: taxonomy route for {name:?} was {got:?}, expected {expected:?}"
            )));
        }
    }

    // suffix naming is a fixed point on already-suffixed stems
    let p = Path::new("p__UNOE_2.jpg");
    if crate::collision::suffixed_sibling(p, Origin::Dose, 1) != p {
        return Err(MergeError::Csv(
            "self-test: suffixed stem was re-suffixed".to_string(),
        ));
    }

    info!("self-test passed");
    Ok(())
}
