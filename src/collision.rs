//! Collision detection and deterministic resolution
//!
//! A collision is one relative path present under both sources inside a
//! shared destination bucket. Identical content needs no action; conflicting
//! content is resolved by a strict newer/larger policy: the newest side wins
//! the canonical slot outright when it is also strictly larger, otherwise
//! both variants are kept and the losing side moves to a sibling path whose
//! stem carries the losing origin's label.
//!
//! Resolution is idempotent: suffixed stems are never re-suffixed, suffix
//! slots already holding the expected content are reused, and a re-run whose
//! on-disk state already matches the recorded decision performs no
//! destructive action.

use crate::config::{cancelled, Origin, RunConfig};
use crate::copy::{CopyEngine, CopyLog};
use crate::csvio::CsvAppender;
use crate::error::{MergeError, Result};
use crate::metadata::{self, read_file_record, FileRecord};
use crate::provenance::{ProvenanceRow, ProvenanceStore};
use crate::taxonomy::{is_excluded_os_name, Route, Taxonomy};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Shared column header of `candidates.csv` and `resolutions.csv`
pub const COLLISION_HEADER: [&str; 12] = [
    "dest_path",
    "classification",
    "chosen_action",
    "unoe_path",
    "unoe_size",
    "unoe_mtime_utc",
    "unoe_sha256",
    "dose_path",
    "dose_size",
    "dose_mtime_utc",
    "dose_sha256",
    "resulting_paths",
];

/// Collision classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Both sides hash to the same value
    Identical,
    /// The two sides hash differently
    Conflict,
}

impl Classification {
    /// CSV field representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identical => "identical",
            Self::Conflict => "conflict",
        }
    }
}

/// Resolution action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Identical collision; nothing to do
    NoAction,
    /// Newest side takes the canonical slot, the other is dropped
    ReplaceWithNewest,
    /// Newest side takes the canonical slot, the loser moves to a suffixed sibling
    KeepBoth,
    /// Conflict recorded, resolution not yet decided
    Pending,
}

impl Action {
    /// CSV field representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoAction => "no_action",
            Self::ReplaceWithNewest => "replace_with_newest",
            Self::KeepBoth => "keep_both",
            Self::Pending => "pending",
        }
    }
}

/// One relative path present under both sources in a shared bucket
#[derive(Debug, Clone)]
pub struct Collision {
    /// Destination path relative to the destination root
    pub dest_rel: PathBuf,
    /// Absolute UNOE-side source path
    pub unoe_src: PathBuf,
    /// Absolute DOSE-side source path
    pub dose_src: PathBuf,
}

/// Counters for one resolve pass
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveStats {
    /// Collisions with identical content
    pub identical: u64,
    /// Conflicts resolved by replacement
    pub replaced: u64,
    /// Conflicts resolved by keeping both variants
    pub kept_both: u64,
    /// Collisions skipped after a hash failure
    pub skipped_errors: u64,
}

/// Enumerate all collisions between the two sources
///
/// Only shared buckets can collide: mapped taxonomy buckets, as-is buckets,
/// and the recovery directory. Origin-scoped routes (unmapped quarantine,
/// loose files) never pair. The result is sorted by destination path.
///
/// # Errors
///
/// Returns an error when a source root cannot be listed or on cancellation.
pub fn enumerate_collisions(cfg: &RunConfig, tax: &Taxonomy) -> Result<Vec<Collision>> {
    let unoe = bucket_files(cfg.source_root(Origin::Unoe), tax)?;
    let dose = bucket_files(cfg.source_root(Origin::Dose), tax)?;

    let mut collisions = Vec::new();
    for (bucket, unoe_files) in &unoe {
        let Some(dose_files) = dose.get(bucket) else {
            continue;
        };
        for (rel, unoe_abs) in unoe_files {
            if let Some(dose_abs) = dose_files.get(rel) {
                collisions.push(Collision {
                    dest_rel: bucket.join(rel),
                    unoe_src: unoe_abs.clone(),
                    dose_src: dose_abs.clone(),
                });
            }
        }
    }
    collisions.sort_by(|a, b| a.dest_rel.cmp(&b.dest_rel));
    info!("enumerated {} collisions", collisions.len());
    Ok(collisions)
}

/// Map of shared bucket -> (bucket-relative file path -> absolute source path)
fn bucket_files(
    source_root: &Path,
    tax: &Taxonomy,
) -> Result<BTreeMap<PathBuf, BTreeMap<PathBuf, PathBuf>>> {
    let mut buckets: BTreeMap<PathBuf, BTreeMap<PathBuf, PathBuf>> = BTreeMap::new();
    let mut top_level: Vec<_> = fs::read_dir(source_root)
        .map_err(|e| MergeError::fs(format!("failed to list {}: {e}", source_root.display())))?
        .filter_map(std::result::Result::ok)
        .collect();
    top_level.sort_by_key(std::fs::DirEntry::file_name);

    for entry in top_level {
        if cancelled() {
            return Err(MergeError::Cancelled);
        }
        if !entry.path().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(String::from) else {
            warn!("skipping non-UTF-8 directory name under {}", source_root.display());
            continue;
        };
        let Some(bucket) = tax.shared_bucket(&name) else {
            continue;
        };
        let files = buckets.entry(bucket).or_default();
        let walker = WalkDir::new(entry.path())
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_excluded_os_name(e.file_name()));
        for file in walker {
            let Ok(file) = file else {
                warn!("skipping unreadable entry under {}", entry.path().display());
                continue;
            };
            if !file.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = file.path().strip_prefix(entry.path()) {
                // first contributor wins when two source names share a bucket
                files
                    .entry(rel.to_path_buf())
                    .or_insert_with(|| file.path().to_path_buf());
            }
        }
    }
    Ok(buckets)
}

/// Pick the newest side: strictly greater mtime, ties broken by strictly
/// greater size, full tie goes to UNOE
#[must_use]
pub fn pick_newest(unoe: &FileRecord, dose: &FileRecord) -> Origin {
    if dose.mtime_secs > unoe.mtime_secs {
        Origin::Dose
    } else if unoe.mtime_secs > dose.mtime_secs {
        Origin::Unoe
    } else if dose.size > unoe.size {
        Origin::Dose
    } else {
        Origin::Unoe
    }
}

/// Whether a basename stem already carries an origin suffix
/// (`__UNOE`, `__DOSE`, `__UNOE_<n>`, `__DOSE_<n>`, anchored at end of stem)
#[must_use]
pub fn stem_is_suffixed(stem: &str) -> bool {
    for marker in ["__UNOE", "__DOSE"] {
        if let Some(idx) = stem.rfind(marker) {
            let tail = &stem[idx + marker.len()..];
            if tail.is_empty() {
                return true;
            }
            if let Some(digits) = tail.strip_prefix('_') {
                if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                    return true;
                }
            }
        }
    }
    false
}

/// Sibling path carrying the origin suffix, numbered from 1
/// (`stem__UNOE.ext`, then `stem__UNOE_2.ext`, ...)
///
/// A stem that is already suffixed is a fixed point: the path is returned
/// unchanged for every `n`.
#[must_use]
pub fn suffixed_sibling(path: &Path, origin: Origin, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    if stem_is_suffixed(stem) {
        return path.to_path_buf();
    }
    let ext = path.extension().and_then(|s| s.to_str());
    let suffixed = if n <= 1 {
        format!("{stem}__{}", origin.label())
    } else {
        format!("{stem}__{}_{n}", origin.label())
    };
    let name = match ext {
        Some(ext) => format!("{suffixed}.{ext}"),
        None => suffixed,
    };
    path.with_file_name(name)
}

/// A located suffix slot for the losing side of a keep-both resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuffixSlot {
    /// The slot already holds the wanted content; reuse it
    Existing(PathBuf),
    /// First free slot; the loser can be written here
    Free(PathBuf),
}

impl SuffixSlot {
    /// The slot path regardless of state
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Existing(p) | Self::Free(p) => p,
        }
    }
}

/// Locate the suffix slot for `origin` next to `dest`, reusing any numbered
/// slot that already holds `want_sha256`
///
/// # Errors
///
/// Propagates nothing from unreadable candidate slots (they are stepped
/// over); the signature is fallible for the already-suffixed warning path.
pub fn find_suffix_slot(dest: &Path, origin: Origin, want_sha256: &str) -> Result<SuffixSlot> {
    let base = suffixed_sibling(dest, origin, 1);
    if base.as_path() == dest {
        // the canonical name is itself suffixed and must never be re-suffixed
        if !dest.exists() {
            return Ok(SuffixSlot::Free(base));
        }
        if let Ok(h) = metadata::sha256_file(dest) {
            if h == want_sha256 {
                return Ok(SuffixSlot::Existing(base));
            }
        }
        warn!(
            "suffixed destination {} occupied by other content; leaving it untouched",
            dest.display()
        );
        return Ok(SuffixSlot::Existing(base));
    }
    let mut n = 1u32;
    loop {
        let candidate = suffixed_sibling(dest, origin, n);
        if !candidate.exists() {
            return Ok(SuffixSlot::Free(candidate));
        }
        match metadata::sha256_file(&candidate) {
            Ok(h) if h == want_sha256 => return Ok(SuffixSlot::Existing(candidate)),
            Ok(_) => {}
            Err(e) => debug!("slot {} unreadable: {e}", candidate.display()),
        }
        n += 1;
    }
}

/// Resolver over one run's collision set
pub struct Resolver<'a> {
    cfg: &'a RunConfig,
    engine: CopyEngine,
    candidates: CsvAppender,
    resolutions: CsvAppender,
    actions: CopyLog,
    store: &'a mut ProvenanceStore,
}

impl<'a> Resolver<'a> {
    /// Open the collision tables and action log for a run
    ///
    /// # Errors
    ///
    /// Returns an error when any run-directory artifact cannot be opened.
    pub fn open(cfg: &'a RunConfig, store: &'a mut ProvenanceStore) -> Result<Self> {
        Ok(Self {
            cfg,
            engine: CopyEngine::new(cfg),
            candidates: CsvAppender::open(&cfg.candidates_path(), &COLLISION_HEADER)?,
            resolutions: CsvAppender::open(&cfg.resolutions_path(), &COLLISION_HEADER)?,
            actions: CopyLog::create(&cfg.actions_log_path())?,
            store,
        })
    }

    /// Resolve every collision in order
    ///
    /// # Errors
    ///
    /// Move/write failures abort the pass; per-collision hash failures are
    /// logged and skipped.
    pub fn resolve_all(&mut self, collisions: &[Collision]) -> Result<ResolveStats> {
        let mut stats = ResolveStats::default();
        for collision in collisions {
            if cancelled() {
                return Err(MergeError::Cancelled);
            }
            self.resolve_one(collision, &mut stats)?;
        }
        info!(
            "resolved collisions: {} identical, {} replaced, {} kept both, {} skipped",
            stats.identical, stats.replaced, stats.kept_both, stats.skipped_errors
        );
        Ok(stats)
    }

    fn resolve_one(&mut self, collision: &Collision, stats: &mut ResolveStats) -> Result<()> {
        let dest_rel = collision.dest_rel.to_string_lossy().to_string();
        let unoe = match read_file_record(&collision.unoe_src) {
            Ok(r) => r,
            Err(e) => {
                error!("skipping collision {dest_rel}: UNOE side unreadable: {e}");
                stats.skipped_errors += 1;
                return Ok(());
            }
        };
        let dose = match read_file_record(&collision.dose_src) {
            Ok(r) => r,
            Err(e) => {
                error!("skipping collision {dest_rel}: DOSE side unreadable: {e}");
                stats.skipped_errors += 1;
                return Ok(());
            }
        };

        if unoe.sha256 == dose.sha256 {
            self.append_row(
                true,
                collision,
                &unoe,
                &dose,
                Classification::Identical,
                Action::NoAction,
                &[dest_rel.clone()],
            )?;
            if !self.cfg.dry_run {
                for (origin, rec, src) in [
                    (Origin::Unoe, &unoe, &collision.unoe_src),
                    (Origin::Dose, &dose, &collision.dose_src),
                ] {
                    self.record_provenance(&dest_rel, origin, rec, src)?;
                }
            }
            stats.identical += 1;
            return Ok(());
        }

        // conflict: candidate first, decision and outcome afterwards
        self.append_row(
            true,
            collision,
            &unoe,
            &dose,
            Classification::Conflict,
            Action::Pending,
            &[],
        )?;

        let newest = pick_newest(&unoe, &dose);
        let (newest_rec, newest_src, loser_rec, loser_src) = match newest {
            Origin::Unoe => (&unoe, &collision.unoe_src, &dose, &collision.dose_src),
            Origin::Dose => (&dose, &collision.dose_src, &unoe, &collision.unoe_src),
        };
        let action = if newest_rec.size > loser_rec.size {
            Action::ReplaceWithNewest
        } else {
            Action::KeepBoth
        };
        let dest_abs = self.cfg.uno_root.join(&collision.dest_rel);

        let resulting = match action {
            Action::ReplaceWithNewest => {
                self.apply_replace(&dest_rel, &dest_abs, newest, newest_rec, newest_src, stats)?
            }
            Action::KeepBoth => self.apply_keep_both(
                &dest_rel,
                &dest_abs,
                newest,
                newest_rec,
                newest_src,
                loser_rec,
                loser_src,
                stats,
            )?,
            Action::NoAction | Action::Pending => unreachable!("conflict actions only"),
        };

        self.append_row(
            false,
            collision,
            &unoe,
            &dose,
            Classification::Conflict,
            action,
            &resulting,
        )?;
        Ok(())
    }

    fn apply_replace(
        &mut self,
        dest_rel: &str,
        dest_abs: &Path,
        newest: Origin,
        newest_rec: &FileRecord,
        newest_src: &Path,
        stats: &mut ResolveStats,
    ) -> Result<Vec<String>> {
        if self.cfg.dry_run {
            self.actions
                .line(&format!("dry-run: would replace {dest_rel} with {newest} variant"))?;
            stats.replaced += 1;
            return Ok(vec![dest_rel.to_string()]);
        }
        let up_to_date = dest_abs.exists()
            && metadata::sha256_file(dest_abs).is_ok_and(|h| h == newest_rec.sha256);
        if up_to_date {
            self.actions
                .line(&format!("replace {dest_rel}: already holds {newest} content"))?;
        } else {
            if dest_abs.exists() {
                fs::remove_file(dest_abs).map_err(|e| {
                    MergeError::fs(format!("failed to remove {}: {e}", dest_abs.display()))
                })?;
            }
            self.copy_source(newest_src, dest_abs)?;
            self.actions
                .line(&format!("replace {dest_rel} with {newest} variant"))?;
        }
        self.record_provenance(dest_rel, newest, newest_rec, newest_src)?;
        stats.replaced += 1;
        Ok(vec![dest_rel.to_string()])
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_keep_both(
        &mut self,
        dest_rel: &str,
        dest_abs: &Path,
        newest: Origin,
        newest_rec: &FileRecord,
        newest_src: &Path,
        loser_rec: &FileRecord,
        loser_src: &Path,
        stats: &mut ResolveStats,
    ) -> Result<Vec<String>> {
        let loser_origin = newest.other();
        let slot = find_suffix_slot(dest_abs, loser_origin, &loser_rec.sha256)?;
        if self.cfg.dry_run {
            self.actions.line(&format!(
                "dry-run: would keep both for {dest_rel} ({newest} canonical, {loser_origin} at {})",
                slot.path().display()
            ))?;
            stats.kept_both += 1;
            return Ok(vec![
                dest_rel.to_string(),
                self.rel_string(slot.path())?,
            ]);
        }

        let dest_hash = if dest_abs.exists() {
            Some(metadata::sha256_file(dest_abs)?)
        } else {
            None
        };
        let loser_path: PathBuf = match (&dest_hash, &slot) {
            // canonical already resolved; materialize the loser if needed
            (Some(h), SuffixSlot::Existing(p)) if *h == newest_rec.sha256 => p.clone(),
            (Some(h), SuffixSlot::Free(p)) if *h == newest_rec.sha256 => {
                self.copy_source(loser_src, p)?;
                p.clone()
            }
            // canonical holds the loser: move it aside instead of recopying
            (Some(h), SuffixSlot::Free(p)) if *h == loser_rec.sha256 => {
                self.rename(dest_abs, p)?;
                self.copy_source(newest_src, dest_abs)?;
                p.clone()
            }
            (Some(h), SuffixSlot::Existing(p)) if *h == loser_rec.sha256 => {
                fs::remove_file(dest_abs).map_err(|e| {
                    MergeError::fs(format!("failed to remove {}: {e}", dest_abs.display()))
                })?;
                self.copy_source(newest_src, dest_abs)?;
                p.clone()
            }
            // canonical matches neither source: move it aside first
            (Some(_), SuffixSlot::Free(p)) => {
                self.rename(dest_abs, p)?;
                let next = find_suffix_slot(dest_abs, loser_origin, &loser_rec.sha256)?;
                let loser_path = next.path().to_path_buf();
                if let SuffixSlot::Free(ref free) = next {
                    self.copy_source(loser_src, free)?;
                }
                self.copy_source(newest_src, dest_abs)?;
                loser_path
            }
            (Some(_), SuffixSlot::Existing(p)) => {
                let aside = find_suffix_slot(dest_abs, loser_origin, "")?;
                if let SuffixSlot::Free(ref free) = aside {
                    self.rename(dest_abs, free)?;
                }
                self.copy_source(newest_src, dest_abs)?;
                p.clone()
            }
            (None, SuffixSlot::Free(p)) => {
                self.copy_source(newest_src, dest_abs)?;
                self.copy_source(loser_src, p)?;
                p.clone()
            }
            (None, SuffixSlot::Existing(p)) => {
                self.copy_source(newest_src, dest_abs)?;
                p.clone()
            }
        };

        let loser_rel = self.rel_string(&loser_path)?;
        self.actions.line(&format!(
            "keep both for {dest_rel}: {newest} canonical, {loser_origin} at {loser_rel}"
        ))?;
        self.record_provenance(dest_rel, newest, newest_rec, newest_src)?;
        self.record_provenance(&loser_rel, loser_origin, loser_rec, loser_src)?;
        stats.kept_both += 1;
        Ok(vec![dest_rel.to_string(), loser_rel])
    }

    fn copy_source(&self, src: &Path, dest: &Path) -> Result<()> {
        let md = fs::metadata(src)
            .map_err(|e| MergeError::fs(format!("failed to stat {}: {e}", src.display())))?;
        self.engine.copy_contents(src, dest, &md)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|e| {
            MergeError::fs(format!(
                "failed to move {} -> {}: {e}",
                from.display(),
                to.display()
            ))
        })
    }

    fn rel_string(&self, abs: &Path) -> Result<String> {
        abs.strip_prefix(&self.cfg.uno_root)
            .map(|p| p.to_string_lossy().to_string())
            .map_err(|_| {
                MergeError::fs(format!(
                    "resolved path {} escapes destination root",
                    abs.display()
                ))
            })
    }

    fn record_provenance(
        &mut self,
        dest_rel: &str,
        origin: Origin,
        rec: &FileRecord,
        src: &Path,
    ) -> Result<()> {
        let row = ProvenanceRow {
            dest_path: dest_rel.to_string(),
            origin,
            source_path: src.to_string_lossy().to_string(),
            create_time: rec.create_time.clone(),
            src_mtime_utc: rec.mtime_utc.clone(),
            size_bytes: rec.size,
            sha256: rec.sha256.clone(),
        };
        self.store.record_checked(&self.cfg.uno_root, &row)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn append_row(
        &mut self,
        candidate: bool,
        collision: &Collision,
        unoe: &FileRecord,
        dose: &FileRecord,
        classification: Classification,
        action: Action,
        resulting: &[String],
    ) -> Result<()> {
        let dest = collision.dest_rel.to_string_lossy().to_string();
        let unoe_path = collision.unoe_src.to_string_lossy().to_string();
        let dose_path = collision.dose_src.to_string_lossy().to_string();
        let unoe_size = unoe.size.to_string();
        let dose_size = dose.size.to_string();
        let resulting = resulting.join(";");
        let fields = [
            dest.as_str(),
            classification.as_str(),
            action.as_str(),
            unoe_path.as_str(),
            unoe_size.as_str(),
            unoe.mtime_utc.as_str(),
            unoe.sha256.as_str(),
            dose_path.as_str(),
            dose_size.as_str(),
            dose.mtime_utc.as_str(),
            dose.sha256.as_str(),
            resulting.as_str(),
        ];
        if candidate {
            self.candidates.append(&fields)
        } else {
            self.resolutions.append(&fields)
        }
    }
}

/// Append provenance for every source file whose content reached its
/// canonical destination
///
/// Runs after collision resolution: non-colliding files get their single
/// attribution, identical collisions keep one row per origin, and a replaced
/// destination only matches the winning side, so the losing side is
/// suppressed by the hash check rather than recorded stale.
///
/// # Errors
///
/// Returns an error on store I/O failure or cancellation; unreadable source
/// files are logged and skipped.
pub fn provenance_sweep(
    cfg: &RunConfig,
    tax: &Taxonomy,
    store: &mut ProvenanceStore,
) -> Result<u64> {
    let mut recorded = 0u64;
    for origin in [Origin::Unoe, Origin::Dose] {
        let root = cfg.source_root(origin);
        let mut top_level: Vec<_> = fs::read_dir(root)
            .map_err(|e| MergeError::fs(format!("failed to list {}: {e}", root.display())))?
            .filter_map(std::result::Result::ok)
            .collect();
        top_level.sort_by_key(std::fs::DirEntry::file_name);

        for entry in top_level {
            if cancelled() {
                return Err(MergeError::Cancelled);
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            let path = entry.path();
            if path.is_dir() {
                let route = tax.classify_dir(origin, &name);
                let Some(subpath) = route.subpath().map(Path::to_path_buf) else {
                    continue;
                };
                let walker = WalkDir::new(&path)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_entry(|e| e.depth() == 0 || !is_excluded_os_name(e.file_name()));
                for file in walker {
                    if cancelled() {
                        return Err(MergeError::Cancelled);
                    }
                    let Ok(file) = file else { continue };
                    if !file.file_type().is_file() {
                        continue;
                    }
                    let Ok(rel) = file.path().strip_prefix(&path) else {
                        continue;
                    };
                    let dest_rel = subpath.join(rel).to_string_lossy().to_string();
                    recorded +=
                        u64::from(sweep_one(cfg, store, origin, file.path(), &dest_rel)?);
                }
            } else if path.is_file() {
                if let Route::LooseFile(dest) = tax.classify_loose_file(origin, &name) {
                    let dest_rel = dest.to_string_lossy().to_string();
                    recorded += u64::from(sweep_one(cfg, store, origin, &path, &dest_rel)?);
                }
            }
        }
    }
    info!("provenance sweep recorded {recorded} rows");
    Ok(recorded)
}

fn sweep_one(
    cfg: &RunConfig,
    store: &mut ProvenanceStore,
    origin: Origin,
    src: &Path,
    dest_rel: &str,
) -> Result<bool> {
    let rec = match read_file_record(src) {
        Ok(r) => r,
        Err(e) => {
            warn!("skipping unreadable source {}: {e}", src.display());
            return Ok(false);
        }
    };
    let row = ProvenanceRow {
        dest_path: dest_rel.to_string(),
        origin,
        source_path: src.to_string_lossy().to_string(),
        create_time: rec.create_time,
        src_mtime_utc: rec.mtime_utc,
        size_bytes: rec.size,
        sha256: rec.sha256,
    };
    store.record_checked(&cfg.uno_root, &row)
}
