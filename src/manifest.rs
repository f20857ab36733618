//! Creation-time manifest
//!
//! Joins the provenance store by content identity: every destination sharing
//! a content hash inherits the earliest valid creation time recorded for that
//! hash from either origin. Destinations with no recoverable time are listed
//! separately with the reason, for the Windows-side operator to review.

use crate::config::RunConfig;
use crate::csvio::CsvAppender;
use crate::error::{MergeError, Result};
use crate::metadata::CreateTimeStatus;
use crate::provenance::{self, ProvenanceRow};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use tracing::info;

/// Column header of `creation_times.csv`
pub const MANIFEST_HEADER: [&str; 2] = ["dest_path_relative_to_share", "earliest_create_time_utc_iso8601"];

/// Column header of `missing_creation_times.csv`
pub const MISSING_HEADER: [&str; 2] = ["dest_path", "reason"];

/// Manifest build summary
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestStats {
    /// Destinations that received a creation time
    pub mapped: u64,
    /// Destinations listed with a missing-time reason
    pub missing: u64,
}

/// Why a destination received no creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingReason {
    DestinationMissing,
    MissingIdentityKey,
    MissingCreationTime,
}

impl MissingReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::DestinationMissing => "destination_missing",
            Self::MissingIdentityKey => "missing_identity_key",
            Self::MissingCreationTime => "missing_creation_time",
        }
    }
}

/// Build the creation-time manifest from the provenance store
///
/// # Errors
///
/// Returns [`MergeError::InvalidManifest`] when the provenance store is
/// missing or malformed, and I/O errors for output failures.
pub fn build_manifest(cfg: &RunConfig) -> Result<ManifestStats> {
    let rows = provenance::read_rows(&cfg.provenance_path())?;
    if rows.is_empty() {
        return Err(MergeError::InvalidManifest(
            "provenance store has no rows; run the resolve phase first".to_string(),
        ));
    }

    // earliest valid creation time per content hash; ISO-8601 sorts
    // chronologically, so the lexicographic minimum is the earliest
    let mut earliest_by_hash: BTreeMap<&str, &str> = BTreeMap::new();
    for row in &rows {
        if row.create_time.status != CreateTimeStatus::Ok {
            continue;
        }
        let time = row.create_time.time.as_str();
        earliest_by_hash
            .entry(row.sha256.as_str())
            .and_modify(|current| {
                if time < *current {
                    *current = time;
                }
            })
            .or_insert(time);
    }

    let mut by_dest: BTreeMap<&str, Vec<&ProvenanceRow>> = BTreeMap::new();
    for row in &rows {
        by_dest.entry(row.dest_path.as_str()).or_default().push(row);
    }

    let mut manifest = CsvAppender::open(&cfg.manifest_path(), &MANIFEST_HEADER)?;
    let mut missing = CsvAppender::open(&cfg.missing_times_path(), &MISSING_HEADER)?;
    let mut stats = ManifestStats::default();

    for (dest, dest_rows) in &by_dest {
        match manifest_time(cfg, dest, dest_rows, &earliest_by_hash) {
            Ok(time) => {
                manifest.append(&[*dest, time])?;
                stats.mapped += 1;
            }
            Err(reason) => {
                missing.append(&[*dest, reason.as_str()])?;
                stats.missing += 1;
            }
        }
    }

    write_instructions(cfg)?;
    info!(
        "creation-time manifest: {} mapped, {} without a recoverable time",
        stats.mapped, stats.missing
    );
    Ok(stats)
}

/// Pick the manifest time for one destination, or the reason there is none
fn manifest_time<'a>(
    cfg: &RunConfig,
    dest: &str,
    dest_rows: &[&ProvenanceRow],
    earliest_by_hash: &BTreeMap<&str, &'a str>,
) -> std::result::Result<&'a str, MissingReason> {
    let dest_abs = cfg.uno_root.join(dest);
    let Ok(md) = fs::metadata(&dest_abs) else {
        return Err(MissingReason::DestinationMissing);
    };
    // rows whose recorded size matches the file today identify the current
    // content; the last such append wins
    let identity = dest_rows
        .iter()
        .rev()
        .find(|row| row.size_bytes == md.len())
        .map(|row| row.sha256.as_str())
        .ok_or(MissingReason::MissingIdentityKey)?;
    earliest_by_hash
        .get(identity)
        .copied()
        .ok_or(MissingReason::MissingCreationTime)
}

fn write_instructions(cfg: &RunConfig) -> Result<()> {
    let path = cfg.instructions_path();
    let mut file = fs::File::create(&path)
        .map_err(|e| MergeError::fs(format!("failed to create {}: {e}", path.display())))?;
    let text = format!(
        "\
Restoring Windows creation times on the consolidated share
==========================================================

1. Map the consolidated volume as a network drive on the Windows machine
   (the share root corresponds to {uno}).
2. Copy creation_times.csv from this directory to the Windows machine.
3. Run the apply tool against the share root:

       apply-crtimes.exe --share-root <drive>:\\ --manifest creation_times.csv

   The tool resolves each dest_path_relative_to_share under the share root
   and sets the file creation time to the manifest value. Files already
   within 2 seconds of the target are left untouched, so the tool can be
   re-run safely. It exits 0 on success, 2 when too many files failed.
4. Destinations listed in missing_creation_times.csv carry no recoverable
   creation time (see the reason column) and are not touched by the tool.

Run: {run_id}
",
        uno = cfg.uno_root.display(),
        run_id = cfg.run_id,
    );
    file.write_all(text.as_bytes())
        .map_err(|e| MergeError::fs(format!("failed to write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::csvio;
    use crate::provenance::PROVENANCE_HEADER;
    use std::path::Path;
    use tempfile::TempDir;

    fn cfg_in(dir: &Path) -> RunConfig {
        RunConfig {
            unoe_root: dir.join("unoe"),
            dose_root: dir.join("dose"),
            uno_root: dir.join("uno"),
            run_id: "test".to_string(),
            run_dir: dir.join("logs"),
            dry_run: false,
            allow_unprivileged: true,
            dedupe_tool: "jdupes".to_string(),
            owner: String::new(),
            group: String::new(),
        }
    }

    fn write_provenance(cfg: &RunConfig, rows: &[[&str; 8]]) {
        let mut appender = CsvAppender::open(&cfg.provenance_path(), &PROVENANCE_HEADER).unwrap();
        for row in rows {
            appender.append(row).unwrap();
        }
    }

    #[test]
    fn identical_content_shares_the_earliest_time() {
        let tmp = TempDir::new().unwrap();
        let cfg = cfg_in(tmp.path());
        fs::create_dir_all(&cfg.run_dir).unwrap();
        fs::create_dir_all(&cfg.uno_root).unwrap();
        fs::write(cfg.uno_root.join("a.txt"), b"same").unwrap();
        fs::write(cfg.uno_root.join("b.txt"), b"same").unwrap();

        // same hash from both destinations; only one origin supplied a time
        write_provenance(
            &cfg,
            &[
                [
                    "a.txt",
                    "UNOE",
                    "/mnt/UNOE/Docs/a.txt",
                    "2015-03-02T10:00:00Z",
                    "ok",
                    "2020-01-01T00:00:00Z",
                    "4",
                    "hash_same",
                ],
                [
                    "b.txt",
                    "DOSE",
                    "/mnt/DOSE/Docs/b.txt",
                    "",
                    "parse_error",
                    "2020-01-01T00:00:00Z",
                    "4",
                    "hash_same",
                ],
            ],
        );

        let stats = build_manifest(&cfg).unwrap();
        assert_eq!(stats.mapped, 2);
        assert_eq!(stats.missing, 0);

        let rows = csvio::read_rows(&cfg.manifest_path(), &MANIFEST_HEADER).unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["a.txt".to_string(), "2015-03-02T10:00:00Z".to_string()],
                vec!["b.txt".to_string(), "2015-03-02T10:00:00Z".to_string()],
            ]
        );
    }

    #[test]
    fn earliest_time_is_the_minimum_across_duplicates() {
        let tmp = TempDir::new().unwrap();
        let cfg = cfg_in(tmp.path());
        fs::create_dir_all(&cfg.run_dir).unwrap();
        fs::create_dir_all(&cfg.uno_root).unwrap();
        fs::write(cfg.uno_root.join("x.txt"), b"data").unwrap();

        write_provenance(
            &cfg,
            &[
                [
                    "x.txt",
                    "UNOE",
                    "/mnt/UNOE/x.txt",
                    "2018-06-01T00:00:00Z",
                    "ok",
                    "2020-01-01T00:00:00Z",
                    "4",
                    "h1",
                ],
                [
                    "x.txt",
                    "DOSE",
                    "/mnt/DOSE/x.txt",
                    "2012-01-05T00:00:00Z",
                    "ok",
                    "2020-01-01T00:00:00Z",
                    "4",
                    "h1",
                ],
            ],
        );

        build_manifest(&cfg).unwrap();
        let rows = csvio::read_rows(&cfg.manifest_path(), &MANIFEST_HEADER).unwrap();
        assert_eq!(rows[0][1], "2012-01-05T00:00:00Z");
    }

    #[test]
    fn missing_reasons_are_annotated() {
        let tmp = TempDir::new().unwrap();
        let cfg = cfg_in(tmp.path());
        fs::create_dir_all(&cfg.run_dir).unwrap();
        fs::create_dir_all(&cfg.uno_root).unwrap();
        // gone.txt never created; stale.txt has the wrong recorded size;
        // timeless.txt is fine but no row for its hash has an ok status
        fs::write(cfg.uno_root.join("stale.txt"), b"now different").unwrap();
        fs::write(cfg.uno_root.join("timeless.txt"), b"data").unwrap();

        write_provenance(
            &cfg,
            &[
                [
                    "gone.txt",
                    "UNOE",
                    "/mnt/UNOE/gone.txt",
                    "2015-01-01T00:00:00Z",
                    "ok",
                    "2020-01-01T00:00:00Z",
                    "4",
                    "h1",
                ],
                [
                    "stale.txt",
                    "UNOE",
                    "/mnt/UNOE/stale.txt",
                    "2015-01-01T00:00:00Z",
                    "ok",
                    "2020-01-01T00:00:00Z",
                    "4",
                    "h2",
                ],
                [
                    "timeless.txt",
                    "DOSE",
                    "/mnt/DOSE/timeless.txt",
                    "",
                    "missing",
                    "2020-01-01T00:00:00Z",
                    "4",
                    "h3",
                ],
            ],
        );

        let stats = build_manifest(&cfg).unwrap();
        assert_eq!(stats.mapped, 0);
        assert_eq!(stats.missing, 3);
        let rows = csvio::read_rows(&cfg.missing_times_path(), &MISSING_HEADER).unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["gone.txt".to_string(), "destination_missing".to_string()],
                vec!["stale.txt".to_string(), "missing_identity_key".to_string()],
                vec!["timeless.txt".to_string(), "missing_creation_time".to_string()],
            ]
        );
    }

    #[test]
    fn missing_provenance_store_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let cfg = cfg_in(tmp.path());
        fs::create_dir_all(&cfg.run_dir).unwrap();
        assert!(matches!(
            build_manifest(&cfg),
            Err(MergeError::InvalidManifest(_))
        ));
    }
}
