//! Append-only provenance store
//!
//! Every destination file is attributed to the source file(s) that supplied
//! its content. A row is appended only after re-hashing the destination and
//! confirming it still equals the recorded source hash; a mismatch suppresses
//! the row so nothing is ever falsely attributed. Rows are never rewritten or
//! deleted; exact re-appends are elided in memory and consumers tolerate any
//! duplicates that survive across process restarts.

use crate::config::Origin;
use crate::csvio::{self, CsvAppender};
use crate::error::{MergeError, Result};
use crate::metadata::{self, CreateTime, CreateTimeStatus};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

/// Column header of `provenance.csv`
pub const PROVENANCE_HEADER: [&str; 8] = [
    "dest_path",
    "origin",
    "source_path",
    "src_create_time_utc",
    "create_time_status",
    "src_mtime_utc",
    "size_bytes",
    "sha256",
];

/// One provenance row
#[derive(Debug, Clone)]
pub struct ProvenanceRow {
    /// Destination path relative to the destination root
    pub dest_path: String,
    /// Which source volume contributed the content
    pub origin: Origin,
    /// Absolute source path
    pub source_path: String,
    /// Windows creation time probe result for the source file
    pub create_time: CreateTime,
    /// Source mtime, ISO-8601 UTC
    pub src_mtime_utc: String,
    /// Source size in bytes
    pub size_bytes: u64,
    /// Source content hash
    pub sha256: String,
}

impl ProvenanceRow {
    fn fields(&self) -> [String; 8] {
        [
            self.dest_path.clone(),
            self.origin.label().to_string(),
            self.source_path.clone(),
            self.create_time.time.clone(),
            self.create_time.status.as_str().to_string(),
            self.src_mtime_utc.clone(),
            self.size_bytes.to_string(),
            self.sha256.clone(),
        ]
    }
}

/// Append-only store over `provenance.csv`
pub struct ProvenanceStore {
    appender: CsvAppender,
    seen: HashSet<String>,
}

impl ProvenanceStore {
    /// Open or create the store, loading existing rows for duplicate elision
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists with an unexpected header or on
    /// I/O failure.
    pub fn open(path: &Path) -> Result<Self> {
        let seen = if path.exists() {
            csvio::read_rows(path, &PROVENANCE_HEADER)?
                .into_iter()
                .map(|row| row.join("\u{1f}"))
                .collect()
        } else {
            HashSet::new()
        };
        Ok(Self {
            appender: CsvAppender::open(path, &PROVENANCE_HEADER)?,
            seen,
        })
    }

    /// Append a row after verifying the destination content still matches
    /// the recorded source hash
    ///
    /// Returns `true` when the row was written, `false` when it was
    /// suppressed (hash mismatch) or elided as an exact duplicate.
    ///
    /// # Errors
    ///
    /// Returns an error only on store I/O failure; a missing or unreadable
    /// destination suppresses the row like a mismatch does.
    pub fn record_checked(&mut self, dest_root: &Path, row: &ProvenanceRow) -> Result<bool> {
        let dest_abs = dest_root.join(&row.dest_path);
        match metadata::sha256_file(&dest_abs) {
            Ok(dest_hash) if dest_hash == row.sha256 => self.append(row),
            Ok(dest_hash) => {
                warn!(
                    "provenance suppressed for {}: destination hash {} does not match source {} ({})",
                    row.dest_path, dest_hash, row.sha256, row.source_path
                );
                Ok(false)
            }
            Err(e) => {
                warn!("provenance suppressed for {}: {e}", row.dest_path);
                Ok(false)
            }
        }
    }

    fn append(&mut self, row: &ProvenanceRow) -> Result<bool> {
        let fields = row.fields();
        let key = fields.join("\u{1f}");
        if !self.seen.insert(key) {
            return Ok(false);
        }
        let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        self.appender.append(&refs)?;
        Ok(true)
    }
}

/// Read all rows back for the manifest phase
///
/// # Errors
///
/// Returns [`MergeError::InvalidManifest`] when the store is missing, has a
/// different header, or contains an unparseable row.
pub fn read_rows(path: &Path) -> Result<Vec<ProvenanceRow>> {
    if !path.exists() {
        return Err(MergeError::InvalidManifest(format!(
            "provenance store missing: {}",
            path.display()
        )));
    }
    let raw = csvio::read_rows(path, &PROVENANCE_HEADER)
        .map_err(|e| MergeError::InvalidManifest(e.to_string()))?;
    let mut rows = Vec::with_capacity(raw.len());
    for fields in raw {
        rows.push(parse_row(&fields)?);
    }
    Ok(rows)
}

fn parse_row(fields: &[String]) -> Result<ProvenanceRow> {
    let origin = match fields[1].as_str() {
        "UNOE" => Origin::Unoe,
        "DOSE" => Origin::Dose,
        other => {
            return Err(MergeError::InvalidManifest(format!(
                "unknown origin {other:?} in provenance row for {}",
                fields[0]
            )))
        }
    };
    let status = CreateTimeStatus::parse(&fields[4]).ok_or_else(|| {
        MergeError::InvalidManifest(format!(
            "unknown create_time_status {:?} in provenance row for {}",
            fields[4], fields[0]
        ))
    })?;
    let size_bytes = fields[6].parse::<u64>().map_err(|_| {
        MergeError::InvalidManifest(format!(
            "bad size_bytes {:?} in provenance row for {}",
            fields[6], fields[0]
        ))
    })?;
    Ok(ProvenanceRow {
        dest_path: fields[0].clone(),
        origin,
        source_path: fields[2].clone(),
        create_time: CreateTime {
            time: fields[3].clone(),
            status,
        },
        src_mtime_utc: fields[5].clone(),
        size_bytes,
        sha256: fields[7].clone(),
    })
}
