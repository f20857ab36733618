//! Per-file metadata: size, mtime, SHA-256, and Windows creation time
//!
//! The Windows creation time is recovered in probe order: native birth time
//! when the filesystem reports one, then the `system.ntfs_crtime_be` and
//! `system.ntfs_crtime` extended attributes carried over from the NTFS
//! sources. Attribute decoding failures are a first-class status, distinct
//! from the attribute being absent, and round-trip verbatim through the
//! provenance store.

use crate::error::{MergeError, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Chunk size for streamed hashing
pub const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;
/// FILETIME ticks (100 ns) per second
const FILETIME_TICKS_PER_SEC: u64 = 10_000_000;

const XATTR_CRTIME_BE: &str = "system.ntfs_crtime_be";
const XATTR_CRTIME: &str = "system.ntfs_crtime";

/// Outcome of the creation-time probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateTimeStatus {
    /// A valid creation time was recovered
    Ok,
    /// An attribute was present but did not decode
    ParseError,
    /// No source supplied a value
    Missing,
}

impl CreateTimeStatus {
    /// CSV field representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ParseError => "parse_error",
            Self::Missing => "missing",
        }
    }

    /// Parse the CSV field representation back
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "parse_error" => Some(Self::ParseError),
            "missing" => Some(Self::Missing),
            _ => None,
        }
    }
}

/// Windows creation time probe result: the time is empty unless status is ok
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTime {
    /// ISO-8601 UTC at second precision, or empty
    pub time: String,
    /// Probe status
    pub status: CreateTimeStatus,
}

impl CreateTime {
    fn ok(time: String) -> Self {
        Self {
            time,
            status: CreateTimeStatus::Ok,
        }
    }

    fn parse_error() -> Self {
        Self {
            time: String::new(),
            status: CreateTimeStatus::ParseError,
        }
    }

    fn missing() -> Self {
        Self {
            time: String::new(),
            status: CreateTimeStatus::Missing,
        }
    }
}

/// Everything the pipeline records about one source file
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Size in bytes
    pub size: u64,
    /// Last-modified time, ISO-8601 UTC at second precision
    pub mtime_utc: String,
    /// Last-modified time as Unix seconds, for ordering comparisons
    pub mtime_secs: i64,
    /// Lowercase hex SHA-256 of the full content
    pub sha256: String,
    /// Windows creation time probe result
    pub create_time: CreateTime,
}

/// Format a system time as ISO-8601 UTC at second precision
#[must_use]
pub fn format_utc(t: SystemTime) -> String {
    DateTime::<Utc>::from(t).format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Unix seconds for a system time (negative before the epoch)
#[must_use]
pub fn unix_secs(t: SystemTime) -> i64 {
    DateTime::<Utc>::from(t).timestamp()
}

/// SHA-256 of the full content stream, lowercase hex
///
/// # Errors
///
/// Returns [`MergeError::FileSystem`] when the file cannot be opened or read.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| MergeError::fs(format!("failed to open {} for hashing: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let count = file
            .read(&mut buffer)
            .map_err(|e| MergeError::fs(format!("failed to read {}: {e}", path.display())))?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Read size, mtime, content hash, and creation time for one source file
///
/// # Errors
///
/// Returns an error when the file cannot be stat'ed or hashed. Creation-time
/// probe failures are not errors; they surface in the record's status.
pub fn read_file_record(path: &Path) -> Result<FileRecord> {
    let md = std::fs::metadata(path)
        .map_err(|e| MergeError::fs(format!("failed to stat {}: {e}", path.display())))?;
    let modified = md
        .modified()
        .map_err(|e| MergeError::fs(format!("no mtime for {}: {e}", path.display())))?;
    Ok(FileRecord {
        size: md.len(),
        mtime_utc: format_utc(modified),
        mtime_secs: unix_secs(modified),
        sha256: sha256_file(path)?,
        create_time: windows_create_time(path, &md),
    })
}

/// Probe the Windows creation time for a file
///
/// Probe order: native birth time (accepted only when strictly after the
/// Unix epoch), then `system.ntfs_crtime_be`, then `system.ntfs_crtime`.
/// When at least one attribute exists but none decodes, the status is
/// `parse_error`; when nothing supplies a value, `missing`.
#[must_use]
pub fn windows_create_time(path: &Path, md: &std::fs::Metadata) -> CreateTime {
    if let Ok(birth) = md.created() {
        if birth > UNIX_EPOCH {
            return CreateTime::ok(format_utc(birth));
        }
    }
    let mut saw_attr = false;
    for attr in [XATTR_CRTIME_BE, XATTR_CRTIME] {
        match xattr::get(path, attr) {
            Ok(Some(raw)) => {
                saw_attr = true;
                if let Some(time) = decode_filetime_hex(&raw) {
                    return CreateTime::ok(time);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!("xattr {attr} unreadable on {}: {e}", path.display());
            }
        }
    }
    if saw_attr {
        CreateTime::parse_error()
    } else {
        CreateTime::missing()
    }
}

/// Decode a hex-encoded 64-bit big-endian Windows FILETIME attribute value
///
/// Accepts an optional `0x` prefix and trailing whitespace/NULs. Values
/// longer than 16 hex digits keep only the trailing 16. Returns `None` for
/// non-hex content, wrong length, or a pre-epoch result.
#[must_use]
pub fn decode_filetime_hex(raw: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(raw).ok()?;
    let text = text.trim().trim_end_matches('\0').trim();
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
    let digits = if digits.len() > 16 {
        &digits[digits.len() - 16..]
    } else {
        digits
    };
    if digits.len() != 16 {
        return None;
    }
    let filetime = u64::from_str_radix(digits, 16).ok()?;
    filetime_to_iso(filetime)
}

fn filetime_to_iso(filetime: u64) -> Option<String> {
    let unix = i64::try_from(filetime / FILETIME_TICKS_PER_SEC).ok()? - FILETIME_EPOCH_OFFSET_SECS;
    if unix < 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp(unix, 0).map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    // 2015-03-02T00:00:00Z == FILETIME 0x01d0548a8ee0c000
    const FILETIME_2015: &str = "01d0548a8ee0c000";

    #[rstest]
    #[case("01d0548a8ee0c000", Some("2015-03-02T00:00:00Z"))]
    #[case("0x01d0548a8ee0c000", Some("2015-03-02T00:00:00Z"))]
    // longer than 16 digits: the trailing 16 win
    #[case("ffff01d0548a8ee0c000", Some("2015-03-02T00:00:00Z"))]
    // decodes to before the Unix epoch
    #[case("0000000000000001", None)]
    #[case("zzzzzzzzzzzzzzzz", None)]
    #[case("01d0", None)]
    #[case("", None)]
    fn filetime_decoding(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(decode_filetime_hex(input.as_bytes()).as_deref(), expected);
    }

    #[test]
    fn filetime_tolerates_trailing_nul() {
        let mut raw = FILETIME_2015.as_bytes().to_vec();
        raw.push(0);
        assert_eq!(
            decode_filetime_hex(&raw).as_deref(),
            Some("2015-03-02T00:00:00Z")
        );
    }

    #[test]
    fn sha256_matches_known_vector() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        File::create(&path).unwrap().write_all(b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_record_reads_size_and_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        File::create(&path).unwrap().write_all(&[0u8; 100]).unwrap();
        let mtime = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(mtime)).unwrap();

        let rec = read_file_record(&path).unwrap();
        assert_eq!(rec.size, 100);
        assert_eq!(rec.mtime_secs, 1_700_000_000);
        assert_eq!(rec.mtime_utc, "2023-11-14T22:13:20Z");
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            CreateTimeStatus::Ok,
            CreateTimeStatus::ParseError,
            CreateTimeStatus::Missing,
        ] {
            assert_eq!(CreateTimeStatus::parse(status.as_str()), Some(status));
        }
    }
}
