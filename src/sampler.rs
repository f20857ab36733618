//! Conflict-biased deterministic hash sampling
//!
//! The sample proves content preservation across the hardlink dedupe: every
//! conflict outcome is included, then each content-heavy bucket contributes
//! its largest files plus a seeded uniform-random draw. The chosen path list
//! is persisted so the post-dedupe pass re-hashes exactly the same files.

use crate::config::{cancelled, RunConfig};
use crate::csvio::{self, CsvAppender};
use crate::error::{MergeError, Result};
use crate::metadata::sha256_file;
use crate::taxonomy::{is_excluded_os_name, CONTENT_HEAVY_BUCKETS};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Column header of the hash sample CSVs
pub const SAMPLE_HEADER: [&str; 3] = ["relative_path", "sha256", "size_bytes"];

/// Largest-by-size files taken per content-heavy bucket
pub const LARGEST_PER_BUCKET: usize = 50;
/// Maximum random files drawn per content-heavy bucket
pub const RANDOM_PER_BUCKET: usize = 200;

/// Deterministic seed for one bucket's random draw
///
/// First eight bytes, big-endian, of SHA-256(`run_id` ‖ 0x00 ‖ `bucket`);
/// seeding per (run, bucket) keeps draws uncorrelated across buckets.
#[must_use]
pub fn seed_for(run_id: &str, bucket: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(bucket.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Build the ordered, deduplicated sample path list for a run
///
/// # Errors
///
/// Returns an error when the resolution log exists but cannot be parsed, or
/// on cancellation.
pub fn build_sample_list(cfg: &RunConfig) -> Result<Vec<String>> {
    let mut ordered: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut push = |path: String, ordered: &mut Vec<String>| {
        if seen.insert(path.clone()) {
            ordered.push(path);
        }
    };

    // every conflict outcome first
    let resolutions = cfg.resolutions_path();
    if resolutions.exists() {
        for row in csvio::read_rows(&resolutions, &crate::collision::COLLISION_HEADER)? {
            push(row[0].clone(), &mut ordered);
            for resulting in row[11].split(';').filter(|p| !p.is_empty()) {
                push(resulting.to_string(), &mut ordered);
            }
        }
    }

    for bucket in CONTENT_HEAVY_BUCKETS {
        if cancelled() {
            return Err(MergeError::Cancelled);
        }
        let files = bucket_inventory(&cfg.uno_root, bucket)?;
        if files.is_empty() {
            continue;
        }
        let mut by_size: Vec<usize> = (0..files.len()).collect();
        by_size.sort_by(|&a, &b| {
            files[b]
                .1
                .cmp(&files[a].1)
                .then_with(|| files[a].0.cmp(&files[b].0))
        });
        for &i in by_size.iter().take(LARGEST_PER_BUCKET) {
            push(files[i].0.clone(), &mut ordered);
        }

        let mut rng = StdRng::seed_from_u64(seed_for(&cfg.run_id, bucket));
        let mut indices: Vec<usize> = (0..files.len()).collect();
        indices.shuffle(&mut rng);
        for &i in indices.iter().take(RANDOM_PER_BUCKET) {
            push(files[i].0.clone(), &mut ordered);
        }
    }

    info!("hash sample selects {} destination files", ordered.len());
    Ok(ordered)
}

/// Sorted inventory of (relative path, size) for one destination bucket
fn bucket_inventory(uno_root: &Path, bucket: &str) -> Result<Vec<(String, u64)>> {
    let dir = uno_root.join(bucket);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let walker = WalkDir::new(&dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded_os_name(e.file_name()));
    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(uno_root) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push((rel.to_string_lossy().to_string(), size));
    }
    Ok(files)
}

/// Persist the sample path list, one path per line
///
/// # Errors
///
/// Returns an error on write failure.
pub fn write_sample_list(path: &Path, samples: &[String]) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| MergeError::fs(format!("failed to create {}: {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    for sample in samples {
        writeln!(writer, "{sample}")
            .map_err(|e| MergeError::fs(format!("failed to write {}: {e}", path.display())))?;
    }
    writer
        .flush()
        .map_err(|e| MergeError::fs(format!("failed to flush {}: {e}", path.display())))
}

/// Read a persisted sample path list back
///
/// # Errors
///
/// Returns an error when the list cannot be read.
pub fn read_sample_list(path: &Path) -> Result<Vec<String>> {
    let mut content = String::new();
    File::open(path)
        .and_then(|mut f| f.read_to_string(&mut content))
        .map_err(|e| MergeError::fs(format!("failed to read {}: {e}", path.display())))?;
    Ok(content.lines().map(str::to_string).collect())
}

/// Hash every sampled path and write the sample CSV
///
/// Returns the number of rows written. Unreadable paths are logged and
/// skipped so a partially damaged destination still yields a comparable
/// sample.
///
/// # Errors
///
/// Returns an error on CSV write failure or cancellation.
pub fn hash_sample(cfg: &RunConfig, samples: &[String], out: &Path) -> Result<u64> {
    let mut appender = CsvAppender::open(out, &SAMPLE_HEADER)?;
    let mut written = 0u64;
    for rel in samples {
        if cancelled() {
            return Err(MergeError::Cancelled);
        }
        let abs = cfg.uno_root.join(rel);
        let size = match fs::metadata(&abs) {
            Ok(md) => md.len(),
            Err(e) => {
                warn!("sample path {rel} unreadable: {e}");
                continue;
            }
        };
        let sha256 = match sha256_file(&abs) {
            Ok(h) => h,
            Err(e) => {
                warn!("sample path {rel} unhashable: {e}");
                continue;
            }
        };
        let size_str = size.to_string();
        appender.append(&[rel.as_str(), sha256.as_str(), size_str.as_str()])?;
        written += 1;
    }
    info!("hashed {written} of {} sampled files into {}", samples.len(), out.display());
    Ok(written)
}

/// Compare the pre- and post-dedupe samples; returns the paths whose hash
/// changed or disappeared
///
/// # Errors
///
/// Returns an error when either sample CSV cannot be read.
pub fn compare_samples(pre: &Path, post: &Path) -> Result<Vec<String>> {
    let load = |path: &Path| -> Result<BTreeMap<String, String>> {
        Ok(csvio::read_rows(path, &SAMPLE_HEADER)?
            .into_iter()
            .map(|row| (row[0].clone(), row[1].clone()))
            .collect())
    };
    let pre_rows = load(pre)?;
    let post_rows = load(post)?;
    let mut mismatched = Vec::new();
    for (rel, pre_hash) in &pre_rows {
        match post_rows.get(rel) {
            Some(post_hash) if post_hash == pre_hash => {}
            _ => mismatched.push(rel.clone()),
        }
    }
    Ok(mismatched)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::config::RunConfig;
    use tempfile::TempDir;

    fn cfg_in(dir: &Path, run_id: &str) -> RunConfig {
        RunConfig {
            unoe_root: dir.join("unoe"),
            dose_root: dir.join("dose"),
            uno_root: dir.join("uno"),
            run_id: run_id.to_string(),
            run_dir: dir.join("logs"),
            dry_run: false,
            allow_unprivileged: true,
            dedupe_tool: "jdupes".to_string(),
            owner: String::new(),
            group: String::new(),
        }
    }

    #[test]
    fn seed_differs_per_bucket_and_run() {
        let a = seed_for("run-1", "02_Media/Video");
        let b = seed_for("run-1", "05_Games");
        let c = seed_for("run-2", "02_Media/Video");
        assert_ne!(a, b);
        assert_ne!(a, c);
        // and is stable
        assert_eq!(a, seed_for("run-1", "02_Media/Video"));
    }

    #[test]
    fn sample_is_deterministic_for_a_run_id() {
        let tmp = TempDir::new().unwrap();
        let cfg = cfg_in(tmp.path(), "2024-01-01_000000");
        let video = cfg.uno_root.join("02_Media/Video");
        fs::create_dir_all(&video).unwrap();
        for i in 0..30 {
            fs::write(video.join(format!("v{i:02}.mp4")), vec![0u8; i * 10]).unwrap();
        }
        fs::create_dir_all(&cfg.run_dir).unwrap();

        let first = build_sample_list(&cfg).unwrap();
        let second = build_sample_list(&cfg).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
        // every bucket file fits under largest-50 + random-200
        assert_eq!(first.len(), 30);
    }

    #[test]
    fn sample_list_round_trips_through_disk() {
        let tmp = TempDir::new().unwrap();
        let list = vec!["a/b.mp4".to_string(), "c d/e,f.iso".to_string()];
        let path = tmp.path().join("hash_sample_paths.txt");
        write_sample_list(&path, &list).unwrap();
        assert_eq!(read_sample_list(&path).unwrap(), list);
    }

    #[test]
    fn compare_flags_changed_and_missing_hashes() {
        let tmp = TempDir::new().unwrap();
        let pre = tmp.path().join("pre.csv");
        let post = tmp.path().join("post.csv");
        {
            let mut a = CsvAppender::open(&pre, &SAMPLE_HEADER).unwrap();
            a.append(&["a.bin", "aaaa", "1"]).unwrap();
            a.append(&["b.bin", "bbbb", "2"]).unwrap();
            a.append(&["c.bin", "cccc", "3"]).unwrap();
        }
        {
            let mut a = CsvAppender::open(&post, &SAMPLE_HEADER).unwrap();
            a.append(&["a.bin", "aaaa", "1"]).unwrap();
            a.append(&["b.bin", "ffff", "2"]).unwrap();
        }
        let mismatched = compare_samples(&pre, &post).unwrap();
        assert_eq!(mismatched, vec!["b.bin".to_string(), "c.bin".to_string()]);
    }
}
