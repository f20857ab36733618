//! Shared fixtures for the integration tests
//!
//! Builds a miniature pair of source volumes and a destination volume in a
//! tempdir, with the run directory outside the destination so assertions
//! about the destination tree stay simple.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use volmerge::config::RunConfig;
use volmerge::phases::{Phase, PhaseRunner};

pub struct Fixture {
    pub tmp: TempDir,
    pub cfg: RunConfig,
}

/// Build an empty fixture with all three volume roots present
pub fn fixture(run_id: &str) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let cfg = RunConfig {
        unoe_root: tmp.path().join("unoe"),
        dose_root: tmp.path().join("dose"),
        uno_root: tmp.path().join("uno"),
        run_id: run_id.to_string(),
        run_dir: tmp.path().join("logs").join(run_id),
        dry_run: false,
        allow_unprivileged: true,
        dedupe_tool: "sh".to_string(),
        owner: "no_such_user_volmerge".to_string(),
        group: "no_such_group_volmerge".to_string(),
    };
    fs::create_dir_all(&cfg.unoe_root).unwrap();
    fs::create_dir_all(&cfg.dose_root).unwrap();
    fs::create_dir_all(&cfg.uno_root).unwrap();
    Fixture { tmp, cfg }
}

impl Fixture {
    /// Write a source file (path relative to the tempdir) with fixed
    /// content and mtime
    pub fn write(&self, volume_rel: &str, contents: &[u8], mtime_secs: i64) -> PathBuf {
        let path = self.tmp.path().join(volume_rel);
        write_file(&path, contents, mtime_secs);
        path
    }

    /// Point the dedupe phase at a stub that records its invocation
    pub fn stub_deduper(&mut self) {
        let bin = self.tmp.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let script = bin.join("fakedupes");
        fs::write(&script, "#!/bin/sh\necho \"fakedupes $@\"\nexit 0\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        self.cfg.dedupe_tool = script.to_string_lossy().to_string();
    }

    /// Run the given phases, panicking on failure
    pub fn run(&self, phases: &[Phase]) {
        self.try_run(phases).unwrap();
    }

    /// Run the given phases, returning the error if any
    pub fn try_run(&self, phases: &[Phase]) -> volmerge::Result<()> {
        let mut runner = PhaseRunner::new(self.cfg.clone())?;
        runner.run(phases)
    }

    /// Absolute destination path for a destination-relative path
    pub fn uno(&self, rel: &str) -> PathBuf {
        self.cfg.uno_root.join(rel)
    }

    /// Hash a destination-relative path
    pub fn uno_sha(&self, rel: &str) -> String {
        volmerge::metadata::sha256_file(&self.uno(rel)).unwrap()
    }
}

/// Write a file (creating parents) with a fixed mtime
pub fn write_file(path: &Path, contents: &[u8], mtime_secs: i64) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(mtime_secs, 0)).unwrap();
}

/// Snapshot of a source tree used to assert nothing mutated it
pub fn tree_snapshot(root: &Path) -> Vec<(PathBuf, u64, i64, String)> {
    let mut snapshot = Vec::new();
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let md = entry.metadata().unwrap();
        let mtime = filetime::FileTime::from_last_modification_time(&md).unix_seconds();
        let hash = volmerge::metadata::sha256_file(entry.path()).unwrap();
        snapshot.push((entry.path().to_path_buf(), md.len(), mtime, hash));
    }
    snapshot
}
