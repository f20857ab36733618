//! Binary-level CLI behavior: self-test, validation failures, and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn volmerge() -> Command {
    Command::cargo_bin("volmerge").unwrap()
}

#[test]
fn self_test_passes_without_volumes() {
    volmerge()
        .arg("--self-test")
        .assert()
        .success()
        .stdout(predicate::str::contains("self-test passed"));
}

#[test]
fn help_documents_the_flags() {
    volmerge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--phase"))
        .stdout(predicate::str::contains("--run-id"))
        .stdout(predicate::str::contains("--log-dir"))
        .stdout(predicate::str::contains("--self-test"));
}

#[test]
fn malformed_run_id_exits_one() {
    volmerge()
        .args(["--run-id", "../escape", "--phase", "preflight"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("run id"));
}

#[test]
fn unknown_phase_is_rejected_by_the_parser() {
    volmerge()
        .args(["--phase", "defrag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("defrag"));
}

#[test]
fn preflight_fails_when_a_volume_root_is_missing() {
    let tmp = TempDir::new().unwrap();
    let uno = tmp.path().join("uno");
    std::fs::create_dir_all(&uno).unwrap();
    volmerge()
        .args([
            "--phase",
            "preflight",
            "--run-id",
            "t1",
            "--allow-unprivileged",
            "--dedupe-tool",
            "sh",
            "--unoe-root",
            tmp.path().join("missing-unoe").to_str().unwrap(),
            "--dose-root",
            tmp.path().join("missing-dose").to_str().unwrap(),
            "--uno-root",
            uno.to_str().unwrap(),
            "--log-dir",
            tmp.path().join("logs").to_str().unwrap(),
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("volume root"));
}

#[test]
fn preflight_fails_when_the_deduper_is_missing() {
    let tmp = TempDir::new().unwrap();
    for dir in ["unoe", "dose", "uno"] {
        std::fs::create_dir_all(tmp.path().join(dir)).unwrap();
    }
    volmerge()
        .args([
            "--phase",
            "preflight",
            "--run-id",
            "t2",
            "--allow-unprivileged",
            "--dedupe-tool",
            "no-such-deduper-on-path",
            "--unoe-root",
            tmp.path().join("unoe").to_str().unwrap(),
            "--dose-root",
            tmp.path().join("dose").to_str().unwrap(),
            "--uno-root",
            tmp.path().join("uno").to_str().unwrap(),
            "--log-dir",
            tmp.path().join("logs").to_str().unwrap(),
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("required tool"));
}
