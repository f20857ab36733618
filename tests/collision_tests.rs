//! End-to-end collision scenarios: identical duplicates, the newer/larger
//! policy, keep-both suffixing, and re-run idempotence.

mod common;

use common::fixture;
use std::fs;
use volmerge::collision::COLLISION_HEADER;
use volmerge::csvio;
use volmerge::phases::Phase;
use volmerge::provenance;

const MERGE: &[Phase] = &[
    Phase::Prepare,
    Phase::CopyUnoe,
    Phase::CopyDose,
    Phase::Resolve,
];

// epoch seconds for fixed calendar days
const T_2022: i64 = 1_641_038_400; // 2022-01-01T12:00:00Z
const T_2023: i64 = 1_685_620_800; // 2023-06-01T12:00:00Z

#[test]
fn identical_duplicate_needs_no_action() {
    let fx = fixture("identical");
    fx.write("unoe/AUDIO/x.mp3", b"the same waveform", T_2022);
    fx.write("dose/AUDIO/x.mp3", b"the same waveform", T_2023);

    fx.run(MERGE);

    let dest = fx.uno("02_Media/Audio/x.mp3");
    assert_eq!(fs::read(&dest).unwrap(), b"the same waveform");

    let candidates = csvio::read_rows(&fx.cfg.candidates_path(), &COLLISION_HEADER).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0][1], "identical");
    assert_eq!(candidates[0][2], "no_action");

    // no resolution row for an identical collision
    let resolutions = csvio::read_rows(&fx.cfg.resolutions_path(), &COLLISION_HEADER).unwrap();
    assert!(resolutions.is_empty());

    // one provenance row per origin
    let rows = provenance::read_rows(&fx.cfg.provenance_path()).unwrap();
    let mut origins: Vec<&str> = rows
        .iter()
        .filter(|r| r.dest_path == "02_Media/Audio/x.mp3")
        .map(|r| r.origin.label())
        .collect();
    origins.sort_unstable();
    assert_eq!(origins, ["DOSE", "UNOE"]);
}

#[test]
fn newer_and_larger_side_replaces() {
    let fx = fixture("replace");
    fx.write("unoe/Video/v.mp4", &vec![b'a'; 100], T_2022);
    fx.write("dose/Video/v.mp4", &vec![b'b'; 120], T_2023);
    let dose_hash = volmerge::metadata::sha256_file(&fx.cfg.dose_root.join("Video/v.mp4")).unwrap();

    fx.run(MERGE);

    assert_eq!(fx.uno_sha("02_Media/Video/v.mp4"), dose_hash);

    let resolutions = csvio::read_rows(&fx.cfg.resolutions_path(), &COLLISION_HEADER).unwrap();
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0][1], "conflict");
    assert_eq!(resolutions[0][2], "replace_with_newest");
    assert_eq!(resolutions[0][11], "02_Media/Video/v.mp4");

    // provenance attributes the destination to DOSE only
    let rows = provenance::read_rows(&fx.cfg.provenance_path()).unwrap();
    let for_dest: Vec<_> = rows
        .iter()
        .filter(|r| r.dest_path == "02_Media/Video/v.mp4")
        .collect();
    assert!(!for_dest.is_empty());
    assert!(for_dest.iter().all(|r| r.origin.label() == "DOSE"));
    assert!(for_dest.iter().all(|r| r.sha256 == dose_hash));
}

#[test]
fn newer_but_smaller_side_keeps_both() {
    let fx = fixture("keepboth");
    fx.write("unoe/Pictures/p.jpg", &vec![b'o'; 5000], T_2022);
    fx.write("dose/Pictures/p.jpg", &vec![b'n'; 4000], T_2023);
    let unoe_hash =
        volmerge::metadata::sha256_file(&fx.cfg.unoe_root.join("Pictures/p.jpg")).unwrap();
    let dose_hash =
        volmerge::metadata::sha256_file(&fx.cfg.dose_root.join("Pictures/p.jpg")).unwrap();

    fx.run(MERGE);

    // newest (DOSE) wins the canonical slot, UNOE keeps the suffixed sibling
    assert_eq!(fx.uno_sha("02_Media/Photos/p.jpg"), dose_hash);
    assert_eq!(fx.uno_sha("02_Media/Photos/p__UNOE.jpg"), unoe_hash);

    let resolutions = csvio::read_rows(&fx.cfg.resolutions_path(), &COLLISION_HEADER).unwrap();
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0][2], "keep_both");
    assert_eq!(
        resolutions[0][11],
        "02_Media/Photos/p.jpg;02_Media/Photos/p__UNOE.jpg"
    );

    let rows = provenance::read_rows(&fx.cfg.provenance_path()).unwrap();
    let canonical: Vec<_> = rows
        .iter()
        .filter(|r| r.dest_path == "02_Media/Photos/p.jpg")
        .collect();
    assert!(canonical.iter().all(|r| r.origin.label() == "DOSE"));
    let suffixed: Vec<_> = rows
        .iter()
        .filter(|r| r.dest_path == "02_Media/Photos/p__UNOE.jpg")
        .collect();
    assert_eq!(suffixed.len(), 1);
    assert_eq!(suffixed[0].origin.label(), "UNOE");
}

#[test]
fn mtime_tie_is_broken_by_size_in_favor_of_larger() {
    let fx = fixture("tiebreak");
    fx.write("unoe/Games/g.dat", &vec![b'x'; 10], T_2022);
    fx.write("dose/Games/g.dat", &vec![b'y'; 11], T_2022);
    let dose_hash = volmerge::metadata::sha256_file(&fx.cfg.dose_root.join("Games/g.dat")).unwrap();

    fx.run(MERGE);

    // newest is DOSE by size; strictly larger, so it replaces outright
    assert_eq!(fx.uno_sha("05_Games/g.dat"), dose_hash);
    let resolutions = csvio::read_rows(&fx.cfg.resolutions_path(), &COLLISION_HEADER).unwrap();
    assert_eq!(resolutions[0][2], "replace_with_newest");
}

#[test]
fn full_tie_keeps_the_first_source() {
    let fx = fixture("fulltie");
    fx.write("unoe/Games/g.dat", &vec![b'x'; 10], T_2022);
    fx.write("dose/Games/g.dat", &vec![b'y'; 10], T_2022);
    let unoe_hash = volmerge::metadata::sha256_file(&fx.cfg.unoe_root.join("Games/g.dat")).unwrap();

    fx.run(MERGE);

    // newest := UNOE on a full tie; equal sizes mean keep-both
    assert_eq!(fx.uno_sha("05_Games/g.dat"), unoe_hash);
    let resolutions = csvio::read_rows(&fx.cfg.resolutions_path(), &COLLISION_HEADER).unwrap();
    assert_eq!(resolutions[0][2], "keep_both");
    assert!(fx.uno("05_Games/g__DOSE.dat").exists());
}

#[test]
fn rerunning_resolution_is_idempotent() {
    let fx = fixture("rerun");
    fx.write("unoe/Pictures/p.jpg", &vec![b'o'; 5000], T_2022);
    fx.write("dose/Pictures/p.jpg", &vec![b'n'; 4000], T_2023);
    fx.write("unoe/Video/v.mp4", &vec![b'a'; 100], T_2022);
    fx.write("dose/Video/v.mp4", &vec![b'b'; 120], T_2023);

    fx.run(MERGE);
    let tree_before = common::tree_snapshot(&fx.cfg.uno_root);
    let first: Vec<Vec<String>> =
        csvio::read_rows(&fx.cfg.resolutions_path(), &COLLISION_HEADER).unwrap();

    // resolve again: no new files, no new suffixes, identical resolutions
    fx.run(&[Phase::Resolve]);
    let tree_after = common::tree_snapshot(&fx.cfg.uno_root);
    assert_eq!(tree_before, tree_after);

    let all: Vec<Vec<String>> =
        csvio::read_rows(&fx.cfg.resolutions_path(), &COLLISION_HEADER).unwrap();
    assert_eq!(all.len(), first.len() * 2);
    for row in &all[first.len()..] {
        assert!(first.contains(row), "re-run changed a resolution: {row:?}");
    }
}

#[test]
fn dry_run_resolves_nothing_but_records_decisions() {
    let fx = fixture("dryrun");
    fx.write("unoe/Video/v.mp4", &vec![b'a'; 100], T_2022);
    fx.write("dose/Video/v.mp4", &vec![b'b'; 120], T_2023);

    let mut dry = fx.cfg.clone();
    dry.dry_run = true;
    let mut runner = volmerge::phases::PhaseRunner::new(dry).unwrap();
    runner
        .run(&[Phase::Prepare, Phase::CopyUnoe, Phase::CopyDose, Phase::Resolve])
        .unwrap();

    // nothing landed in the destination
    assert!(common::tree_snapshot(&fx.cfg.uno_root).is_empty());

    // but the would-be decision is on record
    let resolutions = csvio::read_rows(&fx.cfg.resolutions_path(), &COLLISION_HEADER).unwrap();
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0][2], "replace_with_newest");

    // and no provenance was written for actions that did not occur
    assert!(!fx.cfg.provenance_path().exists() || {
        provenance::read_rows(&fx.cfg.provenance_path()).unwrap().is_empty()
    });
}
