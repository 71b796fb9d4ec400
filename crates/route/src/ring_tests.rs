// SPDX-License-Identifier: MIT

use super::*;
use crate::Router;

fn store(dir: &tempfile::TempDir) -> RingStore {
    RingStore::new(dir.path().join("host.rs"))
}

#[test]
fn sequences_are_monotonic_per_ring() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);

    assert_eq!(s.append("cpu", "a", 0).unwrap(), 1);
    assert_eq!(s.append("mem", "b", 0).unwrap(), 1);
    assert_eq!(s.append("cpu", "c", 0).unwrap(), 2);

    assert_eq!(s.tell("cpu").unwrap().seq, 2);
    assert_eq!(s.tell("mem").unwrap().seq, 1);
    assert_eq!(s.tell("empty").unwrap().seq, 0);
}

#[test]
fn entries_after_returns_strictly_newer() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    for text in ["one", "two", "three"] {
        s.append("r", text, 0).unwrap();
    }

    let newer = s.entries_after("r", 1).unwrap();
    let texts: Vec<&str> = newer.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(texts, ["two", "three"]);
    assert!(s.entries_after("r", 3).unwrap().is_empty());
}

#[test]
fn retention_trims_oldest_and_keeps_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    for i in 0..5 {
        s.append("r", &format!("t{i}"), 3).unwrap();
    }

    let entries = s.entries("r").unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].text, "t2");
    // Trimming must not roll the sequence back.
    assert_eq!(s.append("r", "t5", 3).unwrap(), 6);
}

#[test]
fn trim_leaves_other_rings_alone() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    s.append("other", "keepme", 0).unwrap();
    for i in 0..4 {
        s.append("r", &format!("t{i}"), 2).unwrap();
    }

    assert_eq!(s.entries("other").unwrap().len(), 1);
    assert_eq!(s.entries("r").unwrap().len(), 2);
}

#[test]
fn corrupt_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);
    s.append("r", "good", 0).unwrap();
    {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(s.path())
            .unwrap();
        writeln!(f, "{{ torn").unwrap();
    }
    s.append("r", "after", 0).unwrap();

    let texts: Vec<String> = s.entries("r").unwrap().into_iter().map(|e| e.text).collect();
    assert_eq!(texts, ["good", "after"]);
}

#[test]
fn rs_route_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("rs:{},ring1", dir.path().join("x.rs").display());
    let router = Router::new(dir.path().to_path_buf(), "h");

    let mut route = router.open(&url, 0).unwrap();
    route.write(b"hello").unwrap();
    route.write(b"world").unwrap();

    assert_eq!(route.tell().unwrap().seq, 2);
    let entries = route.read_from(0).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].text, "world");
    assert_eq!(route.read_all().unwrap(), b"helloworld");
}

#[test]
fn local_route_maps_to_host_store() {
    let dir = tempfile::tempdir().unwrap();
    let router = Router::new(dir.path().to_path_buf(), "myhost");

    let mut route = router.open("local:cpu", 0).unwrap();
    route.write(b"sample").unwrap();

    let s = RingStore::new(dir.path().join("myhost.rs"));
    assert_eq!(s.entries("cpu").unwrap().len(), 1);
}

#[test]
fn bad_ring_urls_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let router = Router::new(dir.path().to_path_buf(), "h");
    assert!(router.open("rs:justapath", 0).is_err());
    assert!(router.open("rs:", 0).is_err());
}

#[test]
fn entry_table_parses_tsv_payloads() {
    let entry = RingEntry {
        ring: "r".into(),
        seq: 1,
        time: 0,
        text: "a\tb\n1\t2\n".into(),
    };
    let table = entry.table().unwrap();
    assert_eq!(table.get(0, "b"), Some("2"));

    let raw = RingEntry {
        ring: "r".into(),
        seq: 2,
        time: 0,
        text: "".into(),
    };
    assert!(raw.table().is_none());
}
