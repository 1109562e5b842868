//! End-to-end scenarios against the public `Log` API, run over
//! `MemoryFilesystem` so no real disk I/O or cleanup is needed.

mod common;

use std::path::PathBuf;

use walog::fs::{Filesystem, MemoryFilesystem};
use walog::test_support::{marker_path, segment_path, Marker};
use walog::{Error, Log, Options};

use common::{enable_logging, mem_log};

#[test]
fn scenario_1_open_empty_log() {
    enable_logging();
    let log = mem_log(Options::default());
    assert_eq!(log.first_index(), 0);
    assert_eq!(log.last_index(), None);
    assert!(matches!(log.read(0), Err(Error::NotFound)));
}

#[test]
fn scenario_2_append_close_reopen_read() {
    enable_logging();
    let fs = MemoryFilesystem::new();
    let dir = PathBuf::from("/log");
    {
        let log = Log::open(fs.clone(), dir.clone(), Options::default()).unwrap();
        for (i, payload) in ["a", "bb", "ccc", "dddd", "eeeee"].iter().enumerate() {
            log.write(i as u64, payload.as_bytes()).unwrap();
        }
        log.close();
    }
    let log = Log::open(fs, dir, Options::default()).unwrap();
    assert_eq!(log.read(2).unwrap(), b"ccc");
    assert_eq!(log.last_index(), Some(4));
}

#[test]
fn scenario_3_small_segment_size_cycles_into_multiple_files() {
    enable_logging();
    let fs = MemoryFilesystem::new();
    let dir = PathBuf::from("/log");
    let options = Options {
        segment_size: 8,
        ..Options::default()
    };
    let log = Log::open(fs.clone(), dir.clone(), options).unwrap();
    for i in 0..10u64 {
        log.write(i, &[i as u8; 4]).unwrap();
    }

    let mut base_offsets: Vec<u64> = fs
        .read_dir(&dir)
        .unwrap()
        .into_iter()
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?;
            name.parse::<u64>().ok()
        })
        .collect();
    base_offsets.sort_unstable();
    assert!(base_offsets.len() >= 3, "expected >= 3 segments, got {base_offsets:?}");
    assert!(base_offsets.windows(2).all(|w| w[0] < w[1]));

    for i in 0..10u64 {
        assert_eq!(log.read(i).unwrap(), vec![i as u8; 4]);
    }
}

#[test]
fn scenario_4_truncate_front_survives_reopen() {
    enable_logging();
    let fs = MemoryFilesystem::new();
    let dir = PathBuf::from("/log");
    {
        let log = Log::open(fs.clone(), dir.clone(), Options::default()).unwrap();
        for i in 0..10u64 {
            log.write(i, &[i as u8]).unwrap();
        }
        log.truncate_front(5).unwrap();
        assert_eq!(log.first_index(), 5);
        assert!(matches!(log.read(4), Err(Error::NotFound)));
        assert_eq!(log.read(5).unwrap(), vec![5u8]);
    }
    let reopened = Log::open(fs, dir, Options::default()).unwrap();
    assert_eq!(reopened.first_index(), 5);
    assert!(matches!(reopened.read(4), Err(Error::NotFound)));
    assert_eq!(reopened.read(5).unwrap(), vec![5u8]);
    assert_eq!(reopened.last_index(), Some(9));
}

#[test]
fn scenario_5_truncate_back_then_truncate_all() {
    enable_logging();
    let fs = MemoryFilesystem::new();
    let dir = PathBuf::from("/log");
    {
        let log = Log::open(fs.clone(), dir.clone(), Options::default()).unwrap();
        for i in 0..10u64 {
            log.write(i, &[i as u8]).unwrap();
        }
        log.truncate_back(3).unwrap();
        assert_eq!(log.last_index(), Some(3));
        assert!(matches!(log.read(4), Err(Error::NotFound)));
    }
    let reopened = Log::open(fs, dir, Options::default()).unwrap();
    assert_eq!(reopened.last_index(), Some(3));
    assert!(matches!(reopened.read(4), Err(Error::NotFound)));

    // The spec's literal scenario anchors "truncate_back(first_index()-1)"
    // against offset 0, which has no valid `u64` predecessor. This crate
    // represents an empty log as `last_index() == None` rather than a
    // negative sentinel (see DESIGN.md), so the "empties the log" half of
    // the scenario is exercised here against a log whose first offset is
    // nonzero, where `first_index() - 1` is representable.
    let fs = MemoryFilesystem::new();
    let dir = PathBuf::from("/log2");
    let log = Log::open(fs, dir, Options::default()).unwrap();
    for i in 5..9u64 {
        log.write(i, &[i as u8]).unwrap();
    }
    log.truncate_back(log.first_index() - 1).unwrap();
    assert_eq!(log.last_index(), None);
    assert_eq!(log.first_index(), 5);
}

#[test]
fn scenario_6_recovers_from_crash_mid_back_truncation() {
    enable_logging();
    let fs = MemoryFilesystem::new();
    let main_dir = PathBuf::from("/log");
    {
        let log = Log::open(fs.clone(), main_dir.clone(), Options::default()).unwrap();
        log.write(0, b"a").unwrap();
        log.write(1, b"b").unwrap();
        log.write(2, b"c").unwrap();
    }
    // The on-disk file for offsets 0..2 now holds all three framed entries.
    // Build the bytes a real `truncate_back(1)` would have committed to the
    // `.END` marker, by writing the surviving entries through the public API
    // into a scratch directory and lifting its raw segment bytes back out.
    let surviving = {
        let scratch_dir = PathBuf::from("/scratch");
        let scratch = Log::open(fs.clone(), scratch_dir.clone(), Options::default()).unwrap();
        scratch.write(0, b"a").unwrap();
        scratch.write(1, b"b").unwrap();
        fs.read(&segment_path(&scratch_dir, 0)).unwrap()
    };

    // Simulate a crash after the `.END` rename (the commit point) but before
    // the original segment file is deleted and the marker's suffix dropped:
    // both the full original file and the `.END` marker now coexist.
    fs.write(&marker_path(&main_dir, 0, Marker::End), &surviving).unwrap();

    let log = Log::open(fs, main_dir, Options::default()).unwrap();
    assert_eq!(log.last_index(), Some(1));
    assert_eq!(log.read(0).unwrap(), b"a");
    assert_eq!(log.read(1).unwrap(), b"b");
    assert!(matches!(log.read(2), Err(Error::NotFound)));

    log.write(2, b"new-c").unwrap();
    assert_eq!(log.read(2).unwrap(), b"new-c");
}
