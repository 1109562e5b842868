//! C4: directory manager — enumerates segment files, parses filenames, and
//! reconciles `.START`/`.END`/`.TRUNCATE` markers on open.
//!
//! The marker-reconciliation algorithm implements the crash-recovery state
//! machine described in the spec's directory manager section: it has no
//! direct analog in the teacher crate (SpacetimeDB's commitlog recovers by
//! truncating a partially-written commit, not by rename markers), so it is
//! implemented directly from the written protocol, using the teacher's
//! general "write to a side file, then atomically rename it into place"
//! idiom (see [`crate::fs::OsFilesystem::write`]).

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};
use crate::fs::Filesystem;

pub const SEGMENT_NAME_DIGITS: usize = 20;
pub const TEMP_NAME: &str = "TEMP";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Start,
    End,
    Truncate,
}

impl Marker {
    fn suffix(self) -> &'static str {
        match self {
            Marker::Start => "START",
            Marker::End => "END",
            Marker::Truncate => "TRUNCATE",
        }
    }
}

pub fn segment_name(base_offset: u64) -> String {
    format!("{base_offset:0width$}", width = SEGMENT_NAME_DIGITS)
}

pub fn segment_path(dir: &Path, base_offset: u64) -> PathBuf {
    dir.join(segment_name(base_offset))
}

pub fn marker_path(dir: &Path, base_offset: u64, marker: Marker) -> PathBuf {
    dir.join(format!("{}.{}", segment_name(base_offset), marker.suffix()))
}

pub fn temp_path(dir: &Path) -> PathBuf {
    dir.join(TEMP_NAME)
}

/// Parses a segment file's basename into its base offset and, if present,
/// its marker kind. Returns `None` for names that don't match the
/// convention (including `TEMP`, which is intentionally left unrecognized
/// so it is ignored by directory scans).
fn parse_name(name: &str) -> Option<(u64, Option<Marker>)> {
    if name.len() < SEGMENT_NAME_DIGITS {
        return None;
    }
    let (digits, rest) = name.split_at(SEGMENT_NAME_DIGITS);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let offset: u64 = digits.parse().ok()?;
    let marker = match rest {
        "" => None,
        ".START" => Some(Marker::Start),
        ".END" => Some(Marker::End),
        ".TRUNCATE" => Some(Marker::Truncate),
        _ => return None,
    };
    Some((offset, marker))
}

struct Entry {
    offset: u64,
    marker: Option<Marker>,
}

fn scan<F: Filesystem>(fs: &F, dir: &Path) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for path in fs.read_dir(dir)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some((offset, marker)) = parse_name(name) {
            entries.push(Entry { offset, marker });
        }
    }
    Ok(entries)
}

/// Runs the open-time recovery protocol described in the spec's directory
/// manager section, performing whatever deletes/renames are necessary, and
/// returns the final, sorted list of plain segment base offsets.
///
/// If the directory is empty of recognized files, a single empty segment at
/// offset 0 is created and `vec![0]` is returned.
pub fn recover<F: Filesystem>(fs: &F, dir: &Path) -> Result<Vec<u64>> {
    fs.mkdir_all(dir)?;
    let entries = scan(fs, dir)?;

    let markers: Vec<&Entry> = entries.iter().filter(|e| e.marker.is_some()).collect();
    if markers.len() > 1 {
        return Err(Error::corrupt(format!(
            "found {} marker files, expected at most one",
            markers.len()
        )));
    }
    let truncate_markers = markers.iter().filter(|e| e.marker == Some(Marker::Truncate)).count();
    if truncate_markers > 1 {
        return Err(Error::corrupt("found more than one .TRUNCATE marker"));
    }

    if entries.is_empty() {
        debug!("no segments found, starting fresh log at offset 0");
        fs.write(&segment_path(dir, 0), &[])?;
        return Ok(vec![0]);
    }

    if let Some(marker_entry) = markers.first() {
        let offset = marker_entry.offset;
        match marker_entry.marker.unwrap() {
            Marker::Start => reconcile_start(fs, dir, &entries, offset)?,
            Marker::End => reconcile_end(fs, dir, &entries, offset)?,
            Marker::Truncate => reconcile_truncate(fs, dir, &entries, offset)?,
        }
    }

    let mut offsets: Vec<u64> = scan(fs, dir)?
        .into_iter()
        .filter(|e| e.marker.is_none())
        .map(|e| e.offset)
        .collect();
    offsets.sort_unstable();
    if offsets.is_empty() {
        return Err(Error::corrupt("no segments remained after recovery"));
    }
    Ok(offsets)
}

fn reconcile_start<F: Filesystem>(fs: &F, dir: &Path, entries: &[Entry], start_offset: u64) -> Result<()> {
    debug!("recovering from front-truncation marker at offset {start_offset}");
    for e in entries {
        if e.marker.is_none() && e.offset < start_offset {
            fs.remove_file(&segment_path(dir, e.offset))?;
        }
    }
    fs.rename(&marker_path(dir, start_offset, Marker::Start), &segment_path(dir, start_offset))?;
    Ok(())
}

fn reconcile_end<F: Filesystem>(fs: &F, dir: &Path, entries: &[Entry], end_offset: u64) -> Result<()> {
    debug!("recovering from back-truncation marker at offset {end_offset}");
    for e in entries {
        if e.marker.is_none() && e.offset > end_offset {
            fs.remove_file(&segment_path(dir, e.offset))?;
        }
    }
    // The stale pre-truncation tail: a plain segment sharing END's base offset.
    if entries
        .iter()
        .any(|e| e.marker.is_none() && e.offset == end_offset)
    {
        fs.remove_file(&segment_path(dir, end_offset))?;
    }
    fs.rename(&marker_path(dir, end_offset, Marker::End), &segment_path(dir, end_offset))?;
    Ok(())
}

fn reconcile_truncate<F: Filesystem>(fs: &F, dir: &Path, entries: &[Entry], new_first: u64) -> Result<()> {
    debug!("recovering from truncate-all marker, new first offset {new_first}");
    for e in entries {
        if e.marker.is_none() {
            fs.remove_file(&segment_path(dir, e.offset))?;
        }
    }
    fs.rename(&marker_path(dir, new_first, Marker::Truncate), &segment_path(dir, new_first))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;

    #[test]
    fn parse_plain_segment_name() {
        assert_eq!(parse_name("00000000000000000042"), Some((42, None)));
    }

    #[test]
    fn parse_marker_names() {
        assert_eq!(parse_name("00000000000000000042.START"), Some((42, Some(Marker::Start))));
        assert_eq!(parse_name("00000000000000000042.END"), Some((42, Some(Marker::End))));
        assert_eq!(
            parse_name("00000000000000000042.TRUNCATE"),
            Some((42, Some(Marker::Truncate)))
        );
    }

    #[test]
    fn parse_rejects_temp_and_garbage() {
        assert_eq!(parse_name("TEMP"), None);
        assert_eq!(parse_name("not-a-segment"), None);
        assert_eq!(parse_name("00000000000000000042.FOO"), None);
    }

    #[test]
    fn recover_fresh_directory_creates_segment_zero() {
        let fs = MemoryFilesystem::new();
        let dir = PathBuf::from("/log");
        let offsets = recover(&fs, &dir).unwrap();
        assert_eq!(offsets, vec![0]);
    }

    #[test]
    fn recover_rejects_multiple_markers() {
        let fs = MemoryFilesystem::new();
        let dir = PathBuf::from("/log");
        fs.write(&marker_path(&dir, 0, Marker::Start), &[]).unwrap();
        fs.write(&marker_path(&dir, 5, Marker::End), &[]).unwrap();
        assert!(matches!(recover(&fs, &dir), Err(Error::Corrupt(_))));
    }

    #[test]
    fn recover_start_marker_drops_prefix() {
        let fs = MemoryFilesystem::new();
        let dir = PathBuf::from("/log");
        fs.write(&segment_path(&dir, 0), &[]).unwrap();
        fs.write(&segment_path(&dir, 3), &[]).unwrap();
        fs.write(&marker_path(&dir, 5, Marker::Start), &[1, 2, 3]).unwrap();
        fs.write(&segment_path(&dir, 9), &[]).unwrap();

        let offsets = recover(&fs, &dir).unwrap();
        assert_eq!(offsets, vec![5, 9]);
        assert_eq!(fs.read(&segment_path(&dir, 5)).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn recover_end_marker_drops_suffix_and_stale_tail() {
        let fs = MemoryFilesystem::new();
        let dir = PathBuf::from("/log");
        fs.write(&segment_path(&dir, 0), &[]).unwrap();
        fs.write(&segment_path(&dir, 5), b"stale-long-tail").unwrap();
        fs.write(&marker_path(&dir, 5, Marker::End), b"short").unwrap();
        fs.write(&segment_path(&dir, 9), &[]).unwrap();

        let offsets = recover(&fs, &dir).unwrap();
        assert_eq!(offsets, vec![0, 5]);
        assert_eq!(fs.read(&segment_path(&dir, 5)).unwrap(), b"short");
    }

    #[test]
    fn recover_truncate_marker_clears_everything_else() {
        let fs = MemoryFilesystem::new();
        let dir = PathBuf::from("/log");
        fs.write(&segment_path(&dir, 0), &[]).unwrap();
        fs.write(&segment_path(&dir, 5), &[]).unwrap();
        fs.write(&marker_path(&dir, 9, Marker::Truncate), &[]).unwrap();

        let offsets = recover(&fs, &dir).unwrap();
        assert_eq!(offsets, vec![9]);
    }

    #[test]
    fn recover_ignores_orphan_temp_file() {
        let fs = MemoryFilesystem::new();
        let dir = PathBuf::from("/log");
        fs.write(&segment_path(&dir, 0), &[]).unwrap();
        fs.write(&temp_path(&dir), b"orphaned").unwrap();

        let offsets = recover(&fs, &dir).unwrap();
        assert_eq!(offsets, vec![0]);
    }
}
