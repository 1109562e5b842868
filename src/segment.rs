//! C2: a single segment's path, base offset, and (when materialized) its
//! decoded contents.

use std::ops::Range;
use std::path::PathBuf;

use log::debug;

use crate::entry;
use crate::error::Result;
use crate::fs::Filesystem;

/// One segment file.
///
/// A segment is **materialized** when `buffer`/`positions` are `Some`, and
/// **dormant** otherwise. The tail segment is always materialized while the
/// log is open; non-tail segments are materialized on demand through the
/// [`crate::cache::SegmentCache`] and may be demoted back to dormant under
/// memory pressure.
#[derive(Debug)]
pub struct Segment {
    pub path: PathBuf,
    pub base_offset: u64,
    state: Option<Materialized>,
}

#[derive(Debug)]
struct Materialized {
    buffer: Vec<u8>,
    /// `positions[i]` is the `[start, end)` byte range of entry
    /// `base_offset + i` within `buffer`.
    positions: Vec<Range<usize>>,
}

impl Segment {
    pub fn new(path: PathBuf, base_offset: u64) -> Self {
        Self {
            path,
            base_offset,
            state: None,
        }
    }

    pub fn is_materialized(&self) -> bool {
        self.state.is_some()
    }

    /// Number of entries currently known to this segment. Zero while
    /// dormant.
    pub fn len(&self) -> usize {
        self.state.as_ref().map(|m| m.positions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The offset one past the last entry in this segment (valid only while
    /// materialized).
    pub fn top_offset(&self) -> u64 {
        self.base_offset + self.len() as u64
    }

    pub fn buffer(&self) -> Option<&[u8]> {
        self.state.as_ref().map(|m| m.buffer.as_slice())
    }

    pub fn buffer_len(&self) -> usize {
        self.state.as_ref().map(|m| m.buffer.len()).unwrap_or(0)
    }

    /// Reads and decodes the entire segment file, replacing any existing
    /// in-memory state.
    ///
    /// Fails with [`crate::error::Error::Corrupt`] if any frame in the file
    /// fails to decode.
    pub fn materialize<F: Filesystem>(&mut self, fs: &F) -> Result<()> {
        let buffer = fs.read(&self.path)?;
        let len = buffer.len();
        self.load(buffer)?;
        debug!(
            "materialized segment base_offset={} entries={} bytes={}",
            self.base_offset,
            self.len(),
            len
        );
        Ok(())
    }

    /// Populates this segment's in-memory state directly from `buffer`,
    /// without touching the filesystem. Used by the truncation engine, which
    /// already holds the surviving bytes in memory after writing them to the
    /// commit marker.
    pub fn load(&mut self, buffer: Vec<u8>) -> Result<()> {
        let mut positions = Vec::new();
        let mut pos = 0;
        while pos < buffer.len() {
            let (range, frame_len) = entry::decode_at(&buffer, pos)?;
            positions.push(range);
            pos += frame_len;
        }
        self.state = Some(Materialized { buffer, positions });
        Ok(())
    }

    /// Drops the in-memory buffer and position index, returning the segment
    /// to the dormant state.
    pub fn demote(&mut self) {
        if self.state.take().is_some() {
            debug!("demoted segment base_offset={} to dormant", self.base_offset);
        }
    }

    /// Returns the framed payload bytes for `offset`, which must fall within
    /// this (materialized) segment's range.
    pub fn entry_at(&self, offset: u64) -> Option<&[u8]> {
        let m = self.state.as_ref()?;
        let idx = (offset - self.base_offset) as usize;
        let range = m.positions.get(idx)?;
        Some(&m.buffer[range.clone()])
    }

    /// Returns the payload's `[start, end)` byte range within `buffer` for
    /// `offset`. Used by the truncation engine to locate frame boundaries
    /// without re-reading the file.
    pub fn payload_range(&self, offset: u64) -> Option<Range<usize>> {
        let m = self.state.as_ref()?;
        let idx = (offset - self.base_offset) as usize;
        m.positions.get(idx).cloned()
    }

    /// Appends an already-framed entry to this segment's in-memory buffer
    /// (used only by the tail segment while appending) and records its
    /// position.
    pub fn push_framed(&mut self, range: Range<usize>) {
        let m = self.state.get_or_insert_with(|| Materialized {
            buffer: Vec::new(),
            positions: Vec::new(),
        });
        m.positions.push(range);
    }

    /// Mutable access to the buffer, for the writer to append framed bytes
    /// into directly before calling [`Self::push_framed`].
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self
            .state
            .get_or_insert_with(|| Materialized {
                buffer: Vec::new(),
                positions: Vec::new(),
            })
            .buffer
    }

    /// Truncates this segment's in-memory view to keep only entries
    /// `[0, keep)`, and the underlying buffer to the byte length those
    /// entries occupy. Used by front truncation (on the owning segment,
    /// after slicing) and back truncation.
    pub fn keep_first(&mut self, keep: usize) {
        if let Some(m) = self.state.as_mut() {
            m.positions.truncate(keep);
            let end = m.positions.last().map(|r| r.end).unwrap_or(0);
            m.buffer.truncate(end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;
    use std::path::Path;

    #[test]
    fn materialize_decodes_all_frames() {
        let fs = MemoryFilesystem::new();
        let path = Path::new("/log/00000000000000000000").to_path_buf();
        let mut buf = Vec::new();
        entry::encode(b"a", &mut buf);
        entry::encode(b"bb", &mut buf);
        fs.write(&path, &buf).unwrap();

        let mut seg = Segment::new(path, 0);
        seg.materialize(&fs).unwrap();
        assert_eq!(seg.len(), 2);
        assert_eq!(seg.entry_at(0), Some(b"a".as_slice()));
        assert_eq!(seg.entry_at(1), Some(b"bb".as_slice()));
    }

    #[test]
    fn materialize_corrupt_file_fails() {
        let fs = MemoryFilesystem::new();
        let path = Path::new("/log/00000000000000000000").to_path_buf();
        fs.write(&path, &[0x80, 0x80]).unwrap();

        let mut seg = Segment::new(path, 0);
        assert!(seg.materialize(&fs).is_err());
    }

    #[test]
    fn demote_clears_state() {
        let fs = MemoryFilesystem::new();
        let path = Path::new("/log/00000000000000000000").to_path_buf();
        fs.write(&path, &[]).unwrap();
        let mut seg = Segment::new(path, 0);
        seg.materialize(&fs).unwrap();
        assert!(seg.is_materialized());
        seg.demote();
        assert!(!seg.is_materialized());
        assert_eq!(seg.len(), 0);
    }

    #[test]
    fn keep_first_truncates_buffer_and_positions() {
        let fs = MemoryFilesystem::new();
        let path = Path::new("/log/x").to_path_buf();
        let mut buf = Vec::new();
        entry::encode(b"a", &mut buf);
        entry::encode(b"bb", &mut buf);
        entry::encode(b"ccc", &mut buf);
        fs.write(&path, &buf).unwrap();

        let mut seg = Segment::new(path, 0);
        seg.materialize(&fs).unwrap();
        seg.keep_first(2);
        assert_eq!(seg.len(), 2);
        assert_eq!(seg.entry_at(0), Some(b"a".as_slice()));
        assert_eq!(seg.entry_at(1), Some(b"bb".as_slice()));
        assert_eq!(seg.entry_at(2), None);
    }
}
