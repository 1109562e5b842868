//! C5: the single-writer append path — the reusable [`Batch`] accumulator
//! and the algorithm that frames entries into the tail segment, cycles
//! segments at capacity, and syncs per policy.
//!
//! Operates directly on [`crate::log::Inner`] rather than exposing its own
//! handle type, mirroring how the teacher crate keeps the append algorithm
//! as methods on its single `Generic<R, T>` commitlog type rather than a
//! separate writer struct.

use std::ops::Range;
use std::time::Instant;

use log::debug;

use crate::entry;
use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::log::Inner;

/// A reusable accumulator of `(offset, payload)` pairs to append in one
/// batch. Offsets must strictly increase within a batch.
#[derive(Debug, Default)]
pub struct Batch {
    pub(crate) entries: Vec<(u64, Range<usize>)>,
    pub(crate) data: Vec<u8>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `(offset, payload)` to the batch.
    ///
    /// Fails with [`Error::OutOfRange`] if `offset` does not strictly
    /// increase over the previous entry pushed into this batch.
    pub fn push(&mut self, offset: u64, payload: &[u8]) -> Result<()> {
        if let Some((last_offset, _)) = self.entries.last() {
            if offset <= *last_offset {
                return Err(Error::OutOfRange);
            }
        }
        let start = self.data.len();
        self.data.extend_from_slice(payload);
        self.entries.push((offset, start..self.data.len()));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.data.clear();
    }
}

/// Appends a single `(offset, payload)` pair. Equivalent to a one-entry
/// batch.
pub(crate) fn write_one<F: Filesystem>(inner: &mut Inner<F>, offset: u64, payload: &[u8]) -> Result<()> {
    let mut batch = Batch::new();
    batch.push(offset, payload)?;
    write_batch(inner, &mut batch)
}

pub(crate) fn write_batch<F: Filesystem>(inner: &mut Inner<F>, batch: &mut Batch) -> Result<()> {
    if inner.closed {
        return Err(Error::Closed);
    }
    if inner.corrupt {
        return Err(Error::corrupt("log is in a corrupt state"));
    }
    if batch.is_empty() {
        return Ok(());
    }

    let first_batch_offset = batch.entries[0].0;
    if needs_cycle(inner, first_batch_offset) {
        cycle_tail(inner, first_batch_offset)?;
    }

    for &(offset, ref range) in &batch.entries {
        let payload = &batch.data[range.clone()];
        let tail = inner.segments.last_mut().expect("log always has a tail segment");
        let (start, end) = entry::encode(payload, tail.buffer_mut());
        tail.push_framed(start..end);
        inner.last_offset = Some(offset);

        if tail.buffer_len() > inner.options.segment_size {
            flush_tail(inner)?;
            cycle_tail(inner, offset + 1)?;
        }
    }

    flush_tail(inner)?;
    if !inner.options.no_sync {
        sync_tail(inner)?;
    }
    batch.clear();
    Ok(())
}

fn needs_cycle<F: Filesystem>(inner: &Inner<F>, first_batch_offset: u64) -> bool {
    let tail = inner.segments.last().expect("log always has a tail segment");
    let jump = match inner.last_offset {
        Some(last) => first_batch_offset > last + 1,
        None => first_batch_offset != tail.base_offset,
    };
    jump || tail.buffer_len() > inner.options.segment_size
}

/// Writes whatever bytes of the tail's in-memory buffer haven't yet reached
/// the open file handle.
pub(crate) fn flush_tail<F: Filesystem>(inner: &mut Inner<F>) -> Result<()> {
    use std::io::Write;

    let tail = inner.segments.last().expect("log always has a tail segment");
    let buf = tail.buffer().unwrap_or(&[]);
    if inner.tail_flushed < buf.len() {
        let unflushed_len = buf.len() - inner.tail_flushed;
        let mut unflushed = Vec::with_capacity(unflushed_len);
        unflushed.extend_from_slice(&buf[inner.tail_flushed..]);
        let file = inner.tail_file.as_mut().expect("tail file is open while log is open");
        file.write_all(&unflushed)?;
        inner.tail_flushed += unflushed_len;
    }
    Ok(())
}

pub(crate) fn sync_tail<F: Filesystem>(inner: &mut Inner<F>) -> Result<()> {
    let file = inner.tail_file.as_mut().expect("tail file is open while log is open");
    let start = Instant::now();
    inner.fs.sync_file(file)?;
    let elapsed = start.elapsed();
    if let Some(observer) = inner.options.sync_observer.as_ref() {
        observer(elapsed);
    }
    Ok(())
}

/// Closes the current tail, demotes it into the cache (or deletes it, if it
/// was the still-empty initial segment at offset 0), and opens a fresh tail
/// at `new_base_offset`.
pub(crate) fn cycle_tail<F: Filesystem>(inner: &mut Inner<F>, new_base_offset: u64) -> Result<()> {
    // Cycling closes out a segment for good, so it is always synced,
    // independent of the batch-level `no_sync` policy.
    flush_tail(inner)?;
    sync_tail(inner)?;
    inner.tail_file = None;

    let tail_idx = inner.segments.len() - 1;
    let old_base_offset = inner.segments[tail_idx].base_offset;
    let is_fresh_initial_segment =
        inner.segments.len() == 1 && inner.last_offset.is_none() && inner.segments[0].is_empty();
    if is_fresh_initial_segment {
        let path = inner.segments[0].path.clone();
        inner.fs.remove_file(&path)?;
        inner.segments.clear();
        inner.first_offset = new_base_offset;
        debug!("discarded empty initial segment, first_offset now {new_base_offset}");
    } else if let Some(evicted) = inner.cache.touch(tail_idx) {
        inner.segments[evicted].demote();
    }

    let path = crate::dirmgr::segment_path(&inner.dir, new_base_offset);
    inner.fs.write(&path, &[])?;
    let (file, _) = inner.fs.open_append(&path)?;

    let mut segment = crate::segment::Segment::new(path, new_base_offset);
    segment.buffer_mut(); // force-materialize: tail is always resident.
    inner.segments.push(segment);
    inner.tail_file = Some(file);
    inner.tail_flushed = 0;

    debug!("cycled tail segment base_offset={old_base_offset} -> base_offset={new_base_offset}");
    Ok(())
}
