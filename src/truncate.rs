//! C7: the truncation engine — front-truncate, back-truncate, truncate-all,
//! and `clear`, each a two-phase write-temp / rename-as-commit protocol.
//!
//! The commit point is the rename from `TEMP` to a marker file
//! (`.START`/`.END`/`.TRUNCATE`); everything after that point is cleanup
//! that, if it fails, flips the log into the sticky [`crate::error::Error::Corrupt`]
//! state rather than unwinding the on-disk state, since the marker alone is
//! now sufficient for [`crate::dirmgr::recover`] to finish the job on next
//! open.

use std::io;

use log::{debug, warn};

use crate::dirmgr::{self, Marker};
use crate::error::{Error, Result};
use crate::fs::Filesystem;
use crate::log::Inner;
use crate::segment::Segment;

fn segment_index_for<F: Filesystem>(inner: &Inner<F>, offset: u64) -> usize {
    inner.segments.partition_point(|s| s.base_offset <= offset) - 1
}

/// Ensures the segment at `idx` is materialized, promoting it through the
/// cache if it was dormant. Never evicts or tracks the tail.
pub(crate) fn ensure_materialized<F: Filesystem>(inner: &mut Inner<F>, idx: usize) -> Result<()> {
    let is_tail = idx == inner.segments.len() - 1;
    if !inner.segments[idx].is_materialized() {
        inner.segments[idx].materialize(&inner.fs)?;
    }
    if !is_tail {
        if let Some(evicted) = inner.cache.touch(idx) {
            inner.segments[evicted].demote();
        }
    }
    Ok(())
}

/// Clears cache recency tracking and demotes every non-tail segment still in
/// the list, per the "full cache clear demotes all non-tail segments"
/// semantics.
pub(crate) fn demote_all_but_tail<F: Filesystem>(inner: &mut Inner<F>) {
    inner.cache.clear();
    let last = inner.segments.len().saturating_sub(1);
    for (i, seg) in inner.segments.iter_mut().enumerate() {
        if i != last {
            seg.demote();
        }
    }
}

/// Converts a post-commit I/O failure into the sticky corrupt state.
fn cleanup<F: Filesystem>(inner: &mut Inner<F>, result: io::Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            inner.corrupt = true;
            warn!("truncation committed but cleanup failed, marking log corrupt: {e}");
            Err(Error::from(e))
        }
    }
}

pub(crate) fn truncate_front<F: Filesystem>(inner: &mut Inner<F>, idx: u64) -> Result<()> {
    if inner.closed {
        return Err(Error::Closed);
    }
    if inner.corrupt {
        return Err(Error::corrupt("log is in a corrupt state"));
    }
    if idx == inner.first_offset {
        return Ok(());
    }
    let last = inner.last_offset.ok_or(Error::OutOfRange)?;
    if idx < inner.first_offset || idx > last {
        return Err(Error::OutOfRange);
    }

    let owning = segment_index_for(inner, idx);
    ensure_materialized(inner, owning)?;

    let seg = &inner.segments[owning];
    let payload_range = seg.payload_range(idx).expect("idx within owning segment");
    let payload_len = payload_range.end - payload_range.start;
    let keep_from = payload_range.start - crate::varint::encoded_len(payload_len as u64);
    let buffer = seg.buffer().expect("just materialized");
    let surviving = buffer[keep_from..].to_vec();

    let temp = dirmgr::temp_path(&inner.dir);
    inner.fs.write(&temp, &surviving)?;
    let marker = dirmgr::marker_path(&inner.dir, idx, Marker::Start);
    inner.fs.rename(&temp, &marker)?; // commit point

    let is_tail = owning == inner.segments.len() - 1;
    if is_tail {
        inner.tail_file = None;
    }
    for seg in &inner.segments[..=owning] {
        let result = inner.fs.remove_file(&seg.path);
        cleanup(inner, result)?;
    }

    let new_path = dirmgr::segment_path(&inner.dir, idx);
    let result = inner.fs.rename(&marker, &new_path);
    cleanup(inner, result)?;

    inner.segments.drain(..=owning);
    let mut new_segment = Segment::new(new_path.clone(), idx);
    new_segment.load(surviving.clone())?;
    if is_tail {
        let (file, actual_len) = inner.fs.open_append(&new_path)?;
        if actual_len as usize != surviving.len() {
            inner.corrupt = true;
            return Err(Error::corrupt("tail length mismatch after front truncation"));
        }
        inner.tail_file = Some(file);
        inner.tail_flushed = surviving.len();
    }
    inner.segments.insert(0, new_segment);
    inner.first_offset = idx;
    demote_all_but_tail(inner);

    debug!("front-truncated log, new first_offset={idx}");
    Ok(())
}

pub(crate) fn truncate_back<F: Filesystem>(inner: &mut Inner<F>, idx: u64) -> Result<()> {
    if inner.closed {
        return Err(Error::Closed);
    }
    if inner.corrupt {
        return Err(Error::corrupt("log is in a corrupt state"));
    }
    if inner.first_offset.checked_sub(1) == Some(idx) {
        return truncate_back_all(inner, inner.first_offset);
    }
    let last = inner.last_offset.ok_or(Error::OutOfRange)?;
    if idx < inner.first_offset || idx > last {
        return Err(Error::OutOfRange);
    }
    if idx == last {
        return Ok(());
    }

    let owning = segment_index_for(inner, idx);
    ensure_materialized(inner, owning)?;

    let seg = &inner.segments[owning];
    let keep_end = seg.payload_range(idx).expect("idx within owning segment").end;
    let buffer = seg.buffer().expect("just materialized");
    let surviving = buffer[..keep_end].to_vec();
    let base_offset = seg.base_offset;

    let temp = dirmgr::temp_path(&inner.dir);
    inner.fs.write(&temp, &surviving)?;
    let marker = dirmgr::marker_path(&inner.dir, base_offset, Marker::End);
    inner.fs.rename(&temp, &marker)?; // commit point

    inner.tail_file = None;
    for seg in &inner.segments[owning..] {
        let result = inner.fs.remove_file(&seg.path);
        cleanup(inner, result)?;
    }

    let new_path = dirmgr::segment_path(&inner.dir, base_offset);
    let result = inner.fs.rename(&marker, &new_path);
    cleanup(inner, result)?;

    inner.segments.truncate(owning);
    let mut tail_segment = Segment::new(new_path.clone(), base_offset);
    tail_segment.load(surviving.clone())?;
    let (file, actual_len) = inner.fs.open_append(&new_path)?;
    if actual_len as usize != surviving.len() {
        inner.corrupt = true;
        return Err(Error::corrupt("tail length mismatch after back truncation"));
    }
    inner.segments.push(tail_segment);
    inner.tail_file = Some(file);
    inner.tail_flushed = surviving.len();
    inner.last_offset = Some(idx);
    inner.cache.forget_from(owning);

    debug!("back-truncated log, new last_offset={idx}");
    Ok(())
}

pub(crate) fn truncate_back_all<F: Filesystem>(inner: &mut Inner<F>, new_first: u64) -> Result<()> {
    if inner.closed {
        return Err(Error::Closed);
    }
    if inner.corrupt {
        return Err(Error::corrupt("log is in a corrupt state"));
    }

    let temp = dirmgr::temp_path(&inner.dir);
    inner.fs.write(&temp, &[])?;
    let marker = dirmgr::marker_path(&inner.dir, new_first, Marker::Truncate);
    inner.fs.rename(&temp, &marker)?; // commit point

    inner.tail_file = None;
    for seg in &inner.segments {
        let result = inner.fs.remove_file(&seg.path);
        cleanup(inner, result)?;
    }

    let new_path = dirmgr::segment_path(&inner.dir, new_first);
    let result = inner.fs.rename(&marker, &new_path);
    cleanup(inner, result)?;

    let (file, _) = inner.fs.open_append(&new_path)?;
    let mut segment = Segment::new(new_path, new_first);
    segment.load(Vec::new())?;
    inner.segments.clear();
    inner.segments.push(segment);
    inner.tail_file = Some(file);
    inner.tail_flushed = 0;
    inner.first_offset = new_first;
    inner.last_offset = None;
    inner.cache.clear();

    debug!("truncated log to empty, new first_offset={new_first}");
    Ok(())
}

pub(crate) fn clear<F: Filesystem>(inner: &mut Inner<F>) -> Result<()> {
    if inner.closed {
        return Err(Error::Closed);
    }
    if inner.corrupt {
        return Err(Error::corrupt("log is in a corrupt state"));
    }

    inner.tail_file = None;
    for seg in &inner.segments {
        // Best-effort: clear() does not go through the commit protocol, so a
        // missing file here (e.g. already-removed by a prior failed attempt)
        // is not itself an error.
        let _ = inner.fs.remove_file(&seg.path);
    }
    inner.segments.clear();
    inner.cache.clear();

    let path = dirmgr::segment_path(&inner.dir, 0);
    inner.fs.write(&path, &[])?;
    let (file, _) = inner.fs.open_append(&path)?;
    let mut segment = Segment::new(path, 0);
    segment.load(Vec::new())?;
    inner.segments.push(segment);
    inner.tail_file = Some(file);
    inner.tail_flushed = 0;
    inner.first_offset = 0;
    inner.last_offset = None;

    debug!("cleared log to empty at offset 0");
    Ok(())
}
