//! C3: bounded LRU recency-tracking for non-tail segments.
//!
//! The cache does not own segment data itself — segments live in
//! [`crate::log::Log`]'s segment list, indexed by position. The cache only
//! tracks *which* indices are currently materialized and in what recency
//! order, so the log knows which segment to demote when capacity is
//! exceeded. This sidesteps holding overlapping mutable borrows of the
//! segment list from within the cache.

use std::num::NonZeroUsize;

use log::debug;
use lru::LruCache;

pub const DEFAULT_CAPACITY: usize = 2;

#[derive(Debug)]
pub struct SegmentCache {
    lru: LruCache<usize, ()>,
}

impl SegmentCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap());
        Self {
            lru: LruCache::new(capacity),
        }
    }

    /// Records that `segment_index` was just materialized/accessed.
    ///
    /// Returns the index of a segment evicted to make room, if any. The
    /// caller is responsible for demoting that segment.
    pub fn touch(&mut self, segment_index: usize) -> Option<usize> {
        let evicted = self.lru.push(segment_index, ()).and_then(|(evicted_index, ())| {
            (evicted_index != segment_index).then_some(evicted_index)
        });
        if let Some(idx) = evicted {
            debug!("segment cache evicted index={idx}");
        }
        evicted
    }

    pub fn contains(&self, segment_index: usize) -> bool {
        self.lru.contains(&segment_index)
    }

    /// Returns, in most-recently-used-first order, the indices currently
    /// tracked by the cache.
    pub fn materialized_indices(&self) -> Vec<usize> {
        self.lru.iter().map(|(k, ())| *k).collect()
    }

    /// Drops tracking for `segment_index` without counting it as an access.
    /// Used when a single segment is truncated away.
    pub fn forget(&mut self, segment_index: usize) {
        self.lru.pop(&segment_index);
    }

    /// Drops tracking for every index `>= from`. Used by back-truncation,
    /// which removes a suffix of the segment list but leaves indices of
    /// surviving (earlier) segments stable.
    pub fn forget_from(&mut self, from: usize) {
        let stale: Vec<usize> = self.lru.iter().map(|(k, ())| *k).filter(|k| *k >= from).collect();
        for idx in stale {
            self.lru.pop(&idx);
        }
    }

    /// Drops all tracking, returning the indices that were tracked so the
    /// caller can demote them. Used by front-truncation and `clear_cache`,
    /// per the spec's "full cache clear" semantics.
    pub fn clear(&mut self) -> Vec<usize> {
        let indices: Vec<usize> = self.lru.iter().map(|(k, ())| *k).collect();
        self.lru.clear();
        indices
    }
}
