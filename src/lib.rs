//! A segmented, offset-addressed write-ahead log with crash-safe truncation.
//!
//! Entries are appended under a single-writer discipline and addressed by a
//! monotonically increasing `u64` offset. The log lives as an ordered list
//! of segment files in one directory; the tail segment is open for
//! appending, and non-tail segments are held dormant behind a bounded LRU
//! cache until a read needs them. Front- and back-truncation use a
//! temp-file-then-atomic-rename protocol so that a crash mid-truncation
//! leaves enough on-disk evidence for the next [`Log::open`] to finish the
//! job.
//!
//! ```no_run
//! use walog::{Log, Options};
//! use walog::fs::OsFilesystem;
//!
//! # fn main() -> walog::Result<()> {
//! let log = Log::open(OsFilesystem::new(), "/var/lib/mydb/wal".into(), Options::default())?;
//! log.write(0, b"hello")?;
//! assert_eq!(log.read(0)?, b"hello");
//! # Ok(())
//! # }
//! ```

mod cache;
mod dirmgr;
mod entry;
mod error;
pub mod fs;
mod log;
mod segment;
mod truncate;
mod varint;
mod writer;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use crate::error::{Error, Result};
pub use crate::log::Log;
pub use crate::writer::Batch;

/// Internal path conventions, exposed only so integration tests can simulate
/// a crash by placing a marker file directly, the way a real crash would
/// leave one behind mid-truncation.
#[cfg(feature = "test")]
#[doc(hidden)]
pub mod test_support {
    pub use crate::dirmgr::{marker_path, segment_path, Marker};
}

/// Tuning knobs for a [`Log`]. Construct via [`Options::default`] and
/// override only the fields that matter for the caller.
pub struct Options {
    /// Skip fsyncing the tail after each batch; durability then depends on
    /// explicit calls to [`Log::sync`].
    pub no_sync: bool,
    /// Target byte size after which the tail segment is cycled.
    pub segment_size: usize,
    /// LRU capacity for materialized non-tail segments.
    pub segment_cache_size: usize,
    /// Opaque observer invoked once per `sync()` (explicit or
    /// implicit-via-batch-flush) with the wall-clock time the fsync took.
    pub sync_observer: Option<Arc<dyn Fn(Duration) + Send + Sync>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            no_sync: false,
            segment_size: 20 * 1024 * 1024,
            segment_cache_size: cache::DEFAULT_CAPACITY,
            sync_observer: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("no_sync", &self.no_sync)
            .field("segment_size", &self.segment_size)
            .field("segment_cache_size", &self.segment_cache_size)
            .field("sync_observer", &self.sync_observer.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
