use std::io;

use thiserror::Error;

/// Errors produced by the write-ahead log.
///
/// `Corrupt` is sticky: once returned, every subsequent operation on the same
/// [`crate::Log`] also returns `Corrupt` until the log is closed and reopened.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed on-disk framing, an inconsistent set of marker files, or an
    /// I/O failure during truncation cleanup that occurred after the commit
    /// rename already succeeded.
    #[error("write-ahead log is corrupt: {0}")]
    Corrupt(String),

    /// The operation was attempted after [`crate::Log::close`].
    #[error("write-ahead log is closed")]
    Closed,

    /// A read targeted an offset outside `[first_index, last_index]`.
    #[error("offset not found in log")]
    NotFound,

    /// A truncate argument fell outside the valid offset range.
    #[error("truncate offset out of range")]
    OutOfRange,

    /// An I/O error surfaced verbatim from the filesystem. Not sticky.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }
}
