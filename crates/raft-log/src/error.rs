use std::io;

use thiserror::Error;

/// Errors surfaced by [`crate::Segment`] and [`crate::Log`].
///
/// Mirrors the error-kind catalog of the consensus storage kernel (spec §7):
/// these are the only failure modes a caller needs to branch on, everything
/// else (disk full, permission denied, ...) is folded into [`Error::Io`].
#[derive(Debug, Error)]
pub enum Error {
    /// Operation on a segment or log that has been closed.
    #[error("not open")]
    NotOpen,

    /// `append` was called with an index at or below `nextIndex() - 1`.
    #[error("committed entry modified: index={index} next_index={next_index}")]
    CommittedEntryModified { index: u64, next_index: u64 },

    /// `append` was called with an index strictly greater than `nextIndex()`.
    #[error("non-monotonic index: index={index} next_index={next_index}")]
    NonMonotonicIndex { index: u64, next_index: u64 },

    /// `get`/`truncate` with an index outside `[first_index, last_index]`.
    #[error("index {index} out of range [{first_index}, {last_index}]")]
    OutOfRange {
        index: u64,
        first_index: u64,
        last_index: u64,
    },

    /// The record's type byte is unknown, or its recorded length does not
    /// match the bytes actually readable from the segment.
    #[error("corrupted record at offset {offset}: {reason}")]
    Corruption { offset: u64, reason: &'static str },

    /// Append attempted on a sealed (`locked`) segment.
    #[error("segment is sealed")]
    Sealed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
