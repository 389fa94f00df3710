mod storage_errors;

use std::io;

pub use storage_errors::InvalidSegmentFileName;
pub use storage_errors::UnsealedSegmentNotLast;

/// Error returned by every public WAL operation.
///
/// The engine recovers locally only from a missing unsealed-tail file and
/// from orphan segment files, both during open. Everything else aborts the
/// current operation without partially mutating state.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub enum WalError {
    /// The index is not present: truncated away, never written, or beyond
    /// the last index.
    #[error("log entry not found")]
    NotFound,

    /// On-disk structure violates the expected format.
    #[error("corrupt log: {0}")]
    Corrupt(String),

    /// Append attempted on a sealed segment.
    #[error("segment is sealed")]
    Sealed,

    /// Operation attempted after `close()`.
    #[error("log store is closed")]
    Closed,

    #[error(transparent)]
    OutOfRange(#[from] TruncateOutOfRange),

    #[error(transparent)]
    NonMonotonic(#[from] NonMonotonicLog),

    /// An internal invariant did not hold. Indicates a bug in the engine
    /// rather than bad caller input.
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl WalError {
    /// True when the error means "does not exist", either at the WAL level
    /// or surfaced as an IO error from a backend.
    pub fn is_not_found(&self) -> bool {
        match self {
            WalError::NotFound => true,
            WalError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<UnsealedSegmentNotLast> for WalError {
    fn from(value: UnsealedSegmentNotLast) -> Self {
        WalError::Corrupt(value.to_string())
    }
}

/// Error indicating that an appended batch is not contiguous with the log.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error(
    "non-monotonic log entries: tried to append index {attempted} after {last}"
)]
pub struct NonMonotonicLog {
    pub last: u64,
    pub attempted: u64,
}

impl NonMonotonicLog {
    pub fn new(last: u64, attempted: u64) -> Self {
        Self { last, attempted }
    }
}

/// Error indicating a back-truncation below the first retained index.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("truncate back out of range: first={first}, last={last}, index={index}")]
pub struct TruncateOutOfRange {
    pub first: u64,
    pub last: u64,
    pub index: u64,
}

impl TruncateOutOfRange {
    pub fn new(first: u64, last: u64, index: u64) -> Self {
        Self { first, last, index }
    }
}
