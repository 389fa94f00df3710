//! Per-segment read and append capabilities.
//!
//! The byte-level layout of a segment file (frame encoding, index blocks,
//! checksums, fsync strategy) is entirely the implementor's concern; the
//! engine only relies on the contracts below.

use crate::api::types::LogEntry;
use crate::errors::WalError;

/// Read access to one segment.
pub trait SegmentReader {
    /// Read the entry at `index` into `out`. Returns `NotFound` when the
    /// index is outside the segment's retained range.
    fn get_log(&self, index: u64, out: &mut LogEntry) -> Result<(), WalError>;

    /// Release OS resources held by this handle. Further reads fail.
    fn close(&self) -> Result<(), WalError>;
}

/// Append access to the tail segment.
///
/// Handles are shared; the engine serializes appends through its writer
/// lock, so implementations only need interior mutability, not `&mut`.
pub trait SegmentWriter: SegmentReader {
    /// Durably write a batch. The writer is responsible for atomicity of
    /// the batch as a whole.
    fn append(&self, entries: &[LogEntry]) -> Result<(), WalError>;

    /// Report whether the segment has reached its size limit. If so, also
    /// return the byte offset of the on-disk index block, which the engine
    /// records in the sealed segment's metadata.
    fn sealed(&self) -> Result<(bool, u64), WalError>;

    /// The last index appended so far; 0 when the segment is empty.
    fn last_index(&self) -> u64;
}
