use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::types::SegmentInfo;
use crate::api::types::Types;
use crate::errors::WalError;

/// Segment file lifecycle operations consumed by the engine.
///
/// Files are keyed by `(base_index, id)` so that `list` can reconstruct
/// identity without reading file contents.
pub trait SegmentFiler<T: Types> {
    /// Create a new segment file for `info` and return its writer.
    fn create(&self, info: &SegmentInfo) -> Result<Arc<T::Writer>, WalError>;

    /// Re-open an unsealed segment for continued appends.
    ///
    /// Returns a not-found error when the file is missing; the engine
    /// recovers from a crash between metadata commit and file creation by
    /// calling `create` instead.
    fn recover_tail(
        &self,
        info: &SegmentInfo,
    ) -> Result<Arc<T::Writer>, WalError>;

    /// Open a sealed segment for reads.
    fn open(&self, info: &SegmentInfo) -> Result<Arc<T::Reader>, WalError>;

    /// Enumerate all segment files on disk as `id -> base_index`.
    fn list(&self) -> Result<BTreeMap<u64, u64>, WalError>;

    /// Unlink a segment file. Failures are logged by the engine and are
    /// non-fatal; a leaked file does not affect correctness.
    fn delete(&self, base_index: u64, id: u64) -> Result<(), WalError>;
}
