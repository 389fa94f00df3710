//! Core type definitions for the WAL.
//!
//! This module defines the value records shared between the engine and its
//! storage backends, and the `Types` trait which bundles the backend types
//! the engine is parameterized over.

use std::fmt::Debug;
use std::time::SystemTime;

use crate::api::filer::SegmentFiler;
use crate::api::meta_store::MetaStore;
use crate::api::segment::SegmentReader;
use crate::api::segment::SegmentWriter;

/// One log entry: a caller-assigned index plus opaque payload bytes.
///
/// Indices are strictly monotonic across the whole log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEntry {
    pub index: u64,
    pub data: Vec<u8>,
}

impl LogEntry {
    pub fn new(index: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            index,
            data: data.into(),
        }
    }
}

/// Everything the engine durably records about one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Unique, monotonically assigned per WAL lifetime; never reused.
    pub id: u64,

    /// The index the first log written into this segment must have. Fixed
    /// at creation.
    pub base_index: u64,

    /// Lowest index currently retained (>= `base_index`); raised by
    /// front-truncation.
    pub min_index: u64,

    /// Highest index; zero while unsealed, set at seal time.
    pub max_index: u64,

    /// File offset of the on-disk index block; set at seal time.
    pub index_start: u64,

    /// Soft cap in bytes the writer uses to decide seal time.
    pub size_limit: u32,

    pub create_time: SystemTime,

    /// `None` while the segment is still writable.
    pub seal_time: Option<SystemTime>,
}

impl SegmentInfo {
    pub fn is_sealed(&self) -> bool {
        self.seal_time.is_some()
    }
}

/// The durable metadata snapshot: the one source of truth the engine
/// reconciles on-disk segment files against during recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistentState {
    /// Strictly greater than any live segment's `id`.
    pub next_segment_id: u64,

    /// Live segments ordered by `base_index`. At most one is unsealed, and
    /// if one exists it is the last.
    pub segments: Vec<SegmentInfo>,
}

/// The `Types` trait bundles the backend types the WAL engine is generic
/// over: the segment filer, the metadata store, and the per-segment
/// read/write handles they hand out.
///
/// Production code plugs in file-backed implementations; tests plug in
/// in-memory doubles without touching the engine.
pub trait Types
where Self: Debug + Default + Clone + Send + Sync + 'static
{
    /// Appendable tail-segment handle. A writer also serves reads for the
    /// indices it holds.
    type Writer: SegmentWriter + Send + Sync + 'static;

    /// Sealed-segment read handle.
    type Reader: SegmentReader + Send + Sync + 'static;

    /// Creates, opens, recovers, lists and deletes segment files.
    type Filer: SegmentFiler<Self> + Send + Sync + 'static;

    /// Atomically loads and commits the `PersistentState`.
    type Meta: MetaStore + Send + Sync + 'static;
}
