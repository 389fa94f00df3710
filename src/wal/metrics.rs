use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Cumulative operation counters, updated with relaxed atomics on the hot
/// paths and exported as a consistent-enough snapshot.
#[derive(Debug, Default)]
pub(crate) struct WalMetrics {
    /// Number of `store_logs` calls, i.e. batches appended.
    pub(crate) appends: AtomicU64,
    pub(crate) entries_written: AtomicU64,
    /// Payload bytes appended, before any framing the segment writer adds.
    pub(crate) entry_bytes_written: AtomicU64,
    /// Number of `get_log` calls.
    pub(crate) entries_read: AtomicU64,
    pub(crate) entry_bytes_read: AtomicU64,
    /// How many times the log moved to a new segment file.
    pub(crate) segment_rotations: AtomicU64,
    pub(crate) truncations_front: AtomicU64,
    pub(crate) truncations_back: AtomicU64,
    pub(crate) entries_truncated_front: AtomicU64,
    pub(crate) entries_truncated_back: AtomicU64,
    /// Milliseconds between creation and sealing of the most recently
    /// sealed segment; a rough estimate of how fast writes fill the disk.
    pub(crate) last_segment_age_ms: AtomicU64,
}

impl WalMetrics {
    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            entries_written: self.entries_written.load(Ordering::Relaxed),
            entry_bytes_written: self
                .entry_bytes_written
                .load(Ordering::Relaxed),
            entries_read: self.entries_read.load(Ordering::Relaxed),
            entry_bytes_read: self.entry_bytes_read.load(Ordering::Relaxed),
            segment_rotations: self.segment_rotations.load(Ordering::Relaxed),
            truncations_front: self.truncations_front.load(Ordering::Relaxed),
            truncations_back: self.truncations_back.load(Ordering::Relaxed),
            entries_truncated_front: self
                .entries_truncated_front
                .load(Ordering::Relaxed),
            entries_truncated_back: self
                .entries_truncated_back
                .load(Ordering::Relaxed),
            last_segment_age_ms: self
                .last_segment_age_ms
                .load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the WAL counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub appends: u64,
    pub entries_written: u64,
    pub entry_bytes_written: u64,
    pub entries_read: u64,
    pub entry_bytes_read: u64,
    pub segment_rotations: u64,
    pub truncations_front: u64,
    pub truncations_back: u64,
    pub entries_truncated_front: u64,
    pub entries_truncated_back: u64,
    pub last_segment_age_ms: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "WalMetrics{{appends={}, written(entries/bytes)={}/{}, \
             read(entries/bytes)={}/{}, rotations={}, \
             truncations(front/back)={}/{}, truncated(front/back)={}/{}}}",
            self.appends,
            self.entries_written,
            self.entry_bytes_written,
            self.entries_read,
            self.entry_bytes_read,
            self.segment_rotations,
            self.truncations_front,
            self.truncations_back,
            self.entries_truncated_front,
            self.entries_truncated_back,
        )
    }
}
