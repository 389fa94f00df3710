use crate::api::types::LogEntry;
use crate::errors::WalError;

/// Durable, ordered, append-only storage of log entries keyed by
/// monotonically increasing indices.
///
/// This is the interface a consensus engine programs against.
pub trait LogStore {
    /// The first retained index. 0 when the log is empty.
    fn first_index(&self) -> Result<u64, WalError>;

    /// The last written index. 0 when the log is empty.
    fn last_index(&self) -> Result<u64, WalError>;

    /// Read the entry at `index` into `out`. `NotFound` when `index` is
    /// below the first index, beyond the last, or in a truncated range.
    fn get_log(&self, index: u64, out: &mut LogEntry) -> Result<(), WalError>;

    /// Append a batch. Entries must be strictly contiguous, and unless the
    /// log is empty the first entry must be `last_index + 1`. An empty log
    /// accepts any starting index.
    fn store_logs(&self, entries: &[LogEntry]) -> Result<(), WalError>;

    /// Remove all entries before `index`, making it the first entry.
    /// Truncating past the last index is legal and leaves the log empty.
    fn truncate_front(&self, index: u64) -> Result<(), WalError>;

    /// Remove all entries after `index`, making it the last entry. Fails
    /// with `OutOfRange` when `index` is below the first index.
    fn truncate_back(&self, index: u64) -> Result<(), WalError>;

    /// Close the store. Idempotent; subsequent operations return `Closed`.
    fn close(&self) -> Result<(), WalError>;
}
