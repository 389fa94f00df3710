mod config;

pub(crate) mod file_lock;
pub(crate) mod num;
pub(crate) mod testing;

pub mod api;
pub mod errors;
pub mod wal;

pub use api::log_store::LogStore;
pub use api::types::LogEntry;
pub use api::types::PersistentState;
pub use api::types::SegmentInfo;
pub use api::types::Types;
pub use config::Config;
pub use config::DEFAULT_SEGMENT_SIZE;
pub use errors::WalError;
pub use wal::metrics::MetricsSnapshot;
pub use wal::stat::SegmentStat;
pub use wal::stat::WalStat;
pub use wal::Wal;

#[cfg(test)]
mod tests;
