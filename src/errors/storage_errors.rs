#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Invalid segment file name: {bad_file_name}: {reason}")]
pub struct InvalidSegmentFileName {
    pub bad_file_name: String,
    pub reason: String,
}

impl InvalidSegmentFileName {
    pub fn new(bad_file_name: impl ToString, reason: impl ToString) -> Self {
        Self {
            bad_file_name: bad_file_name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Error indicating that the persisted metadata lists an unsealed segment
/// somewhere other than the tail position.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error(
    "unsealed segment is not at tail: base_index={base_index}, id={id}"
)]
pub struct UnsealedSegmentNotLast {
    pub base_index: u64,
    pub id: u64,
}

impl UnsealedSegmentNotLast {
    pub fn new(base_index: u64, id: u64) -> Self {
        Self { base_index, id }
    }
}
