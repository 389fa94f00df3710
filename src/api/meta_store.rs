use crate::api::types::PersistentState;
use crate::errors::WalError;

/// Durable storage for the metadata snapshot, plus a small stable KV space
/// for caller state (votes, terms) that must survive restarts with the log.
pub trait MetaStore {
    /// Read the durable snapshot. Returns an empty state when none exists
    /// yet.
    fn load(&self, dir: &str) -> Result<PersistentState, WalError>;

    /// Atomically replace the durable snapshot. Must be all-or-nothing with
    /// respect to crashes: after recovery, either the old or the new
    /// snapshot is visible, never a mixture.
    fn commit(&self, state: &PersistentState) -> Result<(), WalError>;

    /// Read a value previously stored with `set_stable`; `None` when the
    /// key was never written.
    fn get_stable(&self, key: &[u8]) -> Result<Option<Vec<u8>>, WalError>;

    /// Store a small caller value that rides with the metadata.
    fn set_stable(&self, key: &[u8], value: &[u8]) -> Result<(), WalError>;

    fn close(&self) -> Result<(), WalError>;
}
