//! Metadata key-value store used by the signature gallery and the
//! training profile tracker.
//!
//! Keys are UTF-8 strings laid out so that a lexicographic prefix scan yields
//! records in a meaningful order (see `autograph-signature::keys`). Values are
//! opaque bytes; callers serialize with msgpack.
//!
//! Two backends are provided: [`MemoryStore`] for tests and ephemeral use, and
//! [`RedbStore`] for a single-file persistent database.

pub mod memory;
pub mod redb;

use std::fmt;
use thiserror::Error;

/// Errors that can occur in KV store operations.
#[derive(Error, Debug)]
pub enum KVError {
    #[error("kv: storage error: {0}")]
    Storage(String),
}

/// Result type for KV operations.
pub type KVResult<T> = Result<T, KVError>;

/// Key-value store trait.
///
/// Every method is atomic with respect to the other methods on the same
/// store. [`KVStore::batch_set`] writes all entries or none, and
/// [`KVStore::compare_and_swap`] is the primitive used for state transitions
/// that must not race.
pub trait KVStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &str) -> KVResult<Option<Vec<u8>>>;

    /// Set a key-value pair unconditionally.
    fn set(&self, key: &str, value: &[u8]) -> KVResult<()>;

    /// Delete a key. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> KVResult<()>;

    /// Return all entries whose key starts with `prefix`, sorted by key.
    fn scan(&self, prefix: &str) -> KVResult<Vec<(String, Vec<u8>)>>;

    /// Write multiple entries in one transaction.
    fn batch_set(&self, entries: &[(&str, &[u8])]) -> KVResult<()>;

    /// Replace the value at `key` with `new` only if the stored value equals
    /// `expected`.
    ///
    /// `expected == None` means "key must be absent"; `new == None` deletes
    /// the key. Returns `Ok(false)` without writing when the stored value
    /// differs from `expected`.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> KVResult<bool>;
}

impl fmt::Debug for dyn KVStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KVStore {{ ... }}")
    }
}

pub use memory::MemoryStore;
pub use redb::RedbStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_carries_reason() {
        let err = KVError::Storage("disk full".into());
        assert_eq!(err.to_string(), "kv: storage error: disk full");
        assert!(matches!(err, KVError::Storage(reason) if reason == "disk full"));
    }
}
