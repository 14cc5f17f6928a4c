//! Storage contract for nonce high-water marks.
//!
//! # Responsibilities
//! - Read the current floor for a namespaced key
//! - Atomically replace a floor only if it still holds the expected value
//!
//! # Design Decisions
//! - Compare-and-set is the only write; the guard builds check-then-write on it
//! - Keys are opaque to the store; namespacing is done by the guard
//! - Infrastructure failures are `StoreError`, never a silent "no record"

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

/// Failures of the durable store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("nonce store unavailable: {0}")]
    Unavailable(String),

    /// Reading or writing the backing file failed.
    #[error("nonce store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted state could not be decoded.
    #[error("nonce store is corrupt: {0}")]
    Corrupt(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable per-key storage of the highest accepted nonce.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Current floor for `key`, or `None` if nothing was ever accepted.
    async fn load_floor(&self, key: &str) -> StoreResult<Option<u64>>;

    /// Set `key` to `new` only if its current floor equals `expected`.
    ///
    /// Returns `false` without writing when the floor changed underneath.
    async fn compare_and_set(&self, key: &str, expected: Option<u64>, new: u64)
        -> StoreResult<bool>;
}

/// In-process store backed by a concurrent map. Not durable.
#[derive(Debug, Default)]
pub struct MemoryNonceStore {
    floors: DashMap<String, u64>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a recorded floor.
    pub fn len(&self) -> usize {
        self.floors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.floors.is_empty()
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn load_floor(&self, key: &str) -> StoreResult<Option<u64>> {
        Ok(self.floors.get(key).map(|r| *r.value()))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        new: u64,
    ) -> StoreResult<bool> {
        // The entry holds the shard lock for the duration of the check and write.
        let swapped = match (self.floors.entry(key.to_string()), expected) {
            (Entry::Vacant(slot), None) => {
                slot.insert(new);
                true
            }
            (Entry::Occupied(mut slot), Some(current)) if *slot.get() == current => {
                slot.insert(new);
                true
            }
            _ => false,
        };
        Ok(swapped)
    }
}
