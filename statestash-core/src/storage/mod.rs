/*!
Storage adapters for persisted store state.

This module defines the storage abstraction (port) and concrete implementations
(adapters). Backends are synchronous key-value string stores in the spirit of
browser `sessionStorage`/`localStorage`: one string per key, keys enumerable in
insertion order.
*/

pub mod local;
pub mod memory;

use crate::Result;
use tracing::warn;

pub use local::LocalFileStorage;
pub use memory::MemoryStorage;

/// Key written and removed by [`probe`]
pub const PROBE_KEY: &str = "__statestash_storage_test__";

/// Storage abstraction for persisted store state
///
/// Implementations use interior mutability so a single backend can be shared
/// (behind an `Arc`) by every strategy that targets it.
pub trait StorageAdapter: Send + Sync {
    /// Load the value stored under `key`
    ///
    /// # Returns
    /// `Ok(None)` if nothing is stored under the key
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    ///
    /// A replaced key keeps its original position in [`StorageAdapter::keys`].
    fn save(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// All keys, oldest insertion first
    fn keys(&self) -> Result<Vec<String>>;

    /// Check whether a value is stored under `key`
    fn exists(&self, key: &str) -> bool {
        matches!(self.load(key), Ok(Some(_)))
    }

    /// Short human-readable backend name used in logs
    fn name(&self) -> &'static str;
}

/// Check that a backend currently accepts writes
///
/// Performs a write/remove round-trip on [`PROBE_KEY`]. Quota exhaustion,
/// disabled storage and unwritable files all show up as `false`; the failure is
/// logged but never returned.
pub fn probe(storage: &dyn StorageAdapter) -> bool {
    let result = storage
        .save(PROBE_KEY, PROBE_KEY)
        .and_then(|()| storage.delete(PROBE_KEY));

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(backend = storage.name(), error = %e, "Storage probe failed");
            false
        }
    }
}
