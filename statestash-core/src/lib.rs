/*!
# StateStash Core

Debounced persistence for in-process state stores.

This crate restores a store's state from a key-value backend when it is
registered and writes it back after mutations, with support for:

- Multiple strategies per store, each with its own key, backend and field subset
- Debounced saves that coalesce bursts of mutations into one write
- Overwrite, shallow and deep merging of restored data into live state
- A self-contained LZW codec producing printable text
- Session (in-memory) and local (single JSON file) backends, extensible through [`StorageAdapter`]
- Bounding the number of persisted stores with oldest-first eviction

## Architecture

- [`Store`] owns the typed state and notifies subscribers on mutation
- [`Persister`] resolves strategies against its backends and installs persistence
- Storage, serialization and compression are adapters behind traits
- Failures are logged with `tracing` and never reach the code mutating a store

## Usage

```rust
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use statestash_core::storage::{LocalFileStorage, StorageAdapter};
use statestash_core::{MergeStrategy, PersistOptions, PersistStrategy, Persister, StorageRef, Store};

#[derive(Clone, Default, Serialize, Deserialize)]
struct Tables {
    selected: Option<String>,
    history: Vec<String>,
}

let dir = tempfile::tempdir()?;
let local = Arc::new(LocalFileStorage::new(dir.path().join("state.json")));
let persister = Persister::in_memory().with_local(local.clone());

let options = PersistOptions::enabled().with_strategy(
    PersistStrategy::new()
        .with_key("persist_tables")
        .with_storage(StorageRef::Local)
        .with_paths(["history"])
        .with_merge_strategy(MergeStrategy::Deep)
        .compressed(true),
);

let store = Store::new("tables", Tables::default());
persister.install(&store, &options)?;

store.update(|s| s.history.push("users".into()));
assert!(local.exists("persist_tables"));
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/

pub mod compression;
pub mod config;
pub mod error;
pub mod merge;
pub mod observability;
pub mod persister;
pub mod serializer;
pub mod storage;
pub mod store;


pub use compression::{
    compress, compression_ratio, decompress, CompressionAdapter, LzwCompressor, NoCompression,
};
pub use config::{
    namespaced_key, PersistOptions, PersistStrategy, StorageRef, PERSIST_KEY_PREFIX,
};
pub use error::{PersistError, Result};
pub use merge::{merge, MergeStrategy};
pub use observability::{init_default_observability, init_observability};
pub use persister::{evict_stale_stores, PersistHandle, PersistPhase, Persister};
pub use serializer::{FnSerializer, JsonSerializer, Serializer, StateSnapshot};
pub use storage::{probe, LocalFileStorage, MemoryStorage, StorageAdapter};
pub use store::{MutationEvent, Store, StoreState, SubscriptionId, WeakStore};
