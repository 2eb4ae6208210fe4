/*!
Persistence coordinator that restores stores on registration and saves them on change.

This module contains the orchestration logic: for every strategy of a store it
probes the backend, restores and merges any persisted snapshot, then
subscribes to mutations and writes the (optionally path-filtered, serialized
and compressed) state back after a debounce delay.

Nothing here panics or returns an error into the code that mutated a store.
Restore and save failures are logged and counted; the store keeps working
with its in-memory state.
*/

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::compression::{CompressionAdapter, LzwCompressor, NoCompression};
use crate::config::{PersistOptions, PersistStrategy, StorageRef, PERSIST_KEY_PREFIX};
use crate::merge::{merge, MergeStrategy};
use crate::observability::{record, PersistEvent};
use crate::serializer::{JsonSerializer, Serializer, StateSnapshot};
use crate::storage::{probe, MemoryStorage, StorageAdapter};
use crate::store::{Store, StoreState, SubscriptionId, WeakStore};
use crate::{PersistError, Result};

/// Lifecycle of one strategy on one store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistPhase {
    /// Not installed, or skipped because its backend failed the probe
    Unregistered,
    /// Loading and merging persisted state
    Restoring,
    /// Installed with no save pending
    Idle,
    /// A debounced save is waiting for its timer
    SaveScheduled,
}

/// Installs persistence on stores
///
/// The persister owns the backends that [`StorageRef::Session`] and
/// [`StorageRef::Local`] resolve to, so tests and embedders decide what
/// "session storage" means.
///
/// # Example
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use statestash_core::{PersistOptions, Persister, Store};
///
/// #[derive(Clone, Default, Serialize, Deserialize)]
/// struct Console {
///     query: String,
/// }
///
/// let persister = Persister::in_memory();
/// let store = Store::new("console", Console::default());
/// let handle = persister
///     .install(&store, &PersistOptions::enabled())?
///     .expect("persistence is enabled");
/// assert_eq!(handle.strategy_keys(), vec!["console"]);
/// # Ok::<(), statestash_core::PersistError>(())
/// ```
#[derive(Clone)]
pub struct Persister {
    session: Arc<dyn StorageAdapter>,
    local: Option<Arc<dyn StorageAdapter>>,
}

impl Persister {
    /// Create a persister whose session backend is `session`
    pub fn new(session: Arc<dyn StorageAdapter>) -> Self {
        Self {
            session,
            local: None,
        }
    }

    /// Create a persister backed by a fresh [`MemoryStorage`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Set the backend [`StorageRef::Local`] resolves to
    pub fn with_local(mut self, local: Arc<dyn StorageAdapter>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn session_storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.session
    }

    fn resolve_storage(&self, storage: &StorageRef) -> Result<Arc<dyn StorageAdapter>> {
        match storage {
            StorageRef::Session => Ok(Arc::clone(&self.session)),
            StorageRef::Local => self.local.clone().ok_or_else(|| {
                PersistError::validation("strategy uses local storage but none is configured")
            }),
            StorageRef::Custom(storage) => Ok(Arc::clone(storage)),
        }
    }

    /// Install persistence on `store`
    ///
    /// Runs eviction (if `max_stores` is set), restores every strategy in
    /// order and subscribes to the store's mutations.
    ///
    /// # Returns
    /// `Ok(None)` if `options.enabled` is false
    ///
    /// Persistence stays installed when the returned handle is dropped; use
    /// [`PersistHandle::uninstall`] to detach it.
    ///
    /// # Errors
    /// * `PersistError::Validation` - If the options are invalid, a strategy
    ///   names a field the state does not have, uses an unconfigured backend,
    ///   or persistence is already installed on the store
    /// * `PersistError::InvalidFormat` - If the state does not serialize to an object
    pub fn install<S: StoreState>(
        &self,
        store: &Store<S>,
        options: &PersistOptions,
    ) -> Result<Option<PersistHandle<S>>> {
        if !options.enabled {
            debug!(store = store.id(), "Persistence disabled");
            return Ok(None);
        }
        options.validate()?;

        let fields = store.field_names()?;
        let runtimes = options
            .effective_strategies()
            .iter()
            .map(|strategy| self.resolve_strategy(store.id(), strategy, &fields))
            .collect::<Result<Vec<_>>>()?;

        if !store.claim_persistence() {
            return Err(PersistError::validation(format!(
                "persistence is already installed on store '{}'",
                store.id()
            )));
        }

        if let Some(max_stores) = options.max_stores {
            let protected: Vec<&str> = runtimes.iter().map(|r| r.key.as_str()).collect();
            match evict_stale_stores(self.session.as_ref(), max_stores, &protected) {
                Ok(evicted) if !evicted.is_empty() => {
                    info!(store = store.id(), evicted = ?evicted, "Evicted old persisted stores");
                    record(PersistEvent::Evicted {
                        count: evicted.len(),
                    });
                }
                Ok(_) => {}
                Err(e) => warn!(store = store.id(), error = %e, "Failed to clean up old stores"),
            }
        }

        for runtime in &runtimes {
            runtime.register(store);
        }

        let weak = store.downgrade();
        let active: Vec<Arc<StrategyRuntime>> = runtimes
            .iter()
            .filter(|r| r.phase() != PersistPhase::Unregistered)
            .cloned()
            .collect();
        let subscription = if active.is_empty() {
            None
        } else {
            let subscriber_store = weak.clone();
            Some(store.subscribe(move |_event| {
                for runtime in &active {
                    runtime.on_mutation(&subscriber_store);
                }
            }))
        };

        Ok(Some(PersistHandle {
            store: weak,
            store_id: store.id().to_string(),
            strategies: runtimes,
            subscription,
        }))
    }

    fn resolve_strategy(
        &self,
        store_id: &str,
        strategy: &PersistStrategy,
        fields: &[String],
    ) -> Result<Arc<StrategyRuntime>> {
        if let Some(paths) = &strategy.paths {
            if let Some(unknown) = paths.iter().find(|p| !fields.contains(p)) {
                return Err(PersistError::validation(format!(
                    "store '{store_id}' has no field '{unknown}' to persist"
                )));
            }
        }

        let serializer: Arc<dyn Serializer> = match &strategy.serializer {
            Some(custom) => Arc::clone(custom),
            None => Arc::new(JsonSerializer::new()),
        };
        let compressor: Arc<dyn CompressionAdapter> = if strategy.compress {
            Arc::new(LzwCompressor::new())
        } else {
            Arc::new(NoCompression::new())
        };

        Ok(Arc::new(StrategyRuntime {
            store_id: store_id.to_string(),
            key: strategy.resolved_key(store_id).to_string(),
            storage: self.resolve_storage(&strategy.storage)?,
            paths: strategy.paths.clone(),
            debounce: strategy.debounce_duration(),
            serializer,
            compressor,
            merge_strategy: strategy.merge_strategy,
            lifecycle: Mutex::new(Lifecycle::Unregistered),
            pending: Mutex::new(PendingSave::default()),
        }))
    }
}

/// Remove the oldest namespaced keys until at most `max_stores` remain
///
/// Only keys starting with [`PERSIST_KEY_PREFIX`] are counted, in the
/// backend's enumeration order. Keys listed in `protected` are counted but
/// never removed.
///
/// # Returns
/// The removed keys, oldest first
pub fn evict_stale_stores(
    storage: &dyn StorageAdapter,
    max_stores: usize,
    protected: &[&str],
) -> Result<Vec<String>> {
    let keys: Vec<String> = storage
        .keys()?
        .into_iter()
        .filter(|key| key.starts_with(PERSIST_KEY_PREFIX))
        .collect();

    if keys.len() <= max_stores {
        return Ok(Vec::new());
    }

    let excess = keys.len() - max_stores;
    let victims: Vec<String> = keys
        .into_iter()
        .filter(|key| !protected.contains(&key.as_str()))
        .take(excess)
        .collect();

    for key in &victims {
        storage.delete(key)?;
    }
    Ok(victims)
}

/// Inspection and control of persistence installed on one store
pub struct PersistHandle<S> {
    store: WeakStore<S>,
    store_id: String,
    strategies: Vec<Arc<StrategyRuntime>>,
    subscription: Option<SubscriptionId>,
}

impl<S: StoreState> PersistHandle<S> {
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Phase of the strategy at `index`, in configuration order
    pub fn phase(&self, index: usize) -> Option<PersistPhase> {
        self.strategies.get(index).map(|r| r.phase())
    }

    pub fn phases(&self) -> Vec<PersistPhase> {
        self.strategies.iter().map(|r| r.phase()).collect()
    }

    /// Storage key of every strategy, in configuration order
    pub fn strategy_keys(&self) -> Vec<&str> {
        self.strategies.iter().map(|r| r.key.as_str()).collect()
    }

    /// Run every pending debounced save now
    ///
    /// # Returns
    /// How many saves were run
    pub fn flush(&self) -> usize {
        self.strategies
            .iter()
            .filter(|runtime| runtime.flush(&self.store))
            .count()
    }

    /// Run pending saves, stop listening to mutations and allow a new install
    pub fn uninstall(self) {
        self.flush();
        if let Some(store) = self.store.upgrade() {
            if let Some(subscription) = self.subscription {
                store.unsubscribe(subscription);
            }
            store.release_persistence();
        }
        debug!(store = %self.store_id, "Persistence uninstalled");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Unregistered,
    Restoring,
    Active,
}

/// The single pending save timer of a strategy
#[derive(Default)]
struct PendingSave {
    /// Bumped on every schedule; a timer only fires if its generation is current
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// One installed strategy with its backend, format and timer state
struct StrategyRuntime {
    store_id: String,
    key: String,
    storage: Arc<dyn StorageAdapter>,
    paths: Option<Vec<String>>,
    debounce: Duration,
    serializer: Arc<dyn Serializer>,
    compressor: Arc<dyn CompressionAdapter>,
    merge_strategy: MergeStrategy,
    lifecycle: Mutex<Lifecycle>,
    pending: Mutex<PendingSave>,
}

impl StrategyRuntime {
    fn phase(&self) -> PersistPhase {
        match *lock(&self.lifecycle) {
            Lifecycle::Unregistered => PersistPhase::Unregistered,
            Lifecycle::Restoring => PersistPhase::Restoring,
            Lifecycle::Active if lock(&self.pending).task.is_some() => PersistPhase::SaveScheduled,
            Lifecycle::Active => PersistPhase::Idle,
        }
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        *lock(&self.lifecycle) = lifecycle;
    }

    /// Probe the backend and restore; leaves the strategy unregistered if the probe fails
    fn register<S: StoreState>(&self, store: &Store<S>) {
        if !probe(self.storage.as_ref()) {
            warn!(
                store = %self.store_id,
                key = %self.key,
                backend = self.storage.name(),
                "Storage is not available; strategy skipped"
            );
            record(PersistEvent::BackendUnavailable);
            return;
        }

        self.set_lifecycle(Lifecycle::Restoring);
        match self.restore(store) {
            Ok(true) => {
                debug!(
                    store = %self.store_id,
                    key = %self.key,
                    merge = %self.merge_strategy,
                    "Restored state"
                );
                record(PersistEvent::Restored);
            }
            Ok(false) => debug!(store = %self.store_id, key = %self.key, "Nothing to restore"),
            Err(e) => {
                error!(
                    store = %self.store_id,
                    key = %self.key,
                    operation = "restore",
                    error = %e,
                    "Failed to restore state"
                );
                record(PersistEvent::RestoreFailed);
            }
        }
        self.set_lifecycle(Lifecycle::Active);
    }

    /// # Returns
    /// Whether persisted state was found and merged
    fn restore<S: StoreState>(&self, store: &Store<S>) -> Result<bool> {
        let raw = match self.storage.load(&self.key)? {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(false),
        };

        let data = self.compressor.decompress(&raw)?;
        let mut snapshot = self.serializer.deserialize(&data)?;
        if let Some(paths) = &self.paths {
            snapshot = select_paths(snapshot, paths);
        }

        let merge_strategy = self.merge_strategy;
        store.transform_silently(move |live| {
            Ok(merge(live, Value::Object(snapshot), merge_strategy))
        })?;
        Ok(true)
    }

    fn on_mutation<S: StoreState>(self: &Arc<Self>, store: &WeakStore<S>) {
        if self.debounce.is_zero() {
            self.save_now(store);
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(
                store = %self.store_id,
                key = %self.key,
                "No async runtime; saving without debounce"
            );
            self.save_now(store);
            return;
        };

        let mut pending = lock(&self.pending);
        if let Some(task) = pending.task.take() {
            task.abort();
        }
        pending.generation += 1;

        let generation = pending.generation;
        let delay = self.debounce;
        let this = Arc::clone(self);
        let store = store.clone();
        pending.task = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // backends do synchronous I/O
            let store_id = this.store_id.clone();
            let save = tokio::task::spawn_blocking(move || this.fire(generation, &store));
            if let Err(e) = save.await {
                error!(store = %store_id, error = %e, "Debounced save did not complete");
            }
        }));
    }

    fn fire<S: StoreState>(&self, generation: u64, store: &WeakStore<S>) {
        {
            let mut pending = lock(&self.pending);
            if pending.generation != generation {
                // superseded by a later mutation
                return;
            }
            pending.task = None;
        }
        self.save_now(store);
    }

    /// # Returns
    /// Whether a pending save was run
    fn flush<S: StoreState>(&self, store: &WeakStore<S>) -> bool {
        let had_pending = {
            let mut pending = lock(&self.pending);
            pending.generation += 1;
            match pending.task.take() {
                Some(task) => {
                    task.abort();
                    true
                }
                None => false,
            }
        };
        if had_pending {
            self.save_now(store);
        }
        had_pending
    }

    fn save_now<S: StoreState>(&self, store: &WeakStore<S>) {
        let Some(store) = store.upgrade() else {
            debug!(store = %self.store_id, key = %self.key, "Store dropped before save");
            return;
        };

        if !probe(self.storage.as_ref()) {
            warn!(
                store = %self.store_id,
                key = %self.key,
                backend = self.storage.name(),
                "Storage is not available; save skipped"
            );
            record(PersistEvent::BackendUnavailable);
            return;
        }

        match self.save(&store) {
            Ok(bytes) => {
                debug!(store = %self.store_id, key = %self.key, bytes, "Saved state");
                record(PersistEvent::Saved { bytes });
            }
            Err(e) => {
                error!(
                    store = %self.store_id,
                    key = %self.key,
                    operation = "save",
                    error = %e,
                    "Failed to update storage"
                );
                record(PersistEvent::SaveFailed);
            }
        }
    }

    fn save<S: StoreState>(&self, store: &Store<S>) -> Result<usize> {
        let mut snapshot = store.snapshot()?;
        if let Some(paths) = &self.paths {
            snapshot = select_paths(snapshot, paths);
        }

        let data = self.serializer.serialize(&snapshot)?;
        let data = self.compressor.compress(&data)?;
        self.storage.save(&self.key, &data)?;
        Ok(data.len())
    }
}

/// Keep only the listed fields, in `paths` order
fn select_paths(mut snapshot: StateSnapshot, paths: &[String]) -> StateSnapshot {
    paths
        .iter()
        .filter_map(|path| snapshot.remove(path).map(|value| (path.clone(), value)))
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
