/*!
Typed state containers with a mutation subscription hook.

A [`Store`] owns one serializable state value. Every mutation made through the
store notifies its subscribers, which is how the persister learns that a save
is due. The state type doubles as the persisted schema: whatever serde writes
for it is what gets stored, and restored data must deserialize back into it.
*/

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::serializer::{json_kind, StateSnapshot};
use crate::{PersistError, Result};

/// Bound satisfied by every state type a store can persist
pub trait StoreState: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StoreState for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Passed to subscribers after each mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    pub store_id: String,
}

/// Identifies a subscription for [`Store::unsubscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&MutationEvent) + Send + Sync>;

struct StoreInner<S> {
    id: String,
    state: RwLock<S>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
    /// Set while a persister is installed
    persisted: AtomicBool,
}

/// Shared handle to a state container
///
/// Clones refer to the same container.
///
/// # Example
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use statestash_core::Store;
///
/// #[derive(Clone, Default, Serialize, Deserialize)]
/// struct Counter {
///     count: u32,
/// }
///
/// let store = Store::new("counter", Counter::default());
/// store.update(|state| state.count += 1);
/// assert_eq!(store.read(|state| state.count), 1);
/// ```
pub struct Store<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Store<S> {
    /// Create a store holding `state`
    pub fn new<I: Into<String>>(id: I, state: S) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                id: id.into(),
                state: RwLock::new(state),
                subscribers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(0),
                persisted: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Run `f` against the current state
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Clone the current state
    pub fn get(&self) -> S
    where
        S: Clone,
    {
        self.read(S::clone)
    }

    /// Mutate the state, then notify subscribers
    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let result = {
            let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut state)
        };
        self.notify();
        result
    }

    /// Replace the state, then notify subscribers
    pub fn set(&self, state: S) {
        self.update(|current| *current = state);
    }

    /// Register a callback run after every mutation
    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(&MutationEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(subscriber)));
        id
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// A handle that does not keep the store alive
    pub fn downgrade(&self) -> WeakStore<S> {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Mark the store as persisted; `false` if it already was
    pub(crate) fn claim_persistence(&self) -> bool {
        !self.inner.persisted.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn release_persistence(&self) {
        self.inner.persisted.store(false, Ordering::Release);
    }

    fn notify(&self) {
        // Subscribers run without the lock held so they may read the store
        let subscribers: Vec<Subscriber> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect();

        let event = MutationEvent {
            store_id: self.inner.id.clone(),
        };
        for subscriber in subscribers {
            subscriber(&event);
        }
    }
}

impl<S: Serialize> Store<S> {
    /// Serialize the current state into a field map
    ///
    /// # Errors
    /// * `PersistError::InvalidFormat` - If the state does not serialize to an object
    pub fn snapshot(&self) -> Result<StateSnapshot> {
        let value = self.read(|state| serde_json::to_value(state))?;
        into_snapshot(value)
    }

    /// Names of the top-level fields the state serializes
    pub fn field_names(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.keys().cloned().collect())
    }
}

impl<S: StoreState> Store<S> {
    /// Replace the state with a value derived from the JSON form of the current one,
    /// without notifying subscribers
    ///
    /// The state is left untouched if `f` fails or its output does not fit `S`.
    pub(crate) fn transform_silently<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(Value) -> Result<Value>,
    {
        let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
        let current = serde_json::to_value(&*state)?;
        let next: S = serde_json::from_value(f(current)?)?;
        *state = next;
        Ok(())
    }
}

fn into_snapshot(value: Value) -> Result<StateSnapshot> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PersistError::invalid_format(format!(
            "store state must serialize to an object, found {}",
            json_kind(&other)
        ))),
    }
}

/// Non-owning store handle held by timers and subscriptions
pub struct WeakStore<S> {
    inner: Weak<StoreInner<S>>,
}

impl<S> Clone for WeakStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<S> WeakStore<S> {
    pub fn upgrade(&self) -> Option<Store<S>> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Tables {
        selected: Option<String>,
        page: u32,
        columns: Vec<String>,
    }

    #[test]
    fn test_update_notifies_subscribers() {
        let store = Store::new("tables", Tables::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        store.subscribe(move |event| {
            assert_eq!(event.store_id, "tables");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.update(|s| s.page = 3);
        store.set(Tables::default());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscriber_can_read_store() {
        let store = Store::new("tables", Tables::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reader = store.downgrade();
        let sink = Arc::clone(&seen);

        store.subscribe(move |_| {
            if let Some(store) = reader.upgrade() {
                sink.lock().unwrap().push(store.read(|s| s.page));
            }
        });

        store.update(|s| s.page = 1);
        store.update(|s| s.page = 2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_unsubscribe() {
        let store = Store::new("tables", Tables::default());
        let id = store.subscribe(|_| {});
        assert_eq!(store.subscriber_count(), 1);
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_snapshot_and_field_names() {
        let store = Store::new(
            "tables",
            Tables {
                selected: Some("users".into()),
                page: 2,
                columns: vec!["id".into()],
            },
        );

        let snapshot = store.snapshot().unwrap();
        assert_eq!(
            Value::Object(snapshot),
            json!({"selected": "users", "page": 2, "columns": ["id"]})
        );
        assert_eq!(store.field_names().unwrap(), vec!["selected", "page", "columns"]);
    }

    #[test]
    fn test_non_object_state_has_no_snapshot() {
        let store = Store::new("scalar", 5u32);
        assert!(matches!(
            store.snapshot(),
            Err(PersistError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_transform_silently_keeps_state_on_mismatch() {
        let store = Store::new("tables", Tables::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store
            .transform_silently(|_| Ok(json!({"selected": null, "page": 9, "columns": []})))
            .unwrap();
        assert_eq!(store.read(|s| s.page), 9);

        let result = store.transform_silently(|_| Ok(json!({"page": "nine"})));
        assert!(result.is_err());
        assert_eq!(store.read(|s| s.page), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_persistence_claim_is_exclusive() {
        let store = Store::new("tables", Tables::default());
        let clone = store.clone();

        assert!(store.claim_persistence());
        assert!(!clone.claim_persistence());
        clone.release_persistence();
        assert!(store.claim_persistence());
    }

    #[test]
    fn test_weak_store_does_not_keep_store_alive() {
        let store = Store::new("tables", Tables::default());
        let weak = store.downgrade();
        assert!(weak.upgrade().is_some());
        drop(store);
        assert!(weak.upgrade().is_none());
    }
}
