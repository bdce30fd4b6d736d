//! In-memory registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::key::Key;
use crate::listeners::{ListenerId, Listeners, RegistryListener, WatchCallback, WatchId};
use crate::traits::Registry;
use crate::value::Value;

#[derive(Default)]
struct State {
    entries: BTreeMap<Key, Value>,
    watchers: HashMap<Key, Vec<(WatchId, WatchCallback)>>,
}

/// A registry held entirely in process memory.
///
/// Watchers belong to the entry they watch: deleting a key drops its
/// watchers, and a key created again later starts with none.
///
/// # Example
///
/// ```rust
/// use openv_registry::{key, MemoryRegistry, Registry, Value};
///
/// # tokio_test_block_on(async {
/// let registry = MemoryRegistry::new();
/// registry.write(&key!("a.b"), Value::from(5)).await.unwrap();
/// assert_eq!(registry.read(&key!("a.b")).await.unwrap(), Value::from(5));
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
    listeners: Listeners,
    next_watch_id: AtomicU64,
}

impl MemoryRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with initial entries.
    pub fn with_entries(entries: impl IntoIterator<Item = (Key, Value)>) -> Self {
        let registry = Self::new();
        registry.lock().entries.extend(entries);
        registry
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live watches on `key`.
    pub fn watch_count(&self, key: &Key) -> usize {
        self.lock().watchers.get(key).map_or(0, Vec::len)
    }

    fn remove_watch(&self, key: &Key, id: WatchId) {
        let mut state = self.lock();
        if let Some(list) = state.watchers.get_mut(key) {
            list.retain(|(watch_id, _)| *watch_id != id);
            if list.is_empty() {
                state.watchers.remove(key);
            }
        }
    }

    /// Number of listeners registered with `on`.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn next_watch_id(&self) -> WatchId {
        WatchId(self.next_watch_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// The watch behind a pending `wait`, removed when the wait ends or is
/// dropped.
struct WaitWatch<'a> {
    registry: &'a MemoryRegistry,
    key: &'a Key,
    id: WatchId,
}

impl Drop for WaitWatch<'_> {
    fn drop(&mut self) {
        self.registry.remove_watch(self.key, self.id);
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn read(&self, key: &Key) -> Result<Value> {
        let value = self
            .lock()
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(key))?;
        self.listeners.notify_read(key, &value);
        Ok(value)
    }

    async fn write(&self, key: &Key, value: Value) -> Result<()> {
        let watchers: Vec<WatchCallback> = {
            let mut state = self.lock();
            state.entries.insert(key.clone(), value.clone());
            state
                .watchers
                .get(key)
                .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for watcher in watchers {
            watcher(&value);
        }
        self.listeners.notify_write(key, &value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        {
            let mut state = self.lock();
            if state.entries.remove(key).is_none() {
                return Err(Error::not_found(key));
            }
            state.watchers.remove(key);
        }
        self.listeners.notify_delete(key);
        Ok(())
    }

    async fn has(&self, key: &Key) -> Result<bool> {
        Ok(self.lock().entries.contains_key(key))
    }

    async fn entries(&self) -> Result<Vec<(Key, Value)>> {
        Ok(self
            .lock()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn watch(&self, key: &Key, callback: WatchCallback) -> Result<WatchId> {
        let id = self.next_watch_id();
        let current = {
            let mut state = self.lock();
            let current = state
                .entries
                .get(key)
                .cloned()
                .ok_or_else(|| Error::not_found(key))?;
            state
                .watchers
                .entry(key.clone())
                .or_default()
                .push((id, callback.clone()));
            current
        };
        callback(&current);
        Ok(id)
    }

    async fn unwatch(&self, key: &Key, id: WatchId) -> Result<()> {
        self.remove_watch(key, id);
        Ok(())
    }

    async fn wait(&self, key: &Key, expected: &Value) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let wanted = expected.clone();
        let id = self.next_watch_id();
        {
            let mut state = self.lock();
            let current = state.entries.get(key).ok_or_else(|| Error::not_found(key))?;
            if current == expected {
                return Ok(());
            }
            let callback: WatchCallback = Arc::new(move |value: &Value| {
                if *value == wanted {
                    if let Some(tx) = tx.lock().ok().and_then(|mut slot| slot.take()) {
                        let _ = tx.send(());
                    }
                }
            });
            state
                .watchers
                .entry(key.clone())
                .or_default()
                .push((id, callback));
        }

        let _watch = WaitWatch {
            registry: self,
            key,
            id,
        };
        // The sender is dropped without firing if the key is deleted first.
        rx.await.map_err(|_| Error::not_found(key))
    }

    fn on(&self, listener: RegistryListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn off(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;

    fn recorder() -> (WatchCallback, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: WatchCallback = Arc::new(move |v: &Value| sink.lock().unwrap().push(v.clone()));
        (cb, seen)
    }

    #[tokio::test]
    async fn basic_write_read() {
        let registry = MemoryRegistry::new();
        registry.write(&key!("foo"), Value::from("bar")).await.unwrap();
        assert_eq!(
            registry.read(&key!("foo")).await.unwrap(),
            Value::from("bar")
        );
    }

    #[tokio::test]
    async fn read_nonexistent_is_not_found() {
        let registry = MemoryRegistry::new();
        let err = registry.read(&key!("nonexistent")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn overwrite_replaces() {
        let registry = MemoryRegistry::new();
        registry.write(&key!("v"), Value::from("first")).await.unwrap();
        registry.write(&key!("v"), Value::from("second")).await.unwrap();
        assert_eq!(registry.read(&key!("v")).await.unwrap(), Value::from("second"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn null_is_stored() {
        let registry = MemoryRegistry::new();
        registry.write(&key!("n"), Value::Null).await.unwrap();
        assert!(registry.has(&key!("n")).await.unwrap());
        assert_eq!(registry.read(&key!("n")).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn watch_absent_key_fails() {
        let registry = MemoryRegistry::new();
        let (cb, _) = recorder();
        assert!(registry.watch(&key!("x"), cb).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn watch_ignores_other_keys() {
        let registry = MemoryRegistry::new();
        registry.write(&key!("a"), Value::from(1)).await.unwrap();
        let (cb, seen) = recorder();
        registry.watch(&key!("a"), cb).await.unwrap();

        registry.write(&key!("a.b"), Value::from(2)).await.unwrap();
        registry.write(&key!("b"), Value::from(3)).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Value::from(1)]);
    }

    #[tokio::test]
    async fn unwatch_stops_delivery() {
        let registry = MemoryRegistry::new();
        registry.write(&key!("a"), Value::from(1)).await.unwrap();
        let (cb, seen) = recorder();
        let id = registry.watch(&key!("a"), cb).await.unwrap();
        registry.unwatch(&key!("a"), id).await.unwrap();
        registry.unwatch(&key!("a"), id).await.unwrap();

        registry.write(&key!("a"), Value::from(2)).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Value::from(1)]);
    }

    #[tokio::test]
    async fn delete_drops_watchers() {
        let registry = MemoryRegistry::new();
        registry.write(&key!("a"), Value::from(1)).await.unwrap();
        let (cb, seen) = recorder();
        registry.watch(&key!("a"), cb).await.unwrap();

        registry.delete(&key!("a")).await.unwrap();
        registry.write(&key!("a"), Value::from(2)).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Value::from(1)]);
    }

    #[tokio::test]
    async fn watcher_may_reenter_registry_state() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.write(&key!("a"), Value::from(1)).await.unwrap();

        let inner = registry.clone();
        let lengths = Arc::new(Mutex::new(Vec::new()));
        let sink = lengths.clone();
        registry
            .watch(
                &key!("a"),
                Arc::new(move |_| sink.lock().unwrap().push(inner.len())),
            )
            .await
            .unwrap();

        registry.write(&key!("a"), Value::from(2)).await.unwrap();
        assert_eq!(*lengths.lock().unwrap(), vec![1, 1]);
    }

    #[tokio::test]
    async fn wait_resolves_immediately_on_match() {
        let registry = MemoryRegistry::new();
        registry
            .write(&key!("ready"), Value::Array(vec![Value::from(1)]))
            .await
            .unwrap();
        registry
            .wait(&key!("ready"), &Value::Array(vec![Value::from(1)]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_resolves_on_later_write() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.write(&key!("ready"), Value::from(false)).await.unwrap();

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait(&key!("ready"), &Value::from(true)).await })
        };
        tokio::task::yield_now().await;

        registry.write(&key!("ready"), Value::from("nope")).await.unwrap();
        registry.write(&key!("ready"), Value::from(true)).await.unwrap();

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn wait_fails_when_key_is_deleted() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.write(&key!("k"), Value::from(0)).await.unwrap();

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait(&key!("k"), &Value::from(1)).await })
        };
        tokio::task::yield_now().await;

        registry.delete(&key!("k")).await.unwrap();
        assert!(waiter.await.unwrap().unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn listeners_see_reads_writes_deletes() {
        let registry = MemoryRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let sink = log.clone();
        registry.on(RegistryListener::read(move |k, v| {
            sink.lock().unwrap().push(format!("read {} {:?}", k, v));
        }));
        let sink = log.clone();
        registry.on(RegistryListener::write(move |k, v| {
            sink.lock().unwrap().push(format!("write {} {:?}", k, v));
        }));
        let sink = log.clone();
        registry.on(RegistryListener::delete(move |k| {
            sink.lock().unwrap().push(format!("delete {}", k));
        }));

        registry.write(&key!("a"), Value::from(1)).await.unwrap();
        registry.read(&key!("a")).await.unwrap();
        registry.write(&key!("a"), Value::Null).await.unwrap();
        registry.delete(&key!("a")).await.unwrap();
        let _ = registry.read(&key!("a")).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "write a Integer(1)",
                "read a Integer(1)",
                "delete a",
                "delete a",
            ]
        );
    }

    #[tokio::test]
    async fn dropped_wait_removes_its_watch() {
        let registry = MemoryRegistry::new();
        let (key, wanted) = (key!("k"), Value::from(1));
        registry.write(&key, Value::from(0)).await.unwrap();

        for _ in 0..3 {
            tokio::select! {
                biased;
                _ = registry.wait(&key, &wanted) => panic!("resolved early"),
                _ = async {} => {}
            }
        }
        assert_eq!(registry.watch_count(&key), 0);
    }

    #[tokio::test]
    async fn off_removes_a_listener() {
        let registry = MemoryRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let sink = log.clone();
        let id = registry.on(RegistryListener::write(move |k, _| {
            sink.lock().unwrap().push(k.to_string());
        }));
        assert_eq!(registry.listener_count(), 1);

        registry.write(&key!("a"), Value::from(1)).await.unwrap();
        registry.off(id);
        registry.off(id);
        registry.write(&key!("b"), Value::from(1)).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a"]);
        assert_eq!(registry.listener_count(), 0);
    }

    #[tokio::test]
    async fn with_entries_seeds_data() {
        let registry = MemoryRegistry::with_entries([
            (key!("a"), Value::from(1)),
            (key!("b"), Value::from(2)),
        ]);
        assert_eq!(registry.keys().await.unwrap(), vec![key!("a"), key!("b")]);
    }
}
