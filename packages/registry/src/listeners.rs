//! Callback types and the process-wide listener table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::key::Key;
use crate::value::Value;

/// Callback invoked by `Registry::watch` with the key's value.
pub type WatchCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Listener for read and write events.
pub type KeyValueListener = Arc<dyn Fn(&Key, &Value) + Send + Sync>;

/// Listener for delete events.
pub type KeyListener = Arc<dyn Fn(&Key) + Send + Sync>;

/// Identifies a watch registration so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u64);

/// Identifies a listener registered with `Registry::on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// A process-wide listener registered with `Registry::on`.
#[derive(Clone)]
pub enum RegistryListener {
    /// Fired after every successful read.
    Read(KeyValueListener),
    /// Fired after every write of a non-null value.
    Write(KeyValueListener),
    /// Fired after every delete, and after every write of `Value::Null`.
    Delete(KeyListener),
}

impl RegistryListener {
    pub fn read(f: impl Fn(&Key, &Value) + Send + Sync + 'static) -> Self {
        RegistryListener::Read(Arc::new(f))
    }

    pub fn write(f: impl Fn(&Key, &Value) + Send + Sync + 'static) -> Self {
        RegistryListener::Write(Arc::new(f))
    }

    pub fn delete(f: impl Fn(&Key) + Send + Sync + 'static) -> Self {
        RegistryListener::Delete(Arc::new(f))
    }
}

impl std::fmt::Debug for RegistryListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let event = match self {
            RegistryListener::Read(_) => "read",
            RegistryListener::Write(_) => "write",
            RegistryListener::Delete(_) => "delete",
        };
        write!(f, "RegistryListener({})", event)
    }
}

#[derive(Default)]
struct ListenerTable {
    read: Vec<(ListenerId, KeyValueListener)>,
    write: Vec<(ListenerId, KeyValueListener)>,
    delete: Vec<(ListenerId, KeyListener)>,
}

/// Read/write/delete listeners shared by registry implementations.
///
/// Notification snapshots the listener list and invokes it with no lock held,
/// in registration order, so listeners may register or remove listeners.
#[derive(Default)]
pub struct Listeners {
    table: Mutex<ListenerTable>,
    last_id: AtomicU64,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: RegistryListener) -> ListenerId {
        let id = ListenerId(self.last_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut table = self.lock();
        match listener {
            RegistryListener::Read(f) => table.read.push((id, f)),
            RegistryListener::Write(f) => table.write.push((id, f)),
            RegistryListener::Delete(f) => table.delete.push((id, f)),
        }
        id
    }

    /// Remove a listener. Returns false if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut table = self.lock();
        let before = table.len();
        table.read.retain(|(i, _)| *i != id);
        table.write.retain(|(i, _)| *i != id);
        table.delete.retain(|(i, _)| *i != id);
        table.len() != before
    }

    /// Number of registered listeners of every kind.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_read(&self, key: &Key, value: &Value) {
        let listeners: Vec<_> = self.lock().read.iter().map(|(_, f)| f.clone()).collect();
        for listener in listeners {
            listener(key, value);
        }
    }

    /// Notify a write. Writing `Value::Null` is reported as a delete.
    pub fn notify_write(&self, key: &Key, value: &Value) {
        if value.is_null() {
            self.notify_delete(key);
            return;
        }
        let listeners: Vec<_> = self.lock().write.iter().map(|(_, f)| f.clone()).collect();
        for listener in listeners {
            listener(key, value);
        }
    }

    pub fn notify_delete(&self, key: &Key) {
        let listeners: Vec<_> = self.lock().delete.iter().map(|(_, f)| f.clone()).collect();
        for listener in listeners {
            listener(key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListenerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ListenerTable {
    fn len(&self) -> usize {
        self.read.len() + self.write.len() + self.delete.len()
    }
}
