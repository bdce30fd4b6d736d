//! The Registry contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::key::Key;
use crate::listeners::{ListenerId, RegistryListener, WatchCallback, WatchId};
use crate::value::Value;

/// An asynchronous key/value store with change notification.
///
/// Every conforming implementation, in-memory or channel-backed, follows the
/// same rules:
///
/// - reading or deleting an absent key fails with `Error::NotFound`
/// - `write` creates or replaces; writing `Value::Null` stores the null but is
///   reported to `on` listeners as a delete
/// - `watch` calls back immediately with the current value, then once per
///   later write of that exact key
/// - listeners run synchronously in registration order
///
/// # Object Safety
///
/// This trait is object-safe: you can use `Arc<dyn Registry>`.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Read the value at a key.
    ///
    /// Fires `read` listeners before returning.
    async fn read(&self, key: &Key) -> Result<Value>;

    /// Create or replace the value at a key.
    async fn write(&self, key: &Key, value: Value) -> Result<()>;

    /// Remove a key. Fails with `NotFound` if the key is absent.
    async fn delete(&self, key: &Key) -> Result<()>;

    /// Check whether a key is present. Never fails with `NotFound`.
    async fn has(&self, key: &Key) -> Result<bool>;

    /// Snapshot of all entries.
    async fn entries(&self) -> Result<Vec<(Key, Value)>>;

    /// Snapshot of all keys.
    async fn keys(&self) -> Result<Vec<Key>> {
        Ok(self.entries().await?.into_iter().map(|(k, _)| k).collect())
    }

    /// Snapshot of all values.
    async fn values(&self) -> Result<Vec<Value>> {
        Ok(self.entries().await?.into_iter().map(|(_, v)| v).collect())
    }

    /// Watch a key.
    ///
    /// Invokes `callback` with the current value before returning, then with
    /// every value subsequently written to `key`. Fails with `NotFound` if the
    /// key is absent. The registration stays until `unwatch` is called.
    async fn watch(&self, key: &Key, callback: WatchCallback) -> Result<WatchId>;

    /// Remove a watch registration. Removing an unknown id is a no-op.
    async fn unwatch(&self, key: &Key, id: WatchId) -> Result<()>;

    /// Resolve once the key holds a value equal to `expected`.
    ///
    /// Resolves immediately if it already does. Fails with `NotFound` if the
    /// key is absent when called.
    async fn wait(&self, key: &Key, expected: &Value) -> Result<()>;

    /// Register a listener fired for every key.
    fn on(&self, listener: RegistryListener) -> ListenerId;

    /// Remove a listener registered with `on`. Removing an unknown id is a
    /// no-op.
    fn off(&self, id: ListenerId);
}

// Blanket implementations for shared and boxed registries

#[async_trait]
impl<T: Registry + ?Sized> Registry for Arc<T> {
    async fn read(&self, key: &Key) -> Result<Value> {
        (**self).read(key).await
    }

    async fn write(&self, key: &Key, value: Value) -> Result<()> {
        (**self).write(key, value).await
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        (**self).delete(key).await
    }

    async fn has(&self, key: &Key) -> Result<bool> {
        (**self).has(key).await
    }

    async fn entries(&self) -> Result<Vec<(Key, Value)>> {
        (**self).entries().await
    }

    async fn keys(&self) -> Result<Vec<Key>> {
        (**self).keys().await
    }

    async fn values(&self) -> Result<Vec<Value>> {
        (**self).values().await
    }

    async fn watch(&self, key: &Key, callback: WatchCallback) -> Result<WatchId> {
        (**self).watch(key, callback).await
    }

    async fn unwatch(&self, key: &Key, id: WatchId) -> Result<()> {
        (**self).unwatch(key, id).await
    }

    async fn wait(&self, key: &Key, expected: &Value) -> Result<()> {
        (**self).wait(key, expected).await
    }

    fn on(&self, listener: RegistryListener) -> ListenerId {
        (**self).on(listener)
    }

    fn off(&self, id: ListenerId) {
        (**self).off(id)
    }
}

#[async_trait]
impl<T: Registry + ?Sized> Registry for Box<T> {
    async fn read(&self, key: &Key) -> Result<Value> {
        self.as_ref().read(key).await
    }

    async fn write(&self, key: &Key, value: Value) -> Result<()> {
        self.as_ref().write(key, value).await
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.as_ref().delete(key).await
    }

    async fn has(&self, key: &Key) -> Result<bool> {
        self.as_ref().has(key).await
    }

    async fn entries(&self) -> Result<Vec<(Key, Value)>> {
        self.as_ref().entries().await
    }

    async fn keys(&self) -> Result<Vec<Key>> {
        self.as_ref().keys().await
    }

    async fn values(&self) -> Result<Vec<Value>> {
        self.as_ref().values().await
    }

    async fn watch(&self, key: &Key, callback: WatchCallback) -> Result<WatchId> {
        self.as_ref().watch(key, callback).await
    }

    async fn unwatch(&self, key: &Key, id: WatchId) -> Result<()> {
        self.as_ref().unwatch(key, id).await
    }

    async fn wait(&self, key: &Key, expected: &Value) -> Result<()> {
        self.as_ref().wait(key, expected).await
    }

    fn on(&self, listener: RegistryListener) -> ListenerId {
        self.as_ref().on(listener)
    }

    fn off(&self, id: ListenerId) {
        self.as_ref().off(id)
    }
}
