//! Registry operations translated into channel round trips.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use openv_channel::{listener, Channel, Message};
use openv_registry::{
    Error, Key, ListenerId, Listeners, Registry, RegistryListener, Result, Value, WatchCallback,
    WatchId,
};
use tokio::sync::oneshot;

/// A `Registry` whose storage lives on the far side of a channel.
///
/// Each operation sends a request with a fresh id and resolves on the
/// response of the matching kind and id. Watches observe `request.set`
/// traffic for their key, which a serving registry emits for every local
/// write, so remote writes are seen as they happen.
///
/// A stored value and an absent key are told apart by the `success` flag:
/// `has` is true only for a successful `response.get` that carries a value.
pub struct ChannelRegistry<C: Channel> {
    channel: C,
    last_id: AtomicU64,
    listeners: Listeners,
    watches: Mutex<HashMap<WatchId, String>>,
    next_watch: AtomicU64,
}

impl<C: Channel> ChannelRegistry<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            last_id: AtomicU64::new(0),
            listeners: Listeners::new(),
            watches: Mutex::new(HashMap::new()),
            next_watch: AtomicU64::new(0),
        }
    }

    /// The channel requests are sent on.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn next_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn watches(&self) -> MutexGuard<'_, HashMap<WatchId, String>> {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a request and wait for the response of `response_kind` with the
    /// same id. The one-shot listener is removed when the call completes or
    /// is dropped.
    async fn round_trip(
        &self,
        op: &str,
        response_kind: &'static str,
        request: impl FnOnce(u64) -> Message,
    ) -> Result<Message> {
        let id = self.next_id();
        let name = format!("{}.{}", op, id);
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));

        let name = self.channel.subscribe(
            listener(move |msg: &Message| {
                if msg.id() != id || msg.kind() != response_kind {
                    return;
                }
                let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(sender) = sender {
                    let _ = sender.send(msg.clone());
                }
            }),
            Some(&name),
        );
        let _subscription = Subscription::new(&self.channel, name);
        self.channel.send(request(id));

        rx.await.map_err(|_| {
            Error::other(format!("channel closed before {} {} was answered", op, id))
        })
    }

    /// Subscribe to `request.set` traffic for `key`, returning the
    /// subscription name.
    fn subscribe_sets(
        &self,
        prefix: &str,
        key: &Key,
        on_value: impl Fn(&Value) + Send + Sync + 'static,
    ) -> String {
        let name = format!(
            "{}.{}.{}",
            prefix,
            key,
            self.next_watch.fetch_add(1, Ordering::Relaxed)
        );
        let wanted = key.to_string();
        self.channel.subscribe(
            listener(move |msg: &Message| {
                if let Message::SetRequest { key, value, .. } = msg {
                    if *key == wanted {
                        on_value(value);
                    }
                }
            }),
            Some(&name),
        )
    }
}

/// Unsubscribes a one-shot listener when dropped, so a cancelled operation
/// leaves nothing behind on the channel.
struct Subscription<'a, C: Channel> {
    channel: &'a C,
    name: String,
}

impl<'a, C: Channel> Subscription<'a, C> {
    fn new(channel: &'a C, name: String) -> Self {
        Self { channel, name }
    }
}

impl<C: Channel> Drop for Subscription<'_, C> {
    fn drop(&mut self) {
        self.channel.unsubscribe(&self.name);
    }
}

#[async_trait]
impl<C: Channel> Registry for ChannelRegistry<C> {
    async fn read(&self, key: &Key) -> Result<Value> {
        let response = self
            .round_trip("read", "response.get", |id| Message::GetRequest {
                id,
                key: key.to_string(),
            })
            .await?;
        match response {
            Message::GetResponse {
                value: Some(value),
                success: true,
                ..
            } => {
                self.listeners.notify_read(key, &value);
                Ok(value)
            }
            _ => Err(Error::not_found(key)),
        }
    }

    async fn write(&self, key: &Key, value: Value) -> Result<()> {
        let sent = value.clone();
        let response = self
            .round_trip("write", "response.set", |id| Message::SetRequest {
                id,
                key: key.to_string(),
                value: sent,
            })
            .await?;
        match response {
            Message::SetResponse { success: true, .. } => {
                self.listeners.notify_write(key, &value);
                Ok(())
            }
            _ => Err(Error::rejected("write", key)),
        }
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let response = self
            .round_trip("delete", "response.delete", |id| Message::DeleteRequest {
                id,
                key: key.to_string(),
            })
            .await?;
        match response {
            Message::DeleteResponse { success: true, .. } => {
                self.listeners.notify_delete(key);
                Ok(())
            }
            _ => Err(Error::rejected("delete", key)),
        }
    }

    async fn has(&self, key: &Key) -> Result<bool> {
        let response = self
            .round_trip("has", "response.get", |id| Message::GetRequest {
                id,
                key: key.to_string(),
            })
            .await?;
        Ok(matches!(
            response,
            Message::GetResponse {
                value: Some(_),
                success: true,
                ..
            }
        ))
    }

    async fn entries(&self) -> Result<Vec<(Key, Value)>> {
        let response = self
            .round_trip("list", "response.list", |id| Message::ListRequest { id })
            .await?;
        match response {
            Message::ListResponse {
                entries: Some(entries),
                ..
            } => entries
                .into_iter()
                .map(|(key, value)| -> Result<(Key, Value)> {
                    Ok((Key::parse(&key)?, value))
                })
                .collect(),
            _ => Err(Error::other("failed to list entries in registry")),
        }
    }

    async fn watch(&self, key: &Key, callback: WatchCallback) -> Result<WatchId> {
        let current = self.read(key).await?;
        callback(&current);

        let id = WatchId(self.next_watch.fetch_add(1, Ordering::Relaxed));
        let name = self.subscribe_sets("watch", key, move |value| callback(value));
        self.watches().insert(id, name);
        Ok(id)
    }

    async fn unwatch(&self, _key: &Key, id: WatchId) -> Result<()> {
        let name = self.watches().remove(&id);
        if let Some(name) = name {
            self.channel.unsubscribe(&name);
        }
        Ok(())
    }

    async fn wait(&self, key: &Key, expected: &Value) -> Result<()> {
        if self.read(key).await? == *expected {
            return Ok(());
        }

        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let wanted = expected.clone();
        let name = self.subscribe_sets("wait", key, move |value| {
            if *value != wanted {
                return;
            }
            let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(sender) = sender {
                let _ = sender.send(());
            }
        });
        let _subscription = Subscription::new(&self.channel, name);

        rx.await
            .map_err(|_| Error::other(format!("channel closed while waiting on {}", key)))
    }

    fn on(&self, listener: RegistryListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn off(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}
