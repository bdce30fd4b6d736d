//! Bounded, registry-backed message queues.
//!
//! An IPC channel is a list of pending messages stored at
//! `<root>.<namespace>.<channel>`, with its queue limit stored beside it at
//! `<root>.<namespace>.<channel>.bufferLength`. Senders append to the list;
//! listeners watch it.
//!
//! Delivery is at-most-latest. Each time the list changes a listener is
//! handed its last element. When the list grows past its limit it is
//! rewritten to hold only the newest message, and the overgrown state is not
//! delivered; the rewrite itself then delivers that newest message.

use std::sync::Arc;

use openv_registry::{Key, Registry, Value, WatchCallback, WatchId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, ServiceError};
use crate::options::IpcOptions;

/// Callback handed each delivered message.
pub type MessageCallback = Arc<dyn Fn(Value) + Send + Sync>;

const BUFFER_LENGTH: &str = "bufferLength";

/// A running listener. Messages keep arriving until `stop` is called or
/// the channel's list is deleted.
pub struct ListenHandle {
    registry: Arc<dyn Registry>,
    key: Key,
    watch: WatchId,
    pump: JoinHandle<()>,
}

impl ListenHandle {
    /// The registry key of the channel's list.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Stop delivering messages.
    pub async fn stop(self) -> Result<()> {
        self.pump.abort();
        self.registry.unwatch(&self.key, self.watch).await?;
        Ok(())
    }

    /// Stop delivering messages without waiting for the watch to be removed.
    ///
    /// Delivery ends at once; the unwatch runs on a spawned task when called
    /// inside a Tokio runtime.
    pub fn stop_in_background(self) {
        self.pump.abort();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let ListenHandle {
            registry, key, watch, ..
        } = self;
        runtime.spawn(async move {
            if let Err(e) = registry.unwatch(&key, watch).await {
                tracing::debug!(channel = %key, error = %e, "unwatch failed");
            }
        });
    }
}

impl std::fmt::Debug for ListenHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenHandle")
            .field("key", &self.key.to_string())
            .field("watch", &self.watch)
            .finish()
    }
}

/// IPC channels over a registry.
#[derive(Clone)]
pub struct Ipc {
    registry: Arc<dyn Registry>,
}

impl Ipc {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// The registry key of a channel's list.
    pub fn channel_key(&self, channel: &str, namespace: &str, options: &IpcOptions) -> Result<Key> {
        if channel.is_empty() {
            return Err(ServiceError::validation("channel name must not be empty"));
        }
        Ok(Key::parse(&format!("{}.{}.{}", options.root, namespace, channel))?)
    }

    /// Listen on a channel, creating it if needed.
    ///
    /// Refreshes the channel's queue limit to `options.buffer_length`.
    /// Messages already queued are not discarded: the last of them is
    /// delivered right away.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn listen(
        &self,
        channel: &str,
        callback: MessageCallback,
        namespace: &str,
        options: &IpcOptions,
    ) -> Result<ListenHandle> {
        let key = self.channel_key(channel, namespace, options)?;
        match self.registry.read(&key).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => self.registry.write(&key, Value::array()).await?,
            Err(e) => return Err(e.into()),
        }
        let limit_key = key.join(BUFFER_LENGTH)?;
        self.registry
            .write(&limit_key, Value::from(limit_value(options.buffer_length)))
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let on_change: WatchCallback = Arc::new(move |messages: &Value| {
            let _ = tx.send(messages.clone());
        });
        let watch = self.registry.watch(&key, on_change).await?;

        let pump = tokio::spawn(pump(
            self.registry.clone(),
            key.clone(),
            limit_key,
            options.buffer_length,
            rx,
            callback,
        ));

        tracing::debug!(channel = %key, "listening");
        Ok(ListenHandle {
            registry: self.registry.clone(),
            key,
            watch,
            pump,
        })
    }

    /// Append a message to a channel.
    pub async fn send(
        &self,
        channel: &str,
        message: Value,
        namespace: &str,
        options: &IpcOptions,
    ) -> Result<()> {
        let key = self.channel_key(channel, namespace, options)?;
        let mut messages = match self.registry.read(&key).await {
            Ok(Value::Array(messages)) => messages,
            Ok(_) => Vec::new(),
            Err(e) if e.is_not_found() => {
                return Err(ServiceError::not_established(channel, namespace))
            }
            Err(e) => return Err(e.into()),
        };
        messages.push(message);
        self.registry.write(&key, Value::Array(messages)).await?;
        Ok(())
    }

    /// Drop every pending message on a channel and refresh its queue limit.
    pub async fn clear(&self, channel: &str, namespace: &str, options: &IpcOptions) -> Result<()> {
        let key = self.established(channel, namespace, options).await?;
        self.reset(&key, options.buffer_length).await
    }

    /// Change a channel's queue limit. Pending messages are dropped.
    pub async fn set_options(
        &self,
        channel: &str,
        namespace: &str,
        options: &IpcOptions,
    ) -> Result<()> {
        let key = self.established(channel, namespace, options).await?;
        self.reset(&key, options.buffer_length).await
    }

    async fn reset(&self, key: &Key, buffer_length: u64) -> Result<()> {
        self.registry
            .write(&key.join(BUFFER_LENGTH)?, Value::from(limit_value(buffer_length)))
            .await?;
        self.registry.write(key, Value::array()).await?;
        Ok(())
    }

    async fn established(&self, channel: &str, namespace: &str, options: &IpcOptions) -> Result<Key> {
        let key = self.channel_key(channel, namespace, options)?;
        if !self.registry.has(&key).await? {
            return Err(ServiceError::not_established(channel, namespace));
        }
        Ok(key)
    }
}

fn limit_value(buffer_length: u64) -> i64 {
    i64::try_from(buffer_length).unwrap_or(i64::MAX)
}

/// Deliver list snapshots to `callback`.
///
/// Snapshots that queued up while the previous batch was handled are taken
/// together. If the newest is over the limit the list is truncated and the
/// batch is dropped; otherwise each snapshot delivers its last element.
async fn pump(
    registry: Arc<dyn Registry>,
    key: Key,
    limit_key: Key,
    default_limit: u64,
    mut snapshots: mpsc::UnboundedReceiver<Value>,
    callback: MessageCallback,
) {
    while let Some(first) = snapshots.recv().await {
        let mut batch = vec![first];
        while let Ok(more) = snapshots.try_recv() {
            batch.push(more);
        }

        let limit = match registry.read(&limit_key).await {
            Ok(value) => value
                .as_i64()
                .and_then(|n| u64::try_from(n).ok())
                .unwrap_or(default_limit),
            Err(_) => default_limit,
        };

        let newest = batch.last().and_then(Value::as_array);
        if let Some(messages) = newest.filter(|m| m.len() as u64 > limit) {
            let keep = messages.last().cloned().into_iter().collect();
            tracing::debug!(channel = %key, dropped = messages.len() - 1, "queue overflow");
            if let Err(e) = registry.write(&key, Value::Array(keep)).await {
                tracing::warn!(channel = %key, error = %e, "failed to truncate queue");
            }
            continue;
        }

        for snapshot in batch {
            match snapshot {
                Value::Array(messages) => {
                    if let Some(last) = messages.into_iter().last() {
                        callback(last);
                    }
                }
                other => {
                    tracing::warn!(channel = %key, value = ?other, "channel does not hold a list");
                }
            }
        }
    }
}
