//! Serving a registry over a channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use openv_channel::{anonymous_name, listener, Channel, Message};
use openv_registry::{Key, ListenerId, Registry, RegistryListener, Result, Value};
use tokio::sync::mpsc;

/// Handle to a running registry server.
pub struct ServeHandle {
    registry: Arc<dyn Registry>,
    channel: Arc<dyn Channel>,
    subscription: String,
    mirrors: [ListenerId; 2],
    stopped: Arc<AtomicBool>,
}

impl ServeHandle {
    /// Stop answering requests and stop mirroring local activity.
    ///
    /// Takes effect immediately: requests already queued are dropped and the
    /// mirroring listeners are removed from the registry.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.channel.unsubscribe(&self.subscription);
        for id in self.mirrors {
            self.registry.off(id);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Answers registry protocol requests arriving on a channel.
pub struct RegistryServer;

impl RegistryServer {
    /// Serve `registry` on `channel`.
    ///
    /// Every request is performed against `registry` in arrival order and
    /// answered with the matching response. Local writes and deletes, from
    /// any caller, are mirrored onto the channel as `request.set` and
    /// `request.delete` so that remote watchers see them.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn serve(registry: Arc<dyn Registry>, channel: Arc<dyn Channel>) -> ServeHandle {
        let stopped = Arc::new(AtomicBool::new(false));
        let mirrors = mirror(registry.as_ref(), &channel, &stopped);

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = channel.subscribe(
            listener(move |msg: &Message| {
                if msg.is_request() {
                    let _ = tx.send(msg.clone());
                }
            }),
            Some(&anonymous_name("serve")),
        );
        tokio::spawn(work(registry.clone(), channel.clone(), rx, stopped.clone()));

        ServeHandle {
            registry,
            channel,
            subscription,
            mirrors,
            stopped,
        }
    }
}

fn mirror(
    registry: &dyn Registry,
    channel: &Arc<dyn Channel>,
    stopped: &Arc<AtomicBool>,
) -> [ListenerId; 2] {
    let last_id = Arc::new(AtomicU64::new(0));

    let (target, halted, ids) = (Arc::downgrade(channel), stopped.clone(), last_id.clone());
    let writes = registry.on(RegistryListener::write(move |key, value| {
        if let Some(channel) = live(&target, &halted) {
            channel.send(Message::SetRequest {
                id: ids.fetch_add(1, Ordering::Relaxed) + 1,
                key: key.to_string(),
                value: value.clone(),
            });
        }
    }));

    let (target, halted, ids) = (Arc::downgrade(channel), stopped.clone(), last_id);
    let deletes = registry.on(RegistryListener::delete(move |key| {
        if let Some(channel) = live(&target, &halted) {
            channel.send(Message::DeleteRequest {
                id: ids.fetch_add(1, Ordering::Relaxed) + 1,
                key: key.to_string(),
            });
        }
    }));

    [writes, deletes]
}

fn live(channel: &Weak<dyn Channel>, stopped: &AtomicBool) -> Option<Arc<dyn Channel>> {
    if stopped.load(Ordering::SeqCst) {
        return None;
    }
    channel.upgrade()
}

async fn work(
    registry: Arc<dyn Registry>,
    channel: Arc<dyn Channel>,
    mut requests: mpsc::UnboundedReceiver<Message>,
    stopped: Arc<AtomicBool>,
) {
    while let Some(request) = requests.recv().await {
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        if let Some(response) = answer(registry.as_ref(), request).await {
            channel.send(response);
        }
    }
    tracing::debug!("registry server stopped");
}

async fn answer(registry: &dyn Registry, request: Message) -> Option<Message> {
    let response = match request {
        Message::GetRequest { id, key } => match read(registry, &key).await {
            Ok(value) => Message::GetResponse {
                id,
                key,
                value: Some(value),
                success: true,
            },
            Err(e) => {
                tracing::debug!(%key, error = %e, "get failed");
                // A present null keeps the failed answer wire-compatible.
                Message::GetResponse {
                    id,
                    key,
                    value: Some(Value::Null),
                    success: false,
                }
            }
        },
        Message::SetRequest { id, key, value } => {
            let result = write(registry, &key, value.clone()).await;
            if let Err(e) = &result {
                tracing::debug!(%key, error = %e, "set failed");
            }
            Message::SetResponse {
                id,
                key,
                value,
                success: result.is_ok(),
            }
        }
        Message::DeleteRequest { id, key } => {
            let result = delete(registry, &key).await;
            if let Err(e) = &result {
                tracing::debug!(%key, error = %e, "delete failed");
            }
            Message::DeleteResponse {
                id,
                key,
                success: result.is_ok(),
            }
        }
        Message::ListRequest { id } => match list(registry).await {
            Ok(entries) => Message::ListResponse {
                id,
                entries: Some(entries),
                success: true,
            },
            Err(e) => {
                tracing::debug!(error = %e, "list failed");
                Message::ListResponse {
                    id,
                    entries: None,
                    success: false,
                }
            }
        },
        _ => return None,
    };
    Some(response)
}

async fn read(registry: &dyn Registry, key: &str) -> Result<Value> {
    registry.read(&Key::parse(key)?).await
}

async fn write(registry: &dyn Registry, key: &str, value: Value) -> Result<()> {
    registry.write(&Key::parse(key)?, value).await
}

async fn delete(registry: &dyn Registry, key: &str) -> Result<()> {
    registry.delete(&Key::parse(key)?).await
}

async fn list(registry: &dyn Registry) -> Result<Vec<(String, Value)>> {
    Ok(registry
        .entries()
        .await?
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect())
}
