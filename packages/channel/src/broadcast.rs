//! Channels backed by a process-wide named broadcast hub.
//!
//! Independent contexts that construct a `BroadcastChannel` with the same
//! name share one logical channel: whatever one of them sends reaches the
//! subscribers of every other one. A context does not receive its own sends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use lazy_static::lazy_static;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::queue::ListenerQueue;
use crate::traits::{Channel, Listener};
use crate::Message;

/// Capacity of each named hub channel.
pub const BROADCAST_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
struct Envelope {
    origin: Uuid,
    message: Message,
}

lazy_static! {
    static ref HUB: Mutex<HashMap<String, broadcast::Sender<Envelope>>> =
        Mutex::new(HashMap::new());
}

fn hub_sender(name: &str) -> broadcast::Sender<Envelope> {
    let mut hub = HUB.lock().unwrap_or_else(PoisonError::into_inner);
    hub.entry(name.to_string())
        .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
        .clone()
}

/// A channel joined to a named, process-wide broadcast.
///
/// Must be created inside a Tokio runtime: a forwarding task moves hub
/// traffic to the local subscribers. The task is aborted on drop.
pub struct BroadcastChannel {
    name: String,
    origin: Uuid,
    sender: broadcast::Sender<Envelope>,
    inbox: Arc<ListenerQueue>,
    forwarder: JoinHandle<()>,
}

impl BroadcastChannel {
    /// Join the broadcast called `name`, creating it if needed.
    pub fn new(name: &str) -> Self {
        let sender = hub_sender(name);
        let mut receiver = sender.subscribe();
        let origin = Uuid::new_v4();
        let inbox = Arc::new(ListenerQueue::new());

        let local = inbox.clone();
        let channel_name = name.to_string();
        let forwarder = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) if envelope.origin != origin => {
                        if local.push(&envelope.message).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %channel_name, skipped, "broadcast receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            name: name.to_string(),
            origin,
            sender,
            inbox,
            forwarder,
        }
    }

    /// The broadcast name this channel is joined to.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Join the broadcast called `name`.
pub fn create_broadcast_channel(name: &str) -> BroadcastChannel {
    BroadcastChannel::new(name)
}

impl Channel for BroadcastChannel {
    fn send(&self, msg: Message) {
        // Our own receiver keeps the hub channel open, so this cannot fail.
        let _ = self.sender.send(Envelope {
            origin: self.origin,
            message: msg,
        });
    }

    fn subscribe(&self, listener: Listener, name: Option<&str>) -> String {
        match self.inbox.on(listener, name) {
            Ok(name) => name,
            Err(_) => name.map(str::to_string).unwrap_or_default(),
        }
    }

    fn unsubscribe(&self, name: &str) {
        self.inbox.off(name);
    }
}

impl Drop for BroadcastChannel {
    fn drop(&mut self) {
        self.inbox.close();
        self.forwarder.abort();
    }
}
