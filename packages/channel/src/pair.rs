//! Cross-wired in-process channel pairs.

use std::sync::Arc;

use crate::queue::ListenerQueue;
use crate::traits::{Channel, Listener};
use crate::Message;

/// One end of an in-process channel pair.
///
/// Each end owns the queue its own subscribers listen on and holds the
/// peer's queue for sending. Used to simulate a network link in-process.
///
/// # Example
///
/// ```rust
/// use openv_channel::{create_pair, listener, Channel, Message};
///
/// let (a, b) = create_pair();
/// b.subscribe(listener(|msg: &Message| assert_eq!(msg.id(), 1)), None);
/// a.send(Message::GetRequest { id: 1, key: "x".into() });
/// ```
pub struct PairChannel {
    inbox: Arc<ListenerQueue>,
    peer: Arc<ListenerQueue>,
}

impl PairChannel {
    /// Create two cross-wired channel ends.
    pub fn pair() -> (Self, Self) {
        let queue_a = Arc::new(ListenerQueue::new());
        let queue_b = Arc::new(ListenerQueue::new());

        let a = Self {
            inbox: queue_a.clone(),
            peer: queue_b.clone(),
        };
        let b = Self {
            inbox: queue_b,
            peer: queue_a,
        };
        (a, b)
    }

    /// Close this end. Its subscribers are dropped and the peer's sends to it
    /// are discarded from now on.
    pub fn close(&self) {
        self.inbox.close();
    }

    /// Number of subscribers on this end.
    pub fn subscriber_count(&self) -> usize {
        self.inbox.len()
    }
}

/// Create two cross-wired channel ends.
pub fn create_pair() -> (PairChannel, PairChannel) {
    PairChannel::pair()
}

impl Channel for PairChannel {
    fn send(&self, msg: Message) {
        if self.peer.push(&msg).is_err() {
            tracing::warn!(kind = msg.kind(), id = msg.id(), "dropping message sent to closed peer");
        }
    }

    fn subscribe(&self, listener: Listener, name: Option<&str>) -> String {
        match self.inbox.on(listener, name) {
            Ok(name) => name,
            Err(_) => {
                tracing::warn!(?name, "subscribe on closed channel ignored");
                name.map(str::to_string).unwrap_or_default()
            }
        }
    }

    fn unsubscribe(&self, name: &str) {
        self.inbox.off(name);
    }
}
