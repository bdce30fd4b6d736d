//! The Channel contract.

use std::sync::Arc;

use crate::Message;

/// A subscriber callback.
pub type Listener = Arc<dyn Fn(&Message) + Send + Sync>;

/// Wrap a closure as a `Listener`.
pub fn listener(f: impl Fn(&Message) + Send + Sync + 'static) -> Listener {
    Arc::new(f)
}

/// Generate an opaque, unique subscriber name with the given prefix.
pub fn anonymous_name(prefix: &str) -> String {
    format!("{}.{}", prefix, uuid::Uuid::new_v4().simple())
}

/// A duplex message pipe with named subscribers.
///
/// `send` delivers to the peer side's current subscribers, synchronously and
/// in send order, with no buffering and no delivery confirmation.
///
/// # Object Safety
///
/// This trait is object-safe: you can use `Arc<dyn Channel>`.
pub trait Channel: Send + Sync {
    /// Deliver a message to the peer side.
    fn send(&self, msg: Message);

    /// Register a listener under `name`, or under a generated name if `None`.
    ///
    /// Returns the name the listener was stored under. Subscribing again under
    /// the same name silently replaces the previous listener.
    fn subscribe(&self, listener: Listener, name: Option<&str>) -> String;

    /// Remove a listener. Unknown names are ignored.
    fn unsubscribe(&self, name: &str);
}

impl<T: Channel + ?Sized> Channel for Arc<T> {
    fn send(&self, msg: Message) {
        (**self).send(msg)
    }

    fn subscribe(&self, listener: Listener, name: Option<&str>) -> String {
        (**self).subscribe(listener, name)
    }

    fn unsubscribe(&self, name: &str) {
        (**self).unsubscribe(name)
    }
}

impl<T: Channel + ?Sized> Channel for Box<T> {
    fn send(&self, msg: Message) {
        self.as_ref().send(msg)
    }

    fn subscribe(&self, listener: Listener, name: Option<&str>) -> String {
        self.as_ref().subscribe(listener, name)
    }

    fn unsubscribe(&self, name: &str) {
        self.as_ref().unsubscribe(name)
    }
}
