//! Bidirectional forwarding between two channels.

use std::sync::{Arc, Weak};

use crate::traits::{anonymous_name, listener, Channel};
use crate::Message;

/// A running pipe. Forwarding continues until `stop` is called.
///
/// The handle keeps both channels alive; the forwarding subscriptions only
/// hold weak references, so dropping every handle and every other owner of a
/// channel tears the pipe down with it.
pub struct PipeHandle {
    source: Arc<dyn Channel>,
    destination: Arc<dyn Channel>,
    source_name: String,
    destination_name: String,
}

impl PipeHandle {
    /// Remove both forwarding subscriptions.
    pub fn stop(&self) {
        self.source.unsubscribe(&self.source_name);
        self.destination.unsubscribe(&self.destination_name);
    }
}

fn forward_to(target: Weak<dyn Channel>) -> crate::Listener {
    listener(move |msg: &Message| {
        if let Some(target) = target.upgrade() {
            target.send(msg.clone());
        }
    })
}

/// Forward everything `source` receives to `destination` and back.
///
/// The two channels must be distinct: piping a channel to itself loops.
pub fn pipe_channel(source: Arc<dyn Channel>, destination: Arc<dyn Channel>) -> PipeHandle {
    let source_name = source.subscribe(
        forward_to(Arc::downgrade(&destination)),
        Some(&anonymous_name("pipe")),
    );
    let destination_name = destination.subscribe(
        forward_to(Arc::downgrade(&source)),
        Some(&anonymous_name("pipe")),
    );

    PipeHandle {
        source,
        destination,
        source_name,
        destination_name,
    }
}
