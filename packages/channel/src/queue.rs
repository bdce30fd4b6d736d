//! Named listener queue shared by channel implementations.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::traits::{anonymous_name, Listener};
use crate::Message;

/// The queue has been closed and accepts no more listeners or messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("queue closed")]
pub struct QueueClosed;

#[derive(Default)]
struct QueueState {
    listeners: Vec<(String, Listener)>,
    closed: bool,
}

/// An ordered set of named listeners.
///
/// Registering under an existing name replaces that listener in place.
/// `push` snapshots the listeners and invokes them with no lock held, so a
/// listener may subscribe, unsubscribe or send while being dispatched.
#[derive(Default)]
pub struct ListenerQueue {
    state: Mutex<QueueState>,
}

impl ListenerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a message to every listener, in registration order.
    pub fn push(&self, msg: &Message) -> Result<(), QueueClosed> {
        let listeners: Vec<Listener> = {
            let state = self.lock();
            if state.closed {
                return Err(QueueClosed);
            }
            state.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(msg);
        }
        Ok(())
    }

    /// Register a listener, returning the name it was stored under.
    pub fn on(&self, listener: Listener, name: Option<&str>) -> Result<String, QueueClosed> {
        let name = name.map(str::to_string).unwrap_or_else(|| anonymous_name("anon"));
        let mut state = self.lock();
        if state.closed {
            return Err(QueueClosed);
        }
        match state.listeners.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = listener,
            None => state.listeners.push((name.clone(), listener)),
        }
        Ok(name)
    }

    /// Remove a listener. Unknown names are ignored.
    pub fn off(&self, name: &str) {
        self.lock().listeners.retain(|(n, _)| n != name);
    }

    /// Close the queue and drop every listener.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.listeners.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
