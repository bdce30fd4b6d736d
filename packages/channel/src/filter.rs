//! Per-operation request filtering over a channel.
//!
//! A filtered channel vetoes `request.get`, `request.set` and
//! `request.delete` messages whose predicate returns `false`. A vetoed request
//! never reaches the other side. Instead a failed response is produced and
//! routed back to whoever issued the request:
//!
//! - vetoed on `send` (a local caller): delivered to the local subscribers
//! - vetoed on arrival (a remote caller): answered upstream on the channel
//!
//! `response.list` entries are filtered by the `get` predicate when the
//! matching `request.list` passed through this wrapper.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use openv_registry::Value;

use crate::queue::ListenerQueue;
use crate::traits::{anonymous_name, listener, Channel, Listener};
use crate::Message;

pub type KeyPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type KeyValuePredicate = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;

/// Predicates for `filter_channel`. A missing predicate allows everything.
#[derive(Clone, Default)]
pub struct ChannelFilters {
    pub get: Option<KeyPredicate>,
    pub set: Option<KeyValuePredicate>,
    pub delete: Option<KeyPredicate>,
}

impl ChannelFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_get(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.get = Some(Arc::new(f));
        self
    }

    pub fn with_set(mut self, f: impl Fn(&str, &Value) -> bool + Send + Sync + 'static) -> Self {
        self.set = Some(Arc::new(f));
        self
    }

    pub fn with_delete(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.delete = Some(Arc::new(f));
        self
    }

    fn allows_get(&self, key: &str) -> bool {
        self.get.as_ref().map_or(true, |f| f(key))
    }

    fn allows_set(&self, key: &str, value: &Value) -> bool {
        self.set.as_ref().map_or(true, |f| f(key, value))
    }

    fn allows_delete(&self, key: &str) -> bool {
        self.delete.as_ref().map_or(true, |f| f(key))
    }

    /// The failed response answering `msg`, if `msg` is a vetoed request.
    fn veto(&self, msg: &Message) -> Option<Message> {
        match msg {
            Message::GetRequest { id, key } if !self.allows_get(key) => {
                Some(Message::GetResponse {
                    id: *id,
                    key: key.clone(),
                    value: None,
                    success: false,
                })
            }
            Message::SetRequest { id, key, value } if !self.allows_set(key, value) => {
                Some(Message::SetResponse {
                    id: *id,
                    key: key.clone(),
                    value: value.clone(),
                    success: false,
                })
            }
            Message::DeleteRequest { id, key } if !self.allows_delete(key) => {
                Some(Message::DeleteResponse {
                    id: *id,
                    key: key.clone(),
                    success: false,
                })
            }
            _ => None,
        }
    }
}

struct FilterState {
    channel: Arc<dyn Channel>,
    filters: ChannelFilters,
    local: ListenerQueue,
    pending_lists: Mutex<HashSet<u64>>,
    internal_name: String,
    subscribed: Mutex<bool>,
}

impl FilterState {
    fn pending(&self) -> MutexGuard<'_, HashSet<u64>> {
        self.pending_lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track list requests and filter the entries of their responses.
    fn screen_list(&self, msg: Message) -> Message {
        match msg {
            Message::ListRequest { id } => {
                self.pending().insert(id);
                Message::ListRequest { id }
            }
            Message::ListResponse {
                id,
                entries,
                success,
            } => {
                let tracked = self.pending().remove(&id);
                let entries = match (entries, &self.filters.get) {
                    (Some(entries), Some(get)) if tracked => Some(
                        entries
                            .into_iter()
                            .filter(|(key, _)| get(key.as_str()))
                            .collect(),
                    ),
                    (entries, _) => entries,
                };
                Message::ListResponse {
                    id,
                    entries,
                    success,
                }
            }
            other => other,
        }
    }

    fn deliver_local(&self, msg: &Message) {
        // A closed local queue has no one left to tell.
        let _ = self.local.push(msg);
    }

    fn handle_incoming(&self, msg: &Message) {
        if let Some(response) = self.filters.veto(msg) {
            tracing::debug!(kind = msg.kind(), key = ?msg.key(), "filtered inbound request");
            self.channel.send(response);
            return;
        }
        let msg = self.screen_list(msg.clone());
        self.deliver_local(&msg);
    }
}

/// A channel wrapped with request filters. See the module docs.
///
/// The wrapper subscribes to the underlying channel only while it has at
/// least one local subscriber.
pub struct FilterChannel {
    state: Arc<FilterState>,
}

impl FilterChannel {
    pub fn new(channel: Arc<dyn Channel>, filters: ChannelFilters) -> Self {
        Self {
            state: Arc::new(FilterState {
                channel,
                filters,
                local: ListenerQueue::new(),
                pending_lists: Mutex::new(HashSet::new()),
                internal_name: anonymous_name("filter.internal"),
                subscribed: Mutex::new(false),
            }),
        }
    }

    /// Whether the wrapper currently holds a subscription on the underlying
    /// channel.
    pub fn is_attached(&self) -> bool {
        *self.subscribed()
    }

    fn subscribed(&self) -> MutexGuard<'_, bool> {
        self.state.subscribed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self) {
        let mut subscribed = self.subscribed();
        if *subscribed {
            return;
        }
        let weak: Weak<FilterState> = Arc::downgrade(&self.state);
        self.state.channel.subscribe(
            listener(move |msg: &Message| {
                if let Some(state) = weak.upgrade() {
                    state.handle_incoming(msg);
                }
            }),
            Some(&self.state.internal_name),
        );
        *subscribed = true;
    }

    fn detach_if_idle(&self) {
        let mut subscribed = self.subscribed();
        if *subscribed && self.state.local.is_empty() {
            self.state.channel.unsubscribe(&self.state.internal_name);
            *subscribed = false;
        }
    }
}

/// Wrap `channel` with per-operation request filters.
pub fn filter_channel(channel: Arc<dyn Channel>, filters: ChannelFilters) -> FilterChannel {
    FilterChannel::new(channel, filters)
}

impl Channel for FilterChannel {
    fn send(&self, msg: Message) {
        if let Some(response) = self.state.filters.veto(&msg) {
            tracing::debug!(kind = msg.kind(), key = ?msg.key(), "filtered outbound request");
            self.state.deliver_local(&response);
            return;
        }
        let msg = self.state.screen_list(msg);
        self.state.channel.send(msg);
    }

    fn subscribe(&self, listener: Listener, name: Option<&str>) -> String {
        let name = match self.state.local.on(listener, name) {
            Ok(name) => name,
            Err(_) => return name.map(str::to_string).unwrap_or_default(),
        };
        self.attach();
        name
    }

    fn unsubscribe(&self, name: &str) {
        self.state.local.off(name);
        self.detach_if_idle();
    }
}

impl Drop for FilterChannel {
    fn drop(&mut self) {
        if *self.subscribed() {
            self.state.channel.unsubscribe(&self.state.internal_name);
        }
    }
}
