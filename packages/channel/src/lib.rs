//! OpEnv Channel: duplex, named-subscriber message transport.
//!
//! A channel carries registry protocol `Message`s between two sides. Sending
//! on one side delivers synchronously to every current subscriber of the
//! other side, in send order.
//!
//! This crate provides:
//! - `Message`: the tagged wire union (`request.*` / `response.*`)
//! - `Channel`: the transport contract
//! - `create_pair`: two cross-wired in-process ends
//! - `BroadcastChannel`: a channel shared by every context using one name
//! - `pipe_channel`: bidirectional forwarding with a stop handle
//! - `filter_channel`: per-operation request vetoes
//!
//! # Example
//!
//! ```rust
//! use openv_channel::{create_pair, listener, Channel, Message};
//! use std::sync::{Arc, Mutex};
//!
//! let (a, b) = create_pair();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! b.subscribe(listener(move |m: &Message| sink.lock().unwrap().push(m.clone())), None);
//!
//! a.send(Message::GetRequest { id: 1, key: "x".into() });
//! assert_eq!(seen.lock().unwrap().len(), 1);
//! ```

mod broadcast;
mod filter;
mod message;
mod pair;
mod pipe;
mod queue;
mod traits;

pub use broadcast::{create_broadcast_channel, BroadcastChannel, BROADCAST_CAPACITY};
pub use filter::{filter_channel, ChannelFilters, FilterChannel, KeyPredicate, KeyValuePredicate};
pub use message::Message;
pub use pair::{create_pair, PairChannel};
pub use pipe::{pipe_channel, PipeHandle};
pub use queue::{ListenerQueue, QueueClosed};
pub use traits::{anonymous_name, listener, Channel, Listener};
