//! OpEnv Channel Registry: the registry contract spoken over a channel.
//!
//! Sharing one registry across isolation boundaries takes two halves:
//!
//! - `RegistryServer::serve` answers protocol requests arriving on a channel
//!   by performing them against a local registry, and mirrors local writes
//!   back onto the channel.
//! - `ChannelRegistry` implements `Registry` on the other end by turning
//!   each operation into a request/response round trip.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use openv_channel::create_pair;
//! use openv_channel_registry::{ChannelRegistry, RegistryServer};
//! use openv_registry::{key, MemoryRegistry, Registry, Value};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let (near, far) = create_pair();
//! let _server = RegistryServer::serve(Arc::new(MemoryRegistry::new()), Arc::new(far));
//! let remote = ChannelRegistry::new(near);
//!
//! remote.write(&key!("a.b"), Value::from(5)).await.unwrap();
//! assert_eq!(remote.read(&key!("a.b")).await.unwrap(), Value::from(5));
//! # });
//! ```

mod client;
mod server;

pub use client::ChannelRegistry;
pub use server::{RegistryServer, ServeHandle};
