//! OpEnv Registry: the storage contract of the kernel.
//!
//! The registry is an asynchronous key/value store with per-key watches and
//! process-wide change listeners. It is the single shared mutable resource of
//! a kernel instance; every API module confines itself to keys under its own
//! root (`<root>.<namespace>.<name>`).
//!
//! This crate provides:
//! - `Key`: dot-segmented, validated registry key
//! - `Value`: the closed, acyclic value union
//! - `Registry`: the async contract (read/write/delete/watch/wait/on)
//! - `MemoryRegistry`: in-process implementation
//!
//! # Example
//!
//! ```rust
//! use openv_registry::{key, Registry, Value, Error};
//!
//! async fn bump(registry: &dyn Registry) -> Result<(), Error> {
//!     let current = match registry.read(&key!("counter")).await {
//!         Ok(value) => value.as_i64().unwrap_or(0),
//!         Err(e) if e.is_not_found() => 0,
//!         Err(e) => return Err(e),
//!     };
//!     registry.write(&key!("counter"), Value::from(current + 1)).await
//! }
//! ```

mod convert;
mod error;
mod key;
mod listeners;
mod memory;
mod traits;
mod value;

pub use convert::{from_value, json_to_value, to_value, value_to_json, BYTES_TAG};
pub use error::{Error, Result};
pub use key::Key;
pub use listeners::{
    KeyListener, KeyValueListener, ListenerId, Listeners, RegistryListener, WatchCallback,
    WatchId,
};
pub use memory::MemoryRegistry;
pub use traits::Registry;
pub use value::Value;
