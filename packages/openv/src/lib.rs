//! OpEnv: a micro-kernel messaging core.
//!
//! Everything the kernel offers is built on a single key/value registry:
//!
//! ```text
//! openv-registry          Registry trait, keys, values, MemoryRegistry
//! openv-channel           message channels: pair, broadcast, pipe, filter
//! openv-channel-registry  the registry spoken over a channel
//! openv-service           IPC queues and named function calls
//! ```
//!
//! A `Kernel` owns one registry, boots the IPC and service APIs over it, and
//! lets other APIs be installed and looked up by type.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use openv::{Kernel, KernelConfig};
//! use openv::registry::{MemoryRegistry, Value};
//! use openv::service::service_fn;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let kernel = Kernel::boot(Arc::new(MemoryRegistry::new()), KernelConfig::default())
//!     .await
//!     .unwrap();
//! let service = kernel.service();
//! let opts = kernel.service_options();
//!
//! let greet = service_fn(|args: Vec<Value>| async move {
//!     let name = args.first().and_then(Value::as_str).unwrap_or("world").to_string();
//!     Ok(Value::from(format!("hello, {}", name)))
//! });
//! service.define_function("greet", greet, kernel.default_namespace(), &opts).await.unwrap();
//!
//! let reply = service
//!     .call_function("greet", vec![Value::from("kernel")], kernel.default_namespace(), &opts)
//!     .await
//!     .unwrap();
//! assert_eq!(reply, Value::from("hello, kernel"));
//! # });
//! ```

mod config;
mod error;
mod kernel;

pub use config::KernelConfig;
pub use error::{KernelError, Result};
pub use kernel::{Api, Kernel};

pub use openv_channel as channel;
pub use openv_channel_registry as channel_registry;
pub use openv_registry as registry;
pub use openv_service as service;
