//! OpEnv Service: function calls over registry-backed message queues.
//!
//! Two layers, both built only on the `Registry` contract:
//!
//! - `Ipc`: bounded message queues stored as registry lists, with lossy
//!   at-most-latest delivery
//! - `ServiceApi`: named functions in namespaces, with transaction
//!   correlation, anycast round robin and streaming generators
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use openv_registry::{MemoryRegistry, Value};
//! use openv_service::{service_fn, ServiceApi, ServiceOptions};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let api = ServiceApi::new(Arc::new(MemoryRegistry::new()));
//! let opts = ServiceOptions::default();
//!
//! let double = service_fn(|args: Vec<Value>| async move {
//!     let n = args.first().and_then(Value::as_i64).unwrap_or(0);
//!     Ok(Value::from(n * 2))
//! });
//! api.define_function("double", double, "ns", &opts).await.unwrap();
//!
//! let result = api.call_function("double", vec![Value::from(21)], "ns", &opts).await.unwrap();
//! assert_eq!(result, Value::from(42));
//! # });
//! ```

mod envelope;
mod error;
mod function;
mod ipc;
mod options;
mod service;

pub use envelope::{CallMessage, ResponseEnvelope};
pub use error::{Result, ServiceError};
pub use function::{
    service_fn, service_generator, BoxError, FunctionResult, ServiceFunction, ServiceGenerator,
};
pub use ipc::{Ipc, ListenHandle, MessageCallback};
pub use options::{
    IpcOptions, ServiceOptions, DEFAULT_BUFFER_LENGTH, DEFAULT_IPC_ROOT, DEFAULT_NAMESPACE,
    DEFAULT_SERVICE_ROOT,
};
pub use service::{ServiceApi, MAX_ANYCAST_DEPTH};
