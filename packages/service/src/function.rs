//! Function and generator types accepted by `ServiceApi`.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream};
use futures::{FutureExt, StreamExt};
use openv_registry::Value;

/// Any error a service function may fail with. Only its message crosses
/// the call boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a service function produces.
pub type FunctionResult = std::result::Result<Value, BoxError>;

/// A callable bound to a function name.
pub type ServiceFunction = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, FunctionResult> + Send + Sync>;

/// A generator bound to a function name. Each call starts a fresh stream.
pub type ServiceGenerator =
    Arc<dyn Fn(Vec<Value>) -> BoxStream<'static, FunctionResult> + Send + Sync>;

/// Wrap an async closure as a `ServiceFunction`.
///
/// ```rust
/// use openv_registry::Value;
/// use openv_service::service_fn;
///
/// let double = service_fn(|args: Vec<Value>| async move {
///     let n = args.first().and_then(Value::as_i64).ok_or("expected a number")?;
///     Ok(Value::from(n * 2))
/// });
/// ```
pub fn service_fn<F, Fut>(f: F) -> ServiceFunction
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FunctionResult> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

/// Wrap a stream-producing closure as a `ServiceGenerator`.
pub fn service_generator<F, S>(f: F) -> ServiceGenerator
where
    F: Fn(Vec<Value>) -> S + Send + Sync + 'static,
    S: Stream<Item = FunctionResult> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}
