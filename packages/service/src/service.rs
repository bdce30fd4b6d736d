//! Named functions over IPC channels.
//!
//! A function `name` in `namespace` is two IPC channels under the service
//! root: `<name>.call`, where callers queue `CallMessage`s, and
//! `<name>.response`, where the executor queues `ResponseEnvelope`s. There
//! is no binding table; a function exists if a call can be delivered and
//! answered.
//!
//! An anycast group is a list of executor ids at `<name>.anycast`. Calling
//! `name` while a group exists rotates the group and calls
//! `name$<executor>` instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, BoxStream, StreamExt};
use openv_registry::{Key, Registry, Value};
use tokio::sync::oneshot;

use crate::envelope::{CallMessage, ResponseEnvelope};
use crate::error::{Result, ServiceError};
use crate::function::{service_fn, ServiceFunction, ServiceGenerator};
use crate::ipc::{Ipc, ListenHandle, MessageCallback};
use crate::options::ServiceOptions;

/// How many anycast groups a call may pass through before it is refused.
pub const MAX_ANYCAST_DEPTH: usize = 16;

/// Defines and calls functions in a registry.
///
/// Cloning is cheap; clones share the same listeners.
#[derive(Clone)]
pub struct ServiceApi {
    registry: Arc<dyn Registry>,
    ipc: Ipc,
    handlers: Arc<Mutex<HashMap<Key, ListenHandle>>>,
}

impl ServiceApi {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            ipc: Ipc::new(registry.clone()),
            registry,
            handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ipc(&self) -> &Ipc {
        &self.ipc
    }

    fn handlers(&self) -> MutexGuard<'_, HashMap<Key, ListenHandle>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The registry key `<root>.<namespace>.<name>`.
    fn function_key(&self, name: &str, namespace: &str, options: &ServiceOptions) -> Result<Key> {
        Ok(Key::parse(&format!("{}.{}.{}", options.root, namespace, name))?)
    }

    /// Define `name` in `namespace`, replacing any earlier definition made
    /// through this API.
    ///
    /// Calls queued before the definition are discarded.
    pub async fn define_function(
        &self,
        name: &str,
        function: ServiceFunction,
        namespace: &str,
        options: &ServiceOptions,
    ) -> Result<()> {
        validate_name(name)?;
        let call_channel = format!("{}.call", name);
        let ipc_options = options.ipc();
        let call_key = self.ipc.channel_key(&call_channel, namespace, &ipc_options)?;

        self.stop_handler(&call_key).await?;
        tolerate_absent(self.ipc.clear(&call_channel, namespace, &ipc_options).await)?;

        let callback = self.executor(name, function, namespace, options);
        let handle = self
            .ipc
            .listen(&call_channel, callback, namespace, &ipc_options)
            .await?;

        let replaced = self.handlers().insert(call_key, handle);
        if let Some(replaced) = replaced {
            replaced.stop().await?;
        }
        tracing::debug!(function = name, namespace, "defined");
        Ok(())
    }

    /// The `.call` listener: decode each call, run the function on its own
    /// task, and queue the outcome on `.response`.
    fn executor(
        &self,
        name: &str,
        function: ServiceFunction,
        namespace: &str,
        options: &ServiceOptions,
    ) -> MessageCallback {
        let ipc = self.ipc.clone();
        let name = name.to_string();
        let namespace = namespace.to_string();
        let ipc_options = options.ipc();

        Arc::new(move |message: Value| {
            let call = match CallMessage::from_value(&message) {
                Ok(call) => call,
                Err(e) => {
                    tracing::warn!(function = %name, error = %e, "dropping malformed call");
                    return;
                }
            };
            let (ipc, function, name, namespace, ipc_options) = (
                ipc.clone(),
                function.clone(),
                name.clone(),
                namespace.clone(),
                ipc_options.clone(),
            );
            tokio::spawn(async move {
                let envelope = match function(call.args).await {
                    Ok(value) => ResponseEnvelope::success(call.transaction_id, value),
                    Err(e) => {
                        tracing::debug!(function = %name, error = %e, "function failed");
                        ResponseEnvelope::failure(call.transaction_id, e.to_string())
                    }
                };
                let response_channel = format!("{}.response", name);
                let sent = match envelope.to_value() {
                    Ok(value) => ipc.send(&response_channel, value, &namespace, &ipc_options).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    tracing::debug!(
                        function = %name,
                        error = %e,
                        "response not sent; the caller may not be listening"
                    );
                }
            });
        })
    }

    /// Call `name` in `namespace` and wait for its result.
    ///
    /// If an anycast group exists for `name` the call goes to the group's
    /// next executor. There is no timeout: a call nobody answers waits until
    /// its response channel is deleted.
    pub async fn call_function(
        &self,
        name: &str,
        args: Vec<Value>,
        namespace: &str,
        options: &ServiceOptions,
    ) -> Result<Value> {
        validate_name(name)?;
        let mut target = name.to_string();
        let mut hops = 0;
        while let Some(executor) = self.rotate_anycast(&target, namespace, options).await? {
            hops += 1;
            if hops > MAX_ANYCAST_DEPTH {
                return Err(ServiceError::validation(format!(
                    "anycast groups for {} nest deeper than {}",
                    name, MAX_ANYCAST_DEPTH
                )));
            }
            target = format!("{}${}", target, executor);
        }
        self.call_direct(&target, args, namespace, options).await
    }

    /// Move the head of `name`'s anycast group to its tail and return it.
    async fn rotate_anycast(
        &self,
        name: &str,
        namespace: &str,
        options: &ServiceOptions,
    ) -> Result<Option<String>> {
        let group_key = self.function_key(name, namespace, options)?.join("anycast")?;
        let mut executors = match self.registry.read(&group_key).await {
            Ok(Value::Array(executors)) if !executors.is_empty() => executors,
            Ok(_) => return Ok(None),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let head = executors.remove(0);
        let executor = executor_label(&head).ok_or_else(|| {
            ServiceError::validation(format!("anycast group for {} holds {:?}", name, head))
        })?;
        executors.push(head);
        self.registry.write(&group_key, Value::Array(executors)).await?;
        Ok(Some(executor))
    }

    async fn call_direct(
        &self,
        name: &str,
        args: Vec<Value>,
        namespace: &str,
        options: &ServiceOptions,
    ) -> Result<Value> {
        let ipc_options = options.ipc();
        let call = CallMessage::new(args);
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let transaction_id = call.transaction_id.clone();

        let on_response: MessageCallback = Arc::new(move |message: Value| {
            let Some(envelope) = ResponseEnvelope::from_value(&message) else {
                return;
            };
            if envelope.transaction_id != transaction_id {
                return;
            }
            let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(sender) = sender {
                let _ = sender.send(envelope.into_outcome());
            }
        });

        let response_channel = format!("{}.response", name);
        let listener = ResponseListener(Some(
            self.ipc
                .listen(&response_channel, on_response, namespace, &ipc_options)
                .await?,
        ));

        let sent = self
            .ipc
            .send(&format!("{}.call", name), call.to_value()?, namespace, &ipc_options)
            .await;
        if let Err(e) = sent {
            listener.stop().await?;
            return Err(e);
        }

        let outcome = rx.await;
        tolerate_absent(listener.stop().await)?;
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(ServiceError::Remote {
                function: name.to_string(),
                message,
            }),
            Err(_) => Err(ServiceError::ChannelClosed {
                channel: response_channel,
            }),
        }
    }

    /// Define `name$<executor_id>` and add `executor_id` to `name`'s
    /// anycast group.
    pub async fn define_anycast_function(
        &self,
        name: &str,
        executor_id: u32,
        function: ServiceFunction,
        namespace: &str,
        options: &ServiceOptions,
    ) -> Result<()> {
        validate_name(name)?;
        let group_key = self.function_key(name, namespace, options)?.join("anycast")?;
        let mut executors = match self.registry.read(&group_key).await {
            Ok(Value::Array(executors)) => executors,
            Ok(_) => Vec::new(),
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let id = Value::from(executor_id);
        if !executors.contains(&id) {
            executors.push(id);
        }

        self.define_function(&format!("{}${}", name, executor_id), function, namespace, options)
            .await?;
        self.registry.write(&group_key, Value::Array(executors)).await?;
        Ok(())
    }

    /// Define a generator.
    ///
    /// Calling `name.generator` starts a fresh stream and answers with its
    /// id. Each stream is stepped through `name.generator.<id>.next`, which
    /// answers `{value, done}` and retires its own call channel once the
    /// stream ends.
    pub async fn define_generator(
        &self,
        name: &str,
        generator: ServiceGenerator,
        namespace: &str,
        options: &ServiceOptions,
    ) -> Result<()> {
        validate_name(name)?;
        let api = self.clone();
        let (base, ns, opts) = (name.to_string(), namespace.to_string(), options.clone());

        let start = service_fn(move |args: Vec<Value>| {
            let (api, base, ns, opts) = (api.clone(), base.clone(), ns.clone(), opts.clone());
            let steps = generator(args);
            async move {
                let id = uuid::Uuid::new_v4().to_string();
                let step_name = format!("{}.generator.{}.next", base, id);
                let step = api.stepper(steps, &step_name, &ns, &opts);
                api.define_function(&step_name, step, &ns, &opts).await?;
                Ok(Value::String(id))
            }
        });

        self.define_function(&format!("{}.generator", name), start, namespace, options)
            .await
    }

    fn stepper(
        &self,
        steps: BoxStream<'static, crate::function::FunctionResult>,
        step_name: &str,
        namespace: &str,
        options: &ServiceOptions,
    ) -> ServiceFunction {
        let steps = Arc::new(tokio::sync::Mutex::new(steps));
        let api = self.clone();
        let (step_name, ns, opts) = (step_name.to_string(), namespace.to_string(), options.clone());

        service_fn(move |_args: Vec<Value>| {
            let (steps, api) = (steps.clone(), api.clone());
            let (step_name, ns, opts) = (step_name.clone(), ns.clone(), opts.clone());
            async move {
                let next = steps.lock().await.next().await;
                match next {
                    Some(Ok(value)) => Ok(step_value(value, false)),
                    Some(Err(e)) => Err(e),
                    None => {
                        api.retire_call_channel(&step_name, &ns, &opts).await?;
                        Ok(step_value(Value::Null, true))
                    }
                }
            }
        })
    }

    /// Start the generator `name` and stream its values.
    ///
    /// The stream ends when the generator does, or after yielding the first
    /// error.
    pub async fn call_generator(
        &self,
        name: &str,
        args: Vec<Value>,
        namespace: &str,
        options: &ServiceOptions,
    ) -> Result<BoxStream<'static, Result<Value>>> {
        validate_name(name)?;
        let started = self
            .call_function(&format!("{}.generator", name), args, namespace, options)
            .await?;
        let id = started
            .as_str()
            .ok_or_else(|| ServiceError::validation("generator id must be a string"))?;

        let state = GeneratorState {
            api: self.clone(),
            step: format!("{}.generator.{}.next", name, id),
            namespace: namespace.to_string(),
            options: options.clone(),
        };
        Ok(stream::unfold(Some(state), |state| async move {
            let state = state?;
            match state
                .api
                .call_function(&state.step, Vec::new(), &state.namespace, &state.options)
                .await
            {
                Ok(step) => {
                    let done = step.field("done").and_then(Value::as_bool).unwrap_or(true);
                    if done {
                        return None;
                    }
                    let value = step.field("value").cloned().unwrap_or_default();
                    Some((Ok(value), Some(state)))
                }
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed())
    }

    /// Remove a function.
    ///
    /// If `name` is an anycast group only the group is removed; its
    /// executors stay defined under their qualified names.
    pub async fn undefine_function(
        &self,
        name: &str,
        namespace: &str,
        options: &ServiceOptions,
    ) -> Result<()> {
        validate_name(name)?;
        let group_key = self.function_key(name, namespace, options)?.join("anycast")?;
        match self.registry.delete(&group_key).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        self.retire_call_channel(name, namespace, options).await?;
        self.drop_channel(&format!("{}.response", name), namespace, options)
            .await
    }

    /// Remove a generator and every stream it started.
    pub async fn undefine_generator(
        &self,
        name: &str,
        namespace: &str,
        options: &ServiceOptions,
    ) -> Result<()> {
        validate_name(name)?;
        let generator = format!("{}.generator", name);
        self.retire_call_channel(&generator, namespace, options).await?;
        self.drop_channel(&format!("{}.response", generator), namespace, options)
            .await?;
        let prefix = self.function_key(&generator, namespace, options)?;
        self.delete_under(&prefix).await
    }

    /// Remove every function in `namespace`.
    pub async fn clear_functions(&self, namespace: &str, options: &ServiceOptions) -> Result<()> {
        let prefix = Key::parse(&format!("{}.{}", options.root, namespace))?;
        self.delete_under(&prefix).await
    }

    /// Stop the local `.call` listener, if any, and drop the channel.
    async fn retire_call_channel(
        &self,
        name: &str,
        namespace: &str,
        options: &ServiceOptions,
    ) -> Result<()> {
        let call_channel = format!("{}.call", name);
        let call_key = self.ipc.channel_key(&call_channel, namespace, &options.ipc())?;
        self.stop_handler(&call_key).await?;
        self.drop_channel(&call_channel, namespace, options).await
    }

    /// Clear a channel and delete its keys, tolerating absence.
    async fn drop_channel(&self, channel: &str, namespace: &str, options: &ServiceOptions) -> Result<()> {
        let ipc_options = options.ipc();
        tolerate_absent(self.ipc.clear(channel, namespace, &ipc_options).await)?;
        let key = self.ipc.channel_key(channel, namespace, &ipc_options)?;
        tolerate_absent(self.registry.delete(&key.join("bufferLength")?).await.map_err(Into::into))?;
        tolerate_absent(self.registry.delete(&key).await.map_err(Into::into))
    }

    /// Stop local listeners and delete every key under `prefix`.
    async fn delete_under(&self, prefix: &Key) -> Result<()> {
        let stale: Vec<ListenHandle> = {
            let mut handlers = self.handlers();
            let keys: Vec<Key> = handlers
                .keys()
                .filter(|key| key.has_prefix(prefix))
                .cloned()
                .collect();
            keys.iter().filter_map(|key| handlers.remove(key)).collect()
        };
        for handle in stale {
            tolerate_absent(handle.stop().await)?;
        }

        for key in self.registry.keys().await? {
            if key.has_prefix(prefix) {
                tolerate_absent(self.registry.delete(&key).await.map_err(Into::into))?;
            }
        }
        Ok(())
    }

    async fn stop_handler(&self, call_key: &Key) -> Result<()> {
        let handle = self.handlers().remove(call_key);
        if let Some(handle) = handle {
            tolerate_absent(handle.stop().await)?;
        }
        Ok(())
    }
}

/// The `.response` listener of an in-flight call. Dropping it, as happens
/// when the call is cancelled, stops the listener in the background.
struct ResponseListener(Option<ListenHandle>);

impl ResponseListener {
    async fn stop(mut self) -> Result<()> {
        match self.0.take() {
            Some(handle) => handle.stop().await,
            None => Ok(()),
        }
    }
}

impl Drop for ResponseListener {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.stop_in_background();
        }
    }
}

struct GeneratorState {
    api: ServiceApi,
    step: String,
    namespace: String,
    options: ServiceOptions,
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ServiceError::validation("function name must be a non-empty string"));
    }
    Ok(())
}

/// Treat a missing key or channel as already gone.
fn tolerate_absent(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() || e.is_not_established() => Ok(()),
        other => other,
    }
}

fn executor_label(id: &Value) -> Option<String> {
    id.as_i64()
        .map(|n| n.to_string())
        .or_else(|| id.as_str().map(str::to_string))
}

fn step_value(value: Value, done: bool) -> Value {
    Value::Map(
        [
            ("value".to_string(), value),
            ("done".to_string(), Value::Bool(done)),
        ]
        .into_iter()
        .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use openv_registry::{key, MemoryRegistry};

    fn api() -> (ServiceApi, Arc<MemoryRegistry>) {
        let registry = Arc::new(MemoryRegistry::new());
        (ServiceApi::new(registry.clone()), registry)
    }

    fn constant(value: &'static str) -> ServiceFunction {
        service_fn(move |_args: Vec<Value>| async move { Ok(Value::from(value)) })
    }

    #[tokio::test]
    async fn empty_names_are_rejected() {
        let (api, _registry) = api();
        let opts = ServiceOptions::default();
        assert!(matches!(
            api.define_function("", constant("x"), "ns", &opts).await,
            Err(ServiceError::Validation { .. })
        ));
        assert!(matches!(
            api.call_function("", vec![], "ns", &opts).await,
            Err(ServiceError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn calling_an_undefined_function_is_not_established() {
        let (api, _registry) = api();
        let err = api
            .call_function("ghost", vec![], "ns", &ServiceOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_established());
    }

    #[tokio::test]
    async fn define_creates_the_call_channel_under_the_service_root() {
        let (api, registry) = api();
        api.define_function("f", constant("x"), "ns", &ServiceOptions::default())
            .await
            .unwrap();
        assert!(registry
            .has(&key!("party.openv.service.function.ns.f.call"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn anycast_registration_dedups_executors() {
        let (api, registry) = api();
        let opts = ServiceOptions::default();
        api.define_anycast_function("ping", 1, constant("A"), "ns", &opts)
            .await
            .unwrap();
        api.define_anycast_function("ping", 1, constant("A2"), "ns", &opts)
            .await
            .unwrap();
        assert_eq!(
            registry
                .read(&key!("party.openv.service.function.ns.ping.anycast"))
                .await
                .unwrap(),
            Value::from(vec![Value::from(1)])
        );
    }

    #[tokio::test]
    async fn self_referencing_anycast_is_capped() {
        let (api, registry) = api();
        // ping -> ping$1 -> ping$1$1 -> ... every level has a group.
        let mut name = "ping".to_string();
        for _ in 0..=MAX_ANYCAST_DEPTH {
            registry
                .write(
                    &Key::parse(&format!("party.openv.service.function.ns.{}.anycast", name))
                        .unwrap(),
                    Value::from(vec![Value::from(1)]),
                )
                .await
                .unwrap();
            name = format!("{}$1", name);
        }
        let err = api
            .call_function("ping", vec![], "ns", &ServiceOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { .. }));
    }

    #[tokio::test]
    async fn undefine_removes_channels_and_listener() {
        let (api, registry) = api();
        let opts = ServiceOptions::default();
        api.define_function("f", constant("x"), "ns", &opts).await.unwrap();
        api.call_function("f", vec![], "ns", &opts).await.unwrap();

        api.undefine_function("f", "ns", &opts).await.unwrap();
        assert!(registry.is_empty());
        assert!(api.handlers().is_empty());
        assert!(api
            .call_function("f", vec![], "ns", &opts)
            .await
            .unwrap_err()
            .is_not_established());
    }

    #[tokio::test]
    async fn undefine_of_unknown_function_is_tolerated() {
        let (api, _registry) = api();
        api.undefine_function("never", "ns", &ServiceOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn clear_functions_respects_segment_boundaries() {
        let (api, registry) = api();
        let opts = ServiceOptions::default();
        api.define_function("f", constant("x"), "ns", &opts).await.unwrap();
        api.define_function("f", constant("y"), "ns2", &opts).await.unwrap();

        api.clear_functions("ns", &opts).await.unwrap();
        assert!(!registry
            .has(&key!("party.openv.service.function.ns.f.call"))
            .await
            .unwrap());
        assert_eq!(
            api.call_function("f", vec![], "ns2", &opts).await.unwrap(),
            Value::from("y")
        );
    }

    #[tokio::test]
    async fn cancelled_call_releases_its_response_listener() {
        let (api, registry) = api();
        let opts = ServiceOptions::default();
        let stuck = service_fn(|_args: Vec<Value>| {
            futures::future::pending::<crate::function::FunctionResult>()
        });
        api.define_function("stuck", stuck, "ns", &opts).await.unwrap();

        let response = key!("party.openv.service.function.ns.stuck.response");
        for _ in 0..3 {
            tokio::select! {
                biased;
                _ = api.call_function("stuck", vec![], "ns", &opts) => panic!("stuck never answers"),
                _ = async {} => {}
            }
        }
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(registry.has(&response).await.unwrap());
        assert_eq!(registry.watch_count(&response), 0);
    }

    #[test]
    fn executor_labels() {
        assert_eq!(executor_label(&Value::from(3)).as_deref(), Some("3"));
        assert_eq!(executor_label(&Value::from("w1")).as_deref(), Some("w1"));
        assert_eq!(executor_label(&Value::Null), None);
    }
}
