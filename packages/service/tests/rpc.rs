//! End-to-end function calls through the service layer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use openv_channel::create_pair;
use openv_channel_registry::{ChannelRegistry, RegistryServer};
use openv_registry::{MemoryRegistry, Registry, Value};
use openv_service::{
    service_fn, service_generator, FunctionResult, ServiceApi, ServiceError, ServiceFunction,
    ServiceOptions,
};

fn setup() -> (ServiceApi, Arc<MemoryRegistry>, ServiceOptions) {
    let registry = Arc::new(MemoryRegistry::new());
    (
        ServiceApi::new(registry.clone()),
        registry,
        ServiceOptions::default(),
    )
}

fn double() -> ServiceFunction {
    service_fn(|args: Vec<Value>| async move {
        let n = args
            .first()
            .and_then(Value::as_i64)
            .ok_or("expected a number")?;
        Ok(Value::from(n * 2))
    })
}

fn constant(value: &'static str) -> ServiceFunction {
    service_fn(move |_args: Vec<Value>| async move { Ok(Value::from(value)) })
}

#[tokio::test]
async fn double_of_21_is_42() {
    let (api, _registry, opts) = setup();
    api.define_function("double", double(), "ns", &opts)
        .await
        .unwrap();

    let result = api
        .call_function("double", vec![Value::from(21)], "ns", &opts)
        .await
        .unwrap();
    assert_eq!(result, Value::from(42));
}

#[tokio::test]
async fn concurrent_calls_get_their_own_responses() {
    let (api, _registry, opts) = setup();
    api.define_function("double", double(), "ns", &opts)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        api.call_function("double", vec![Value::from(1)], "ns", &opts),
        api.call_function("double", vec![Value::from(50)], "ns", &opts),
    );
    assert_eq!(a.unwrap(), Value::from(2));
    assert_eq!(b.unwrap(), Value::from(100));
}

#[tokio::test]
async fn many_sequential_calls_survive_queue_truncation() {
    let (api, _registry, opts) = setup();
    let opts = opts.with_buffer_length(2);
    api.define_function("double", double(), "ns", &opts)
        .await
        .unwrap();

    for n in 0..25 {
        let result = api
            .call_function("double", vec![Value::from(n)], "ns", &opts)
            .await
            .unwrap();
        assert_eq!(result, Value::from(n * 2));
    }
}

#[tokio::test]
async fn callee_errors_relay_their_message() {
    let (api, _registry, opts) = setup();
    api.define_function("double", double(), "ns", &opts)
        .await
        .unwrap();

    let err = api
        .call_function("double", vec![Value::from("x")], "ns", &opts)
        .await
        .unwrap_err();
    match err {
        ServiceError::Remote { function, message } => {
            assert_eq!(function, "double");
            assert_eq!(message, "expected a number");
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn anycast_alternates_between_executors() {
    let (api, _registry, opts) = setup();
    api.define_anycast_function("ping", 1, constant("A"), "ns", &opts)
        .await
        .unwrap();
    api.define_anycast_function("ping", 2, constant("B"), "ns", &opts)
        .await
        .unwrap();

    let first = api.call_function("ping", vec![], "ns", &opts).await.unwrap();
    let second = api.call_function("ping", vec![], "ns", &opts).await.unwrap();
    assert_eq!((first, second), (Value::from("A"), Value::from("B")));
}

#[tokio::test]
async fn anycast_rotation_wraps_around() {
    let (api, _registry, opts) = setup();
    for (id, label) in [(1, "one"), (2, "two"), (3, "three")] {
        api.define_anycast_function("work", id, constant(label), "ns", &opts)
            .await
            .unwrap();
    }

    let mut order = Vec::new();
    for _ in 0..4 {
        order.push(api.call_function("work", vec![], "ns", &opts).await.unwrap());
    }
    assert_eq!(
        order,
        vec![
            Value::from("one"),
            Value::from("two"),
            Value::from("three"),
            Value::from("one"),
        ]
    );
}

#[tokio::test]
async fn undefining_an_anycast_group_keeps_executors() {
    let (api, _registry, opts) = setup();
    api.define_anycast_function("ping", 7, constant("seven"), "ns", &opts)
        .await
        .unwrap();
    api.undefine_function("ping", "ns", &opts).await.unwrap();

    assert!(api
        .call_function("ping", vec![], "ns", &opts)
        .await
        .unwrap_err()
        .is_not_established());
    assert_eq!(
        api.call_function("ping$7", vec![], "ns", &opts).await.unwrap(),
        Value::from("seven")
    );
}

#[tokio::test]
async fn redefining_replaces_the_old_handler() {
    let (api, _registry, opts) = setup();
    let old_calls = Arc::new(AtomicUsize::new(0));
    let counter = old_calls.clone();
    let old = service_fn(move |_args: Vec<Value>| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(Value::from("old")) }
    });

    api.define_function("f", old, "ns", &opts).await.unwrap();
    api.define_function("f", constant("new"), "ns", &opts)
        .await
        .unwrap();

    for _ in 0..3 {
        assert_eq!(
            api.call_function("f", vec![], "ns", &opts).await.unwrap(),
            Value::from("new")
        );
    }
    assert_eq!(old_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn generator_streams_until_done_and_cleans_up() {
    let (api, registry, opts) = setup();
    let count = service_generator(|args: Vec<Value>| {
        let n = args.first().and_then(Value::as_i64).unwrap_or(0);
        stream::iter((1..=n).map(|i| -> FunctionResult { Ok(Value::from(i)) }))
    });
    api.define_generator("count", count, "ns", &opts)
        .await
        .unwrap();

    let values: Vec<Value> = api
        .call_generator("count", vec![Value::from(3)], "ns", &opts)
        .await
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(values, vec![Value::from(1), Value::from(2), Value::from(3)]);

    let keys = registry.keys().await.unwrap();
    assert!(!keys.iter().any(|k| k.to_string().ends_with(".next.call")));

    api.undefine_generator("count", "ns", &opts).await.unwrap();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn two_generator_runs_are_independent() {
    let (api, _registry, opts) = setup();
    let letters = service_generator(|_args: Vec<Value>| {
        stream::iter(["a", "b"].map(|s| -> FunctionResult { Ok(Value::from(s)) }))
    });
    api.define_generator("letters", letters, "ns", &opts)
        .await
        .unwrap();

    let mut first = api
        .call_generator("letters", vec![], "ns", &opts)
        .await
        .unwrap();
    let mut second = api
        .call_generator("letters", vec![], "ns", &opts)
        .await
        .unwrap();

    assert_eq!(first.next().await.unwrap().unwrap(), Value::from("a"));
    assert_eq!(second.next().await.unwrap().unwrap(), Value::from("a"));
    assert_eq!(first.next().await.unwrap().unwrap(), Value::from("b"));
    assert!(first.next().await.is_none());
    assert_eq!(second.next().await.unwrap().unwrap(), Value::from("b"));
}

#[tokio::test]
async fn generator_errors_end_the_stream() {
    let (api, _registry, opts) = setup();
    let faulty = service_generator(|_args: Vec<Value>| {
        stream::iter(vec![
            Ok(Value::from(1)),
            Err("sensor offline".into()),
            Ok(Value::from(2)),
        ])
    });
    api.define_generator("faulty", faulty, "ns", &opts)
        .await
        .unwrap();

    let results: Vec<_> = api
        .call_generator("faulty", vec![], "ns", &opts)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap(), &Value::from(1));
    assert!(matches!(
        &results[1],
        Err(ServiceError::Remote { message, .. }) if message == "sensor offline"
    ));
}

#[tokio::test]
async fn clear_functions_removes_the_namespace() {
    let (api, registry, opts) = setup();
    api.define_function("double", double(), "ns", &opts)
        .await
        .unwrap();
    api.call_function("double", vec![Value::from(1)], "ns", &opts)
        .await
        .unwrap();

    api.clear_functions("ns", &opts).await.unwrap();
    assert!(registry.is_empty());
    assert!(api
        .call_function("double", vec![Value::from(1)], "ns", &opts)
        .await
        .unwrap_err()
        .is_not_established());
}

#[tokio::test]
async fn functions_work_over_a_channel_backed_registry() {
    let (near, far) = create_pair();
    let _server = RegistryServer::serve(Arc::new(MemoryRegistry::new()), Arc::new(far));
    let api = ServiceApi::new(Arc::new(ChannelRegistry::new(near)));
    let opts = ServiceOptions::default();

    api.define_function("double", double(), "remote", &opts)
        .await
        .unwrap();
    let result = api
        .call_function("double", vec![Value::from(21)], "remote", &opts)
        .await
        .unwrap();
    assert_eq!(result, Value::from(42));
}
