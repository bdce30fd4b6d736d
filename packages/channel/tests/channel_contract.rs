//! Integration tests for channel combinators working together.

use std::sync::{Arc, Mutex};

use openv_channel::{
    create_pair, filter_channel, listener, pipe_channel, Channel, ChannelFilters, Message,
};
use openv_registry::Value;

fn record(channel: &dyn Channel, name: &str) -> Arc<Mutex<Vec<Message>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    channel.subscribe(
        listener(move |m: &Message| sink.lock().unwrap().push(m.clone())),
        Some(name),
    );
    seen
}

#[test]
fn pair_delivers_exactly_the_sent_message() {
    let (a, b) = create_pair();
    let seen = record(&b, "observer");

    let sent = Message::from_json(r#"{"type":"request.get","key":"x","id":1}"#).unwrap();
    a.send(sent);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Message::GetRequest {
            id: 1,
            key: "x".into()
        }]
    );
}

#[test]
fn resubscribing_a_name_replaces_the_listener() {
    let (a, b) = create_pair();
    let first = record(&b, "same");
    let second = record(&b, "same");

    a.send(Message::ListRequest { id: 1 });

    assert!(first.lock().unwrap().is_empty());
    assert_eq!(second.lock().unwrap().len(), 1);
}

#[test]
fn vetoed_write_never_reaches_the_far_side() {
    let (near, far) = create_pair();
    let far_seen = record(&far, "server");
    let filtered = filter_channel(
        Arc::new(near),
        ChannelFilters::new().with_set(|key, _| key != "secret"),
    );
    let local_seen = record(&filtered, "client");

    filtered.send(Message::SetRequest {
        id: 1,
        key: "secret".into(),
        value: Value::from("hunter2"),
    });

    assert!(far_seen.lock().unwrap().is_empty());
    let local = local_seen.lock().unwrap();
    assert_eq!(local.len(), 1);
    assert!(matches!(
        &local[0],
        Message::SetResponse { id: 1, success: false, key, .. } if key == "secret"
    ));
}

#[test]
fn filter_behind_a_pipe_guards_both_directions() {
    // client <-> [pair] <-> pipe <-> filter <-> [pair] <-> server
    let (client, client_link) = create_pair();
    let (server_link, server) = create_pair();
    let filtered: Arc<dyn Channel> = Arc::new(filter_channel(
        Arc::new(server_link),
        ChannelFilters::new().with_delete(|key| !key.starts_with("system.")),
    ));
    let pipe = pipe_channel(Arc::new(client_link), filtered);

    let client_seen = record(&client, "client");
    let server_seen = record(&server, "server");

    client.send(Message::DeleteRequest {
        id: 1,
        key: "system.boot".into(),
    });
    client.send(Message::DeleteRequest {
        id: 2,
        key: "user.tmp".into(),
    });

    assert_eq!(
        *server_seen.lock().unwrap(),
        vec![Message::DeleteRequest {
            id: 2,
            key: "user.tmp".into()
        }]
    );
    assert_eq!(
        *client_seen.lock().unwrap(),
        vec![Message::DeleteResponse {
            id: 1,
            key: "system.boot".into(),
            success: false
        }]
    );

    pipe.stop();
    client.send(Message::ListRequest { id: 3 });
    assert_eq!(server_seen.lock().unwrap().len(), 1);
}
