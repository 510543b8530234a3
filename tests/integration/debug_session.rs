//! Integration tests for the debug mirror
//!
//! Tests the flow: Component -> MockTransport -> envelopes observed by MockPeer,
//! and MockPeer directives -> Component states.

use std::collections::HashSet;

use futures::stream;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use tealoop::debug::mock::{MockPeer, MockTransport};
use tealoop::debug::{ServerNotification, TransportError};
use tealoop::{
    Component, ComponentError, ComponentId, ComponentSettings, DebugSettings, SerdeJsonCodec,
};

use super::common::{
    concat_env, eventually, first_error, next_item, strings, take_ok, NeverInitialized, StringEnv,
};

fn component_id() -> ComponentId {
    ComponentId::new("concat").unwrap()
}

fn mirrored(env: StringEnv) -> (Component<String, String, ()>, MockPeer) {
    let (transport, peer) = MockTransport::new();
    let debug = DebugSettings::new(component_id(), SerdeJsonCodec)
        .with_url("mock://debugger")
        .with_transport(transport);
    let component =
        Component::with_settings(env, ComponentSettings::default().with_debugger(debug));
    (component, peer)
}

fn snapshot(message: &str, old_state: &str, new_state: &str) -> ServerNotification {
    ServerNotification::Snapshot {
        message: json!(message),
        old_state: json!(old_state),
        new_state: json!(new_state),
        commands: vec![],
    }
}

fn attached(state: &str) -> ServerNotification {
    ServerNotification::Attached {
        state: json!(state),
        commands: vec![],
    }
}

/// Test that the peer sees one Attached notification and one Snapshot per message
#[tokio::test]
async fn test_mirror_round_trip() {
    let (component, peer) = mirrored(concat_env());
    let mut states = component.states(stream::iter(strings(&["a", "b", "c"])));

    assert_eq!(take_ok(&mut states, 4).await, strings(&["", "a", "ab", "abc"]));

    let envelopes = peer.wait_for_envelopes(4).await;
    let payloads: Vec<_> = envelopes.iter().map(|e| e.payload.clone()).collect();
    assert_eq!(
        payloads,
        vec![
            attached(""),
            snapshot("a", "", "a"),
            snapshot("b", "a", "ab"),
            snapshot("c", "ab", "abc"),
        ]
    );
    assert!(envelopes.iter().all(|e| e.component_id == component_id()));

    let ids: HashSet<_> = envelopes.iter().map(|e| e.message_id).collect();
    assert_eq!(ids.len(), 4);
    assert_eq!(peer.connect_urls(), vec!["mock://debugger"]);
}

/// Test that a refused connection fails the run before anything is sent
#[tokio::test]
async fn test_connection_failure_sends_nothing() {
    let (transport, peer) = MockTransport::failing("connection refused");
    let debug = DebugSettings::new(component_id(), SerdeJsonCodec).with_transport(transport);
    let component =
        Component::with_settings(concat_env(), ComponentSettings::default().with_debugger(debug));

    let mut states = component.states(stream::iter(strings(&["a"])));
    let err = next_item(&mut states).await.unwrap_err();

    assert!(err.is_connection());
    assert!(matches!(
        err,
        ComponentError::Connection(TransportError::Open { ref reason, .. }) if reason == "connection refused"
    ));
    assert_eq!(peer.connect_count(), 1);
    assert_eq!(peer.frames_sent(), 0);
}

/// Test that a state pushed before the run starts wins over a local initializer that never finishes
#[tokio::test]
async fn test_remote_state_wins_initial_race() {
    let (component, peer) = mirrored(concat_env().with_initializer(NeverInitialized));
    peer.apply_state(&component_id(), json!("remote"));

    let mut states = component.states(stream::iter(strings(&["!"])));
    assert_eq!(take_ok(&mut states, 2).await, strings(&["remote", "remote!"]));

    let envelopes = peer.wait_for_envelopes(2).await;
    assert_eq!(envelopes[0].payload, attached("remote"));
    assert_eq!(envelopes[1].payload, snapshot("!", "remote", "remote!"));
}

/// Test that a state pushed after the local start forks a new initial snapshot
#[tokio::test]
async fn test_apply_state_after_start_resets_the_run() {
    let (component, peer) = mirrored(concat_env());
    let (tx, rx) = mpsc::channel(8);
    let mut states = component.states(ReceiverStream::new(rx));

    tx.send("a".to_string()).await.unwrap();
    assert_eq!(take_ok(&mut states, 2).await, strings(&["", "a"]));

    peer.apply_state(&component_id(), json!("zz"));
    assert_eq!(next_item(&mut states).await.unwrap(), "zz");

    tx.send("b".to_string()).await.unwrap();
    assert_eq!(next_item(&mut states).await.unwrap(), "zzb");

    let payloads: Vec<_> = peer
        .wait_for_envelopes(4)
        .await
        .into_iter()
        .map(|e| e.payload)
        .collect();
    assert_eq!(
        payloads,
        vec![
            attached(""),
            snapshot("a", "", "a"),
            attached("zz"),
            snapshot("b", "zz", "zzb"),
        ]
    );
}

/// Test that messages injected by the debugger are applied like local ones
#[tokio::test]
async fn test_apply_message_is_injected() {
    let (component, peer) = mirrored(concat_env());
    let mut states = component.states(stream::pending());
    assert_eq!(next_item(&mut states).await.unwrap(), "");

    peer.apply_message(&component_id(), json!("remote"));
    assert_eq!(next_item(&mut states).await.unwrap(), "remote");

    let envelopes = peer.wait_for_envelopes(2).await;
    assert_eq!(envelopes[1].payload, snapshot("remote", "", "remote"));
}

/// Test that directives addressed to another component are ignored
#[tokio::test]
async fn test_other_component_directives_are_ignored() {
    let (component, peer) = mirrored(concat_env());
    let mut states = component.states(stream::pending());
    assert_eq!(next_item(&mut states).await.unwrap(), "");

    let other = ComponentId::new("someone-else").unwrap();
    peer.apply_state(&other, json!("hijacked"));
    peer.apply_message(&other, json!("hijacked"));
    peer.apply_message(&component_id(), json!("mine"));

    assert_eq!(next_item(&mut states).await.unwrap(), "mine");
}

/// Test that an undecodable directive fails the run and closes the session
#[tokio::test]
async fn test_decode_fault_is_terminal() {
    let (component, peer) = mirrored(concat_env());
    let mut states = component.states(stream::pending());
    assert_eq!(next_item(&mut states).await.unwrap(), "");

    peer.apply_state(&component_id(), json!({"not": "a string"}));

    let err = first_error(&mut states).await;
    assert!(matches!(err, ComponentError::Decode { ref component_id, .. } if component_id == "concat"));
    eventually(|| peer.is_closed()).await;
}

/// Test that the debugger hanging up surfaces as a connection fault
#[tokio::test]
async fn test_peer_disconnect_is_a_connection_fault() {
    let (component, peer) = mirrored(concat_env());
    let mut states = component.states(stream::pending());
    assert_eq!(next_item(&mut states).await.unwrap(), "");

    peer.disconnect();

    assert_eq!(
        first_error(&mut states).await,
        ComponentError::Connection(TransportError::Closed)
    );
}

/// Test that a failing send surfaces as a connection fault
#[tokio::test]
async fn test_send_failure_is_a_connection_fault() {
    let (component, peer) = mirrored(concat_env());
    let (tx, rx) = mpsc::channel(8);
    let mut states = component.states(ReceiverStream::new(rx));
    assert_eq!(next_item(&mut states).await.unwrap(), "");

    peer.fail_sends();
    tx.send("lost".to_string()).await.unwrap();

    let err = first_error(&mut states).await;
    assert!(matches!(err, ComponentError::Connection(TransportError::Send(_))));
}

/// Test that cancelling the component closes the debug session
#[tokio::test]
async fn test_cancel_closes_the_session() {
    let (component, peer) = mirrored(concat_env());
    let mut states = component.states(stream::pending());
    assert_eq!(next_item(&mut states).await.unwrap(), "");
    assert!(!peer.is_closed());

    component.cancel();

    eventually(|| peer.is_closed()).await;
}

/// Test that the last observer leaving closes the debug session
#[tokio::test]
async fn test_last_observer_leaving_closes_the_session() {
    let (component, peer) = mirrored(concat_env());
    let mut states = component.states(stream::pending());
    assert_eq!(next_item(&mut states).await.unwrap(), "");

    drop(states);

    eventually(|| peer.is_closed()).await;
    assert!(!component.is_running());
}
