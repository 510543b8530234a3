//! Integration tests for the component runtime
//!
//! Tests the flow: messages -> Component -> shared snapshot run -> observers

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use tealoop::demo::{counter, parse_line, Counter};
use tealoop::{
    Component, ComponentError, ComponentSettings, Env, Initial, NoopResolver, Resolver,
    ShareOptions, Snapshot,
};

use super::common::{
    concat, concat_env, concat_or_fail, eventually, first_error, next_item, strings, take_ok,
};

/// Resolver whose first command never completes; later ones yield nothing
#[derive(Default)]
struct StallsOnce {
    stalled: AtomicBool,
}

#[async_trait]
impl Resolver<(), String> for StallsOnce {
    async fn resolve(&self, _command: ()) -> anyhow::Result<Vec<String>> {
        if !self.stalled.swap(true, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(Vec::new())
    }
}

/// Test that a single observer sees the initial state followed by one state per message
#[tokio::test]
async fn test_states_follow_messages() {
    let component = Component::new(concat_env());
    let mut states = component.states(stream::iter(strings(&["a", "b", "c"])));

    assert_eq!(take_ok(&mut states, 4).await, strings(&["", "a", "ab", "abc"]));
}

/// Test that the counter demo applies parsed lines in order
#[tokio::test]
async fn test_counter_lines_drive_the_component() {
    let lines = ["+", "+", "set 40", "-", "reset", "+"];
    let messages: Vec<_> = lines.iter().map(|line| parse_line(line).unwrap()).collect();

    let component = Component::new(counter::env());
    let mut states = component.states(stream::iter(messages));

    let values: Vec<i64> = take_ok(&mut states, 7)
        .await
        .into_iter()
        .map(|state: Counter| state.value)
        .collect();
    assert_eq!(values, vec![0, 1, 2, 40, 39, 0, 1]);
}

/// Test that delayed deliveries are applied before the next line is read
#[tokio::test(start_paused = true)]
async fn test_commands_drain_before_next_message() {
    let (tx, rx) = mpsc::channel(8);
    let component = Component::new(counter::env());
    let mut snapshots = component.snapshots(ReceiverStream::new(rx));

    assert!(next_item(&mut snapshots).await.unwrap().is_initial());

    // Both lines are queued before the delivery fires.
    tx.send(parse_line("later 7 500").unwrap()).await.unwrap();
    tx.send(parse_line("+").unwrap()).await.unwrap();

    let applied: Vec<Snapshot<_, _, _>> = take_ok(&mut snapshots, 3).await;
    let values: Vec<(i64, u32)> = applied
        .iter()
        .map(|s| (s.current_state().value, s.current_state().pending))
        .collect();
    assert_eq!(values, vec![(0, 1), (7, 0), (8, 0)]);
}

/// Test that several observers share a single run
#[tokio::test]
async fn test_observers_share_one_run() {
    let component = Component::new(concat_env());
    let (tx, rx) = mpsc::channel(8);

    let mut first = component.states(ReceiverStream::new(rx));
    let mut second = component.states(stream::pending());
    let mut third = component.states(stream::pending());

    tx.send("x".to_string()).await.unwrap();
    tx.send("y".to_string()).await.unwrap();

    for observer in [&mut first, &mut second, &mut third] {
        assert_eq!(take_ok(observer, 3).await, strings(&["", "x", "xy"]));
    }
    assert_eq!(component.runs_started(), 1);
    assert_eq!(component.observers(), 3);
}

/// Test that a late observer starts from the most recent state only
#[tokio::test]
async fn test_late_observer_gets_latest_state() {
    let component = Component::new(concat_env());
    let mut first = component.states(stream::iter(strings(&["a", "b", "c"])));
    assert_eq!(take_ok(&mut first, 4).await.last().unwrap(), "abc");

    let (tx, rx) = mpsc::channel(8);
    let mut late = component.states(ReceiverStream::new(rx));
    assert_eq!(next_item(&mut late).await.unwrap(), "abc");

    tx.send("d".to_string()).await.unwrap();
    assert_eq!(next_item(&mut late).await.unwrap(), "abcd");
    assert_eq!(next_item(&mut first).await.unwrap(), "abcd");
}

/// Test that one observer leaving does not disturb the others
#[tokio::test]
async fn test_observer_isolation() {
    let component = Component::new(concat_env());
    let (tx, rx) = mpsc::channel(8);

    let mut stays = component.states(ReceiverStream::new(rx));
    let leaves = component.states(stream::pending());
    assert_eq!(next_item(&mut stays).await.unwrap(), "");
    drop(leaves);

    tx.send("z".to_string()).await.unwrap();
    assert_eq!(next_item(&mut stays).await.unwrap(), "z");
    assert_eq!(component.observers(), 1);
}

/// Test that an updater failure is delivered to every observer
#[tokio::test]
async fn test_failure_reaches_every_observer() {
    let env = Env::new(Initial::new(String::new()), NoopResolver, concat_or_fail);
    let component = Component::new(env);
    let (tx, rx) = mpsc::channel(8);

    let mut first = component.states(ReceiverStream::new(rx));
    let mut second = component.states(stream::pending());
    assert_eq!(next_item(&mut first).await.unwrap(), "");
    assert_eq!(next_item(&mut second).await.unwrap(), "");

    tx.send("boom".to_string()).await.unwrap();

    let expected = ComponentError::Update("refusing to apply boom".to_string());
    assert_eq!(first_error(&mut first).await, expected);
    assert_eq!(first_error(&mut second).await, expected);

    eventually(|| !component.is_running()).await;
}

/// Test that a new observer after a failure starts a fresh run
#[tokio::test]
async fn test_restart_after_failure() {
    let env = Env::new(Initial::new(String::new()), NoopResolver, concat_or_fail);
    let component = Component::new(env);

    let mut failing = component.states(stream::iter(strings(&["a", "boom"])));
    assert!(matches!(first_error(&mut failing).await, ComponentError::Update(_)));
    drop(failing);

    let mut fresh = component.states(stream::iter(strings(&["b"])));
    assert_eq!(take_ok(&mut fresh, 2).await, strings(&["", "b"]));
    assert_eq!(component.runs_started(), 2);
}

/// Test that a returning observer within the grace period reuses the run
#[tokio::test(start_paused = true)]
async fn test_grace_period_keeps_run_alive() {
    let settings = ComponentSettings::default()
        .with_share_options(ShareOptions::while_subscribed(Duration::from_millis(200)));
    let component = Component::with_settings(concat_env(), settings);

    let mut first = component.states(stream::iter(strings(&["a"])));
    assert_eq!(take_ok(&mut first, 2).await, strings(&["", "a"]));
    drop(first);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(component.is_running());
    let mut again = component.states(stream::pending());
    assert_eq!(next_item(&mut again).await.unwrap(), "a");
    drop(again);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!component.is_running());
    assert_eq!(component.runs_started(), 1);

    let mut fresh = component.states(stream::pending());
    assert_eq!(next_item(&mut fresh).await.unwrap(), "");
    assert_eq!(component.runs_started(), 2);
}

/// Test that cancelling the owning scope ends every observer even with queued messages
#[tokio::test]
async fn test_cancel_stops_all_observers() {
    let component = Component::new(concat_env());
    let (tx, rx) = mpsc::channel(8);

    let mut first = component.states(ReceiverStream::new(rx));
    let mut second = component.states(stream::pending());
    assert_eq!(next_item(&mut first).await.unwrap(), "");

    tx.send("queued".to_string()).await.unwrap();
    component.cancel();

    assert!(first.next().await.is_none());
    assert!(second.next().await.is_none());
    eventually(|| !component.is_running()).await;
}

/// Test that an observer reading slowly still sees every state in order
#[tokio::test(start_paused = true)]
async fn test_slow_observer_sees_every_state() {
    let settings = ComponentSettings::default()
        .with_share_options(ShareOptions::immediately().with_buffer(4));
    let component = Component::with_settings(concat_env(), settings);
    let messages: Vec<String> = (0..100).map(|i| (i % 10).to_string()).collect();

    let mut fast = component.states(stream::iter(messages));
    let mut slow = component.states(stream::pending());

    let slow_task = tokio::spawn(async move {
        let mut seen = Vec::new();
        for _ in 0..101 {
            tokio::time::sleep(Duration::from_millis(1)).await;
            seen.push(next_item(&mut slow).await.unwrap());
        }
        seen
    });

    let seen = take_ok(&mut fast, 101).await;
    assert_eq!(seen.last().map(String::len), Some(100));
    assert_eq!(slow_task.await.unwrap(), seen);
}

/// Test that messages still queued when a run stops are not applied by the next run
#[tokio::test]
async fn test_stopped_run_drops_queued_messages() {
    let env = Env::new(
        Initial::with_commands(String::new(), vec![()]),
        StallsOnce::default(),
        concat,
    );
    let component = Component::new(env);

    let mut first = component.states(stream::iter(strings(&["stale"])));
    assert_eq!(next_item(&mut first).await.unwrap(), "");
    // The bootstrap command is still draining, so "stale" waits in the queue.
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(first);
    assert!(!component.is_running());

    let mut fresh = component.states(stream::pending());
    assert_eq!(next_item(&mut fresh).await.unwrap(), "");
    assert!(tokio::time::timeout(Duration::from_millis(100), fresh.next())
        .await
        .is_err());
    assert_eq!(component.runs_started(), 2);
}
