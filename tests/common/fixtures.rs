//! Components and helpers shared by the integration tests

use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tealoop::{ComponentError, Env, Initial, Initializer, NoopResolver, Update};

/// Upper bound for waiting on a single stream item
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub type StringEnv = Env<String, String, ()>;

/// Appends each message to the state.
pub fn concat(message: &String, state: &String) -> anyhow::Result<Update<String, ()>> {
    Ok(Update::new(format!("{state}{message}")))
}

/// Like [`concat`], but fails on the message `boom`.
pub fn concat_or_fail(message: &String, state: &String) -> anyhow::Result<Update<String, ()>> {
    if message == "boom" {
        anyhow::bail!("refusing to apply boom");
    }
    concat(message, state)
}

/// Concatenating component starting from the empty string
pub fn concat_env() -> StringEnv {
    Env::new(Initial::new(String::new()), NoopResolver, concat)
}

/// Initializer that never produces a state
pub struct NeverInitialized;

#[async_trait]
impl Initializer<String, ()> for NeverInitialized {
    async fn initialize(&self) -> anyhow::Result<Initial<String, ()>> {
        std::future::pending().await
    }
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Next item of `stream`, panicking if none arrives in time or the stream ended.
pub async fn next_item<T, St>(stream: &mut St) -> Result<T, ComponentError>
where
    St: Stream<Item = Result<T, ComponentError>> + Unpin,
{
    match tokio::time::timeout(STEP_TIMEOUT, stream.next()).await {
        Ok(Some(item)) => item,
        Ok(None) => panic!("stream ended unexpectedly"),
        Err(_) => panic!("timed out waiting for the next item"),
    }
}

/// Next `n` successful items of `stream`.
pub async fn take_ok<T, St>(stream: &mut St, n: usize) -> Vec<T>
where
    St: Stream<Item = Result<T, ComponentError>> + Unpin,
{
    let mut items = Vec::with_capacity(n);
    for _ in 0..n {
        match next_item(stream).await {
            Ok(item) => items.push(item),
            Err(err) => panic!("unexpected failure: {err}"),
        }
    }
    items
}

/// First error yielded by `stream`, skipping successful items.
pub async fn first_error<T, St>(stream: &mut St) -> ComponentError
where
    St: Stream<Item = Result<T, ComponentError>> + Unpin,
{
    loop {
        if let Err(err) = next_item(stream).await {
            return err;
        }
    }
}

/// Poll `condition` until it holds, panicking after [`STEP_TIMEOUT`].
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    if tokio::time::timeout(STEP_TIMEOUT, wait).await.is_err() {
        panic!("condition not reached in time");
    }
}
