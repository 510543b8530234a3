//! Step engine and command drain.
//!
//! A run is driven by exactly one writer task. The writer applies the updater
//! to one message at a time and, after every snapshot, drains the commands it
//! produced to a fixed point before reading the next external input. Sibling
//! commands are resolved concurrently on a [`JoinSet`]; their messages are
//! applied in resolution-completion order.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use super::env::{Env, Payload};
use super::error::ComponentError;
use super::snapshot::{Initial, Regular, Snapshot};

/// Item yielded by a snapshot stream.
pub type SnapshotResult<M, S, C> = Result<Snapshot<M, S, C>, ComponentError>;

/// External input accepted by the writer at a quiescent point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<M, S, C> {
    /// Ordinary message, applied through the updater.
    Message(M),

    /// Forced state: bypasses the updater and restarts from a new initial
    /// snapshot.
    Reset(Initial<S, C>),
}

/// Ordered snapshots of one run.
///
/// Dropping the stream aborts the writer task together with any in-flight
/// resolver tasks.
pub struct SnapshotStream<M, S, C> {
    rx: mpsc::Receiver<SnapshotResult<M, S, C>>,
    task: JoinHandle<()>,
}

impl<M, S, C> SnapshotStream<M, S, C> {
    pub(crate) fn from_parts(rx: mpsc::Receiver<SnapshotResult<M, S, C>>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }
}

impl<M, S, C> Stream for SnapshotStream<M, S, C> {
    type Item = SnapshotResult<M, S, C>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<M, S, C> Drop for SnapshotStream<M, S, C> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a run from `start`, then apply `inputs` one at a time.
///
/// The run ends when `inputs` is exhausted or on the first fault; a fault is
/// yielded as the final item.
pub fn run<M, S, C, F, I>(env: &Env<M, S, C>, start: F, inputs: I) -> SnapshotStream<M, S, C>
where
    M: Payload,
    S: Payload,
    C: Payload,
    F: Future<Output = Result<Initial<S, C>, ComponentError>> + Send + 'static,
    I: Stream<Item = Result<Input<M, S, C>, ComponentError>> + Send + 'static,
{
    // Rendezvous-sized handoff: the writer never runs ahead of its consumer by
    // more than one snapshot.
    let (tx, rx) = mpsc::channel(1);
    let writer = Writer {
        env: env.clone(),
        tx,
    };
    let task = tokio::spawn(writer.run(start, inputs));
    SnapshotStream::from_parts(rx, task)
}

/// Run starting from the env's own initializer with plain messages as input.
pub fn run_local<M, S, C, I>(env: &Env<M, S, C>, messages: I) -> SnapshotStream<M, S, C>
where
    M: Payload,
    S: Payload,
    C: Payload,
    I: Stream<Item = M> + Send + 'static,
{
    let start = initialize(env);
    run(env, start, messages.map(|message| Ok(Input::Message(message))))
}

/// Future resolving the env's initializer into a starting snapshot.
pub fn initialize<M, S, C>(
    env: &Env<M, S, C>,
) -> impl Future<Output = Result<Initial<S, C>, ComponentError>> + Send + 'static
where
    S: Payload,
    C: Payload,
{
    let initializer = env.initializer.clone();
    async move {
        initializer
            .initialize()
            .await
            .map_err(ComponentError::initialize)
    }
}

/// Why the writer stopped early.
enum Halt {
    /// The snapshot consumer went away.
    Closed,
    Fault(ComponentError),
}

impl From<ComponentError> for Halt {
    fn from(err: ComponentError) -> Self {
        Halt::Fault(err)
    }
}

/// Commands of one snapshot that are still being resolved.
struct Frame<M> {
    pending: JoinSet<anyhow::Result<Vec<M>>>,
    ready: VecDeque<M>,
}

struct Writer<M, S, C> {
    env: Env<M, S, C>,
    tx: mpsc::Sender<SnapshotResult<M, S, C>>,
}

impl<M: Payload, S: Payload, C: Payload> Writer<M, S, C> {
    async fn run<F, I>(self, start: F, inputs: I)
    where
        F: Future<Output = Result<Initial<S, C>, ComponentError>>,
        I: Stream<Item = Result<Input<M, S, C>, ComponentError>>,
    {
        match self.drive(start, inputs).await {
            Ok(()) => tracing::debug!("Component input closed, run finished"),
            Err(Halt::Closed) => tracing::debug!("Snapshot consumer dropped, stopping run"),
            Err(Halt::Fault(err)) => {
                tracing::error!(error = %err, "Component run failed");
                let _ = self.tx.send(Err(err)).await;
            }
        }
    }

    async fn drive<F, I>(&self, start: F, inputs: I) -> Result<(), Halt>
    where
        F: Future<Output = Result<Initial<S, C>, ComponentError>>,
        I: Stream<Item = Result<Input<M, S, C>, ComponentError>>,
    {
        let initial = start.await?;
        let mut state = self.begin(initial).await?;

        futures::pin_mut!(inputs);
        while let Some(input) = inputs.next().await {
            state = match input? {
                Input::Message(message) => {
                    let (next, commands) = self.apply(message, state).await?;
                    self.drain(next, commands).await?
                }
                Input::Reset(initial) => self.begin(initial).await?,
            };
        }

        Ok(())
    }

    async fn begin(&self, initial: Initial<S, C>) -> Result<S, Halt> {
        let state = initial.state.clone();
        let commands = initial.commands.clone();
        self.emit(Snapshot::Initial(initial)).await?;
        self.drain(state, commands).await
    }

    async fn apply(&self, message: M, state: S) -> Result<(S, Vec<C>), Halt> {
        let update = self
            .env
            .updater
            .update(&message, &state)
            .map_err(ComponentError::update)?;

        let regular = Regular {
            message,
            previous_state: state,
            current_state: update.state.clone(),
            commands: update.commands.clone(),
        };
        self.emit(Snapshot::Regular(regular)).await?;

        Ok((update.state, update.commands))
    }

    /// Resolve `commands` and everything they transitively produce.
    ///
    /// Frames form a stack: a message applied from frame `n` pushes frame
    /// `n + 1` for its own commands, which must empty before frame `n`
    /// continues.
    async fn drain(&self, mut state: S, commands: Vec<C>) -> Result<S, Halt> {
        let mut frames = Vec::new();
        if !commands.is_empty() {
            frames.push(self.resolve_all(commands));
        }

        while let Some(frame) = frames.last_mut() {
            if let Some(message) = frame.ready.pop_front() {
                let (next, commands) = self.apply(message, state).await?;
                state = next;
                if !commands.is_empty() {
                    frames.push(self.resolve_all(commands));
                }
                continue;
            }

            let joined = frame.pending.join_next().await;
            match joined {
                Some(Ok(Ok(messages))) => frame.ready.extend(messages),
                Some(Ok(Err(err))) => return Err(ComponentError::resolve(err).into()),
                Some(Err(join_err)) => {
                    return Err(ComponentError::Resolve(format!(
                        "resolver task failed: {join_err}"
                    ))
                    .into())
                }
                None => {
                    frames.pop();
                }
            }
        }

        Ok(state)
    }

    fn resolve_all(&self, commands: Vec<C>) -> Frame<M> {
        let mut pending = JoinSet::new();
        for command in commands {
            let resolver = self.env.resolver.clone();
            pending.spawn(async move { resolver.resolve(command).await });
        }
        Frame {
            pending,
            ready: VecDeque::new(),
        }
    }

    async fn emit(&self, snapshot: Snapshot<M, S, C>) -> Result<(), Halt> {
        self.env.intercept(&snapshot);
        tracing::trace!(kind = snapshot.kind(), "Emitting snapshot");
        self.tx.send(Ok(snapshot)).await.map_err(|_| Halt::Closed)
    }
}
