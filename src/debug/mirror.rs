//! Debug mirror: runs a component while reporting every snapshot to a remote
//! debugger and accepting its directives.
//!
//! A session goes through three phases:
//! 1. open the transport (failure ends the run with a connection error before
//!    anything is sent),
//! 2. race the local initializer against an `ApplyState` the debugger pushes
//!    before the run starts; whichever arrives first becomes the initial
//!    snapshot,
//! 3. run the engine, forwarding snapshots to the debugger on a separate task
//!    and splicing decoded directives into the engine's input.

use std::future::Future;
use std::sync::Arc;

use futures::{stream, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::codec::ComponentCodec;
use super::protocol::{ClientDirective, ClientEnvelope, ComponentId, ServerEnvelope};
use super::settings::DebugSettings;
use super::transport::{Connection, FrameSink, FrameSource, TransportError};
use crate::component::engine::{self, Input, SnapshotResult, SnapshotStream};
use crate::component::{ComponentError, Env, Initial, Payload, Snapshot};

type InputResult<M, S, C> = Result<Input<M, S, C>, ComponentError>;

/// Start a mirrored run fed by `messages`.
pub fn attach<M, S, C, I>(
    env: &Env<M, S, C>,
    settings: &DebugSettings<M, S, C>,
    messages: I,
) -> SnapshotStream<M, S, C>
where
    M: Payload,
    S: Payload,
    C: Payload,
    I: Stream<Item = M> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let session = Session {
        env: env.clone(),
        settings: settings.clone(),
        tx,
    };
    let task = tokio::spawn(session.run(messages));
    SnapshotStream::from_parts(rx, task)
}

struct Session<M, S, C> {
    env: Env<M, S, C>,
    settings: DebugSettings<M, S, C>,
    tx: mpsc::Sender<SnapshotResult<M, S, C>>,
}

impl<M: Payload, S: Payload, C: Payload> Session<M, S, C> {
    async fn run<I>(self, messages: I)
    where
        I: Stream<Item = M> + Send + 'static,
    {
        let component_id = self.settings.component_id.clone();
        let url = self.settings.url.clone();

        let Connection { sink, source } = match self.settings.transport.connect(&url).await {
            Ok(connection) => connection,
            Err(err) => {
                tracing::error!(%component_id, %url, error = %err, "Failed to open debug session");
                let _ = self.tx.send(Err(err.into())).await;
                return;
            }
        };
        tracing::debug!(%component_id, %url, "Debug session opened");

        // Both helpers are aborted if this task is cancelled.
        let mut tasks = JoinSet::new();
        let (faults_tx, mut faults_rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let (offer_tx, offer_rx) = oneshot::channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let receiver = tasks.spawn(receive_directives(
            source,
            self.settings.codec.clone(),
            component_id.clone(),
            offer_tx,
            remote_tx,
            faults_tx.clone(),
        ));
        tasks.spawn(forward_notifications(
            sink,
            self.settings.codec.clone(),
            component_id.clone(),
            outgoing_rx,
            faults_tx,
        ));

        let start = race_initial(engine::initialize(&self.env), offer_rx);
        let inputs = stream::select(
            messages.map(|message| Ok(Input::Message(message))),
            UnboundedReceiverStream::new(remote_rx),
        );
        let mut snapshots = engine::run(&self.env, start, inputs);

        loop {
            tokio::select! {
                next = snapshots.next() => match next {
                    Some(Ok(snapshot)) => {
                        // Forwarding never waits on the debugger.
                        let _ = outgoing_tx.send(snapshot.clone());
                        if self.tx.send(Ok(snapshot)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        let _ = self.tx.send(Err(err)).await;
                        break;
                    }
                    None => break,
                },
                Some(err) = faults_rx.recv() => {
                    tracing::error!(%component_id, error = %err, "Debug session failed");
                    let _ = self.tx.send(Err(err)).await;
                    break;
                }
            }
        }

        // Let pending notifications drain and the sink close before leaving.
        drop(snapshots);
        drop(outgoing_tx);
        receiver.abort();
        while tasks.join_next().await.is_some() {}
        tracing::debug!(%component_id, "Debug session closed");
    }
}

/// First of: the local initializer's result, or a state offered by the
/// debugger before the run started.
async fn race_initial<S, C, F>(
    local: F,
    remote: oneshot::Receiver<Initial<S, C>>,
) -> Result<Initial<S, C>, ComponentError>
where
    F: Future<Output = Result<Initial<S, C>, ComponentError>>,
{
    tokio::select! {
        local = local => {
            tracing::debug!("Starting from local initial state");
            local
        }
        Ok(remote) = remote => {
            tracing::debug!("Starting from debugger-supplied state");
            Ok(remote)
        }
    }
}

async fn receive_directives<M, S, C>(
    mut source: Box<dyn FrameSource>,
    codec: Arc<dyn ComponentCodec<M, S, C>>,
    component_id: ComponentId,
    offer: oneshot::Sender<Initial<S, C>>,
    inputs: mpsc::UnboundedSender<InputResult<M, S, C>>,
    faults: mpsc::UnboundedSender<ComponentError>,
) where
    M: Payload,
    S: Payload,
    C: Payload,
{
    let mut offer = Some(offer);
    loop {
        let frame = match source.receive().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                let _ = faults.send(TransportError::Closed.into());
                return;
            }
            Err(err) => {
                let _ = faults.send(err.into());
                return;
            }
        };

        let input = match decode_frame(codec.as_ref(), &component_id, &frame) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(err) => {
                let _ = inputs.send(Err(err));
                return;
            }
        };

        let input = match input {
            Input::Reset(initial) => match offer.take() {
                Some(tx) if !tx.is_closed() => match tx.send(initial) {
                    Ok(()) => continue,
                    Err(initial) => Input::Reset(initial),
                },
                _ => Input::Reset(initial),
            },
            message => message,
        };

        if inputs.send(Ok(input)).is_err() {
            return;
        }
    }
}

/// Decode one incoming frame. `Ok(None)` for frames addressed to another
/// component.
fn decode_frame<M, S, C>(
    codec: &dyn ComponentCodec<M, S, C>,
    component_id: &ComponentId,
    frame: &str,
) -> Result<Option<Input<M, S, C>>, ComponentError> {
    let decode_error = |reason: String| ComponentError::Decode {
        component_id: component_id.to_string(),
        reason,
    };

    let envelope = ClientEnvelope::from_frame(frame).map_err(|e| decode_error(e.to_string()))?;
    if &envelope.component_id != component_id {
        tracing::trace!(
            target_component = %envelope.component_id,
            "Ignoring directive for another component"
        );
        return Ok(None);
    }

    let input = match envelope.payload {
        ClientDirective::ApplyMessage { message } => Input::Message(
            codec
                .decode_message(message)
                .map_err(|e| decode_error(e.to_string()))?,
        ),
        ClientDirective::ApplyState { state } => Input::Reset(Initial::new(
            codec
                .decode_state(state)
                .map_err(|e| decode_error(e.to_string()))?,
        )),
    };
    Ok(Some(input))
}

async fn forward_notifications<M, S, C>(
    mut sink: Box<dyn FrameSink>,
    codec: Arc<dyn ComponentCodec<M, S, C>>,
    component_id: ComponentId,
    mut snapshots: mpsc::UnboundedReceiver<Snapshot<M, S, C>>,
    faults: mpsc::UnboundedSender<ComponentError>,
) where
    M: Payload,
    S: Payload,
    C: Payload,
{
    while let Some(snapshot) = snapshots.recv().await {
        let frame = match encode_snapshot(codec.as_ref(), &component_id, &snapshot) {
            Ok(frame) => frame,
            Err(err) => {
                let _ = faults.send(err);
                return;
            }
        };
        if let Err(err) = sink.send(frame).await {
            let _ = faults.send(err.into());
            return;
        }
    }

    if let Err(err) = sink.close().await {
        tracing::debug!(%component_id, error = %err, "Debug session did not close cleanly");
    }
}

fn encode_snapshot<M, S, C>(
    codec: &dyn ComponentCodec<M, S, C>,
    component_id: &ComponentId,
    snapshot: &Snapshot<M, S, C>,
) -> Result<String, ComponentError> {
    let notification = codec
        .notification(snapshot)
        .map_err(|e| ComponentError::Encode(e.to_string()))?;
    ServerEnvelope::new(component_id.clone(), notification)
        .to_frame()
        .map_err(|e| ComponentError::Encode(e.to_string()))
}
