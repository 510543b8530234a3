//! The public entry point: a component turns message streams into a shared
//! stream of states.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::engine::{self, SnapshotResult};
use super::env::{Env, Payload};
use super::error::ComponentError;
use super::share::{ShareOptions, Shared};
use super::snapshot::Snapshot;
use crate::debug::{mirror, DebugSettings};

/// Optional knobs for [`Component::with_settings`].
pub struct ComponentSettings<M, S, C> {
    pub share: ShareOptions,
    /// Owning scope; cancelling it ends every run of the component.
    pub scope: CancellationToken,
    /// Mirror runs to a remote debugger when set.
    pub debug: Option<DebugSettings<M, S, C>>,
}

impl<M, S, C> ComponentSettings<M, S, C> {
    pub fn with_share_options(mut self, share: ShareOptions) -> Self {
        self.share = share;
        self
    }

    pub fn with_scope(mut self, scope: CancellationToken) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_debugger(mut self, debug: DebugSettings<M, S, C>) -> Self {
        self.debug = Some(debug);
        self
    }
}

impl<M, S, C> Default for ComponentSettings<M, S, C> {
    fn default() -> Self {
        Self {
            share: ShareOptions::default(),
            scope: CancellationToken::new(),
            debug: None,
        }
    }
}

/// A running unidirectional loop shared by any number of observers.
///
/// Every call to [`Component::states`] (or [`Component::snapshots`]) subscribes
/// to the same shared run and feeds its message stream into that run's input
/// queue, so the loop executes once no matter how many observers are attached.
/// Each run owns its queue: messages still queued when a run stops are dropped
/// with it.
pub struct Component<M, S, C> {
    shared: Shared<Snapshot<M, S, C>, ComponentError, mpsc::Sender<M>>,
    scope: CancellationToken,
}

impl<M: Payload, S: Payload, C: Payload> Component<M, S, C> {
    pub fn new(env: Env<M, S, C>) -> Self {
        Self::with_settings(env, ComponentSettings::default())
    }

    pub fn with_settings(env: Env<M, S, C>, settings: ComponentSettings<M, S, C>) -> Self {
        let ComponentSettings {
            share,
            scope,
            debug,
        } = settings;

        let factory = move || {
            // Capacity one: senders hand messages over one at a time, as the
            // writer reaches each quiescent point.
            let (input_tx, input_rx) = mpsc::channel(1);
            let messages = ReceiverStream::new(input_rx);
            let run: BoxStream<'static, SnapshotResult<M, S, C>> = match &debug {
                Some(settings) => mirror::attach(&env, settings, messages).boxed(),
                None => engine::run_local(&env, messages).boxed(),
            };
            (run, input_tx)
        };

        Self {
            shared: Shared::with_context(factory, share, scope.clone()),
            scope,
        }
    }

    /// Subscribe to the state stream, feeding `messages` into the component.
    pub fn states<I>(&self, messages: I) -> ComponentStream<S>
    where
        I: Stream<Item = M> + Send + 'static,
    {
        let subscription = self.shared.subscribe();
        let pump = self.pump(subscription.context().clone(), messages);
        ComponentStream {
            inner: subscription
                .map(|result| result.map(Snapshot::into_current_state))
                .boxed(),
            pump,
        }
    }

    /// Like [`Component::states`], but yields full snapshots.
    pub fn snapshots<I>(&self, messages: I) -> ComponentStream<Snapshot<M, S, C>>
    where
        I: Stream<Item = M> + Send + 'static,
    {
        let subscription = self.shared.subscribe();
        let pump = self.pump(subscription.context().clone(), messages);
        ComponentStream {
            inner: subscription.boxed(),
            pump,
        }
    }

    /// Whether a run is currently executing.
    pub fn is_running(&self) -> bool {
        self.shared.is_active()
    }

    pub fn observers(&self) -> usize {
        self.shared.subscriber_count()
    }

    pub fn runs_started(&self) -> u64 {
        self.shared.executions_started()
    }

    /// Cancel the owning scope, ending the current run for every observer.
    pub fn cancel(&self) {
        self.scope.cancel();
    }

    /// Forward `messages` into the run the observer attached to. Stops once
    /// that run is gone.
    fn pump<I>(&self, input_tx: mpsc::Sender<M>, messages: I) -> JoinHandle<()>
    where
        I: Stream<Item = M> + Send + 'static,
    {
        let scope = self.scope.clone();
        tokio::spawn(async move {
            futures::pin_mut!(messages);
            loop {
                let message = tokio::select! {
                    _ = scope.cancelled() => break,
                    message = messages.next() => message,
                };
                let Some(message) = message else { break };
                if input_tx.send(message).await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Stream handed to one observer. Dropping it detaches the observer and stops
/// forwarding its messages.
pub struct ComponentStream<T> {
    inner: BoxStream<'static, Result<T, ComponentError>>,
    pump: JoinHandle<()>,
}

impl<T> Stream for ComponentStream<T> {
    type Item = Result<T, ComponentError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl<T> Drop for ComponentStream<T> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
