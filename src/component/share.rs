//! Hot, ref-counted sharing of a single stream execution.
//!
//! [`Shared`] starts its source lazily on the first subscription and fans
//! every item out to all active [`Subscription`]s, each through its own
//! bounded channel. The driver waits for room in every channel before pulling
//! the next item, so all subscribers see the same sequence and the slowest one
//! paces the source. A subscriber joining mid-run first receives the most
//! recent item. When the last subscriber detaches the execution is torn down
//! according to [`ShareOptions`], and the next subscriber starts a fresh one.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::join_all;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_BUFFER: usize = 64;

/// What happens to the shared execution once nobody is subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    /// Abort the execution as soon as the last subscriber detaches.
    Immediately,
    /// Keep the execution alive for `grace` after the last subscriber
    /// detaches; a subscriber arriving within the grace period reuses it.
    WhileSubscribed { grace: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareOptions {
    pub stop: StopPolicy,
    /// Items a subscriber may fall behind before the source is held back.
    pub buffer: usize,
}

impl ShareOptions {
    pub fn immediately() -> Self {
        Self {
            stop: StopPolicy::Immediately,
            buffer: DEFAULT_BUFFER,
        }
    }

    pub fn while_subscribed(grace: Duration) -> Self {
        Self {
            stop: StopPolicy::WhileSubscribed { grace },
            buffer: DEFAULT_BUFFER,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }
}

impl Default for ShareOptions {
    fn default() -> Self {
        Self::immediately()
    }
}

#[derive(Debug, Clone)]
enum Event<T, E> {
    Item(T),
    Failed(E),
}

type EventSender<T, E> = mpsc::Sender<Event<T, E>>;

type Factory<T, E, X> = Box<dyn Fn() -> (BoxStream<'static, Result<T, E>>, X) + Send + Sync>;

struct Execution<T, E, X> {
    id: u64,
    /// Value handed out with every subscription to this execution.
    context: X,
    subscribers: Vec<(u64, EventSender<T, E>)>,
    latest: Option<T>,
    driver: JoinHandle<()>,
}

impl<T, E, X> Execution<T, E, X> {
    fn senders(&self) -> Vec<EventSender<T, E>> {
        self.subscribers.iter().map(|(_, tx)| tx.clone()).collect()
    }
}

struct ShareState<T, E, X> {
    subscribers: usize,
    next_subscriber: u64,
    /// Bumped each time the subscriber count drops to zero, so a stale grace
    /// timer can tell it has been superseded.
    idle_generation: u64,
    execution: Option<Execution<T, E, X>>,
}

struct Inner<T, E, X> {
    factory: Factory<T, E, X>,
    options: ShareOptions,
    scope: CancellationToken,
    executions: AtomicU64,
    state: Mutex<ShareState<T, E, X>>,
}

/// Handle to a lazily started, shared stream execution.
///
/// `X` is a per-execution context produced alongside the source, e.g. the
/// sender feeding that execution's input.
pub struct Shared<T, E, X = ()> {
    inner: Arc<Inner<T, E, X>>,
}

impl<T, E, X> Clone for Shared<T, E, X> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Shared<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new<F, St>(factory: F, options: ShareOptions) -> Self
    where
        F: Fn() -> St + Send + Sync + 'static,
        St: Stream<Item = Result<T, E>> + Send + 'static,
    {
        Self::new_in(factory, options, CancellationToken::new())
    }

    /// Like [`Shared::new`], but every execution also ends when `scope` is
    /// cancelled.
    pub fn new_in<F, St>(factory: F, options: ShareOptions, scope: CancellationToken) -> Self
    where
        F: Fn() -> St + Send + Sync + 'static,
        St: Stream<Item = Result<T, E>> + Send + 'static,
    {
        Self::with_context(move || (factory(), ()), options, scope)
    }
}

impl<T, E, X> Shared<T, E, X>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    X: Clone + Send + Sync + 'static,
{
    /// Share a source whose factory also yields a context value for the
    /// execution it starts. Subscribers read it through
    /// [`Subscription::context`].
    pub fn with_context<F, St>(factory: F, options: ShareOptions, scope: CancellationToken) -> Self
    where
        F: Fn() -> (St, X) + Send + Sync + 'static,
        St: Stream<Item = Result<T, E>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                factory: Box::new(move || {
                    let (source, context) = factory();
                    (source.boxed(), context)
                }),
                options,
                scope,
                executions: AtomicU64::new(0),
                state: Mutex::new(ShareState {
                    subscribers: 0,
                    next_subscriber: 0,
                    idle_generation: 0,
                    execution: None,
                }),
            }),
        }
    }

    /// Attach a new subscriber, starting the source if it is not running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self) -> Subscription<T, E, X> {
        let mut state = self.inner.state.lock();
        state.subscribers += 1;
        state.next_subscriber += 1;
        let id = state.next_subscriber;

        let (tx, rx) = mpsc::channel(self.inner.options.buffer);
        let execution = match state.execution.take() {
            Some(execution) => execution,
            None => self.inner.start(),
        };
        // The replay value and the registration are taken under one lock, so
        // an item is either replayed or delivered live, never both.
        let replay = execution.latest.clone();
        let context = execution.context.clone();
        let execution = state.execution.insert(execution);
        execution.subscribers.push((id, tx));

        tracing::trace!(subscribers = state.subscribers, "Subscriber attached");

        Subscription {
            replay,
            events: rx,
            context,
            scope: self.inner.scope.clone(),
            done: false,
            _guard: SubscriberGuard {
                id,
                inner: self.inner.clone(),
            },
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().subscribers
    }

    /// Whether an execution is currently running.
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().execution.is_some()
    }

    /// Number of executions started so far.
    pub fn executions_started(&self) -> u64 {
        self.inner.executions.load(Ordering::SeqCst)
    }
}

impl<T, E, X> Inner<T, E, X>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    X: Clone + Send + Sync + 'static,
{
    /// Spawn a new driver. Caller holds the state lock.
    fn start(self: &Arc<Self>) -> Execution<T, E, X> {
        let id = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
        let (source, context) = (self.factory)();
        let driver = tokio::spawn(drive(self.clone(), id, source));
        tracing::debug!(execution = id, "Started shared execution");
        Execution {
            id,
            context,
            subscribers: Vec::new(),
            latest: None,
            driver,
        }
    }

    fn release(self: &Arc<Self>, subscriber: u64) {
        let mut state = self.state.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        if let Some(execution) = state.execution.as_mut() {
            execution.subscribers.retain(|(id, _)| *id != subscriber);
        }
        tracing::trace!(subscribers = state.subscribers, "Subscriber detached");
        if state.subscribers > 0 {
            return;
        }
        state.idle_generation += 1;

        if let StopPolicy::WhileSubscribed { grace } = self.options.stop {
            if !grace.is_zero() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let inner = self.clone();
                    let generation = state.idle_generation;
                    handle.spawn(async move {
                        tokio::time::sleep(grace).await;
                        inner.stop_if_idle(generation);
                    });
                    return;
                }
            }
        }

        stop(&mut state);
    }

    fn stop_if_idle(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.subscribers == 0 && state.idle_generation == generation {
            stop(&mut state);
        }
    }

    /// Record `item` as the replay value of execution `id` and return the
    /// subscribers it must reach, or `None` if the execution was retired.
    fn publish(&self, id: u64, item: &T) -> Option<Vec<EventSender<T, E>>> {
        let mut state = self.state.lock();
        let execution = state.execution.as_mut().filter(|e| e.id == id)?;
        execution.latest = Some(item.clone());
        Some(execution.senders())
    }

    /// Retire execution `id` after its source ended, returning the
    /// subscribers still attached to it.
    fn finish(&self, id: u64) -> Vec<EventSender<T, E>> {
        let mut state = self.state.lock();
        if !state.execution.as_ref().is_some_and(|e| e.id == id) {
            return Vec::new();
        }
        match state.execution.take() {
            Some(execution) => execution.subscribers.into_iter().map(|(_, tx)| tx).collect(),
            None => Vec::new(),
        }
    }
}

fn stop<T, E, X>(state: &mut ShareState<T, E, X>) {
    if let Some(execution) = state.execution.take() {
        execution.driver.abort();
        tracing::debug!(execution = execution.id, "Stopped idle shared execution");
    }
}

/// Send `event` to every target, waiting until each has room. Detached
/// subscribers are skipped.
async fn deliver<T: Clone, E: Clone>(targets: &[EventSender<T, E>], event: Event<T, E>) {
    let _ = join_all(targets.iter().map(|tx| tx.send(event.clone()))).await;
}

async fn drive<T, E, X>(
    inner: Arc<Inner<T, E, X>>,
    id: u64,
    mut source: BoxStream<'static, Result<T, E>>,
) where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    X: Clone + Send + Sync + 'static,
{
    loop {
        let next = tokio::select! {
            _ = inner.scope.cancelled() => None,
            next = source.next() => next,
        };

        let (targets, event, last) = match next {
            Some(Ok(item)) => match inner.publish(id, &item) {
                Some(targets) => (targets, Event::Item(item), false),
                None => return,
            },
            Some(Err(err)) => (inner.finish(id), Event::Failed(err), true),
            None => break,
        };
        tokio::select! {
            _ = inner.scope.cancelled() => break,
            _ = deliver(&targets, event) => {}
        }
        if last {
            return;
        }
    }

    if inner.scope.is_cancelled() {
        tracing::debug!(execution = id, "Scope cancelled, ending shared execution");
    }
    // Dropping the senders ends every subscription.
    inner.finish(id);
}

struct SubscriberGuard<T, E, X>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    X: Clone + Send + Sync + 'static,
{
    id: u64,
    inner: Arc<Inner<T, E, X>>,
}

impl<T, E, X> Drop for SubscriberGuard<T, E, X>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    X: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.inner.release(self.id);
    }
}

/// One subscriber's view of a [`Shared`] execution.
///
/// Yields the replayed latest item (if any), then live items. A source
/// failure is yielded once and ends the subscription.
pub struct Subscription<T, E, X = ()>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    X: Clone + Send + Sync + 'static,
{
    replay: Option<T>,
    events: mpsc::Receiver<Event<T, E>>,
    context: X,
    scope: CancellationToken,
    done: bool,
    _guard: SubscriberGuard<T, E, X>,
}

impl<T, E, X> Subscription<T, E, X>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    X: Clone + Send + Sync + 'static,
{
    /// Context of the execution this subscription is attached to.
    pub fn context(&self) -> &X {
        &self.context
    }
}

// Items are never pinned in place.
impl<T, E, X> Unpin for Subscription<T, E, X>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    X: Clone + Send + Sync + 'static,
{
}

impl<T, E, X> Stream for Subscription<T, E, X>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    X: Clone + Send + Sync + 'static,
{
    type Item = Result<T, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done || this.scope.is_cancelled() {
            return Poll::Ready(None);
        }
        if let Some(item) = this.replay.take() {
            return Poll::Ready(Some(Ok(item)));
        }

        match this.events.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Event::Item(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Event::Failed(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
        }
    }
}
