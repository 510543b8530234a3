//! Capabilities a component is assembled from.
//!
//! The application supplies three capabilities: an [`Initializer`] producing
//! the starting snapshot, a pure [`Updater`] and an effectful [`Resolver`].
//! They are collected once into an [`Env`] that the engine borrows for the
//! lifetime of a run.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use super::snapshot::{Initial, Snapshot, Update};

/// Bound shared by every message, state and command type a component handles.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Payload for T {}

/// Pure transition function `(message, state) -> (state, commands)`.
///
/// Implementations must not perform side effects; anything effectful belongs
/// in a command handed to the [`Resolver`].
pub trait Updater<M, S, C>: Send + Sync {
    fn update(&self, message: &M, state: &S) -> anyhow::Result<Update<S, C>>;
}

impl<M, S, C, F> Updater<M, S, C> for F
where
    F: Fn(&M, &S) -> anyhow::Result<Update<S, C>> + Send + Sync,
{
    fn update(&self, message: &M, state: &S) -> anyhow::Result<Update<S, C>> {
        self(message, state)
    }
}

/// Effectful interpreter turning one command into zero or more messages.
///
/// Sibling commands are resolved on separate tasks, so implementations must
/// tolerate concurrent calls.
#[async_trait]
pub trait Resolver<C, M>: Send + Sync {
    async fn resolve(&self, command: C) -> anyhow::Result<Vec<M>>;
}

/// Resolver for components that never emit commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

#[async_trait]
impl<C, M> Resolver<C, M> for NoopResolver
where
    C: Send + 'static,
    M: Send + 'static,
{
    async fn resolve(&self, _command: C) -> anyhow::Result<Vec<M>> {
        Ok(Vec::new())
    }
}

/// Produces the starting snapshot of a run.
#[async_trait]
pub trait Initializer<S, C>: Send + Sync {
    async fn initialize(&self) -> anyhow::Result<Initial<S, C>>;
}

#[async_trait]
impl<S: Payload, C: Payload> Initializer<S, C> for Initial<S, C> {
    async fn initialize(&self) -> anyhow::Result<Initial<S, C>> {
        Ok(self.clone())
    }
}

/// Observes every snapshot the writer emits, in emission order.
pub trait Interceptor<M, S, C>: Send + Sync {
    fn intercept(&self, snapshot: &Snapshot<M, S, C>);
}

/// Logs each snapshot at debug level.
#[derive(Debug, Clone)]
pub struct TracingInterceptor {
    name: String,
}

impl TracingInterceptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl<M: Debug, S: Debug, C: Debug> Interceptor<M, S, C> for TracingInterceptor {
    fn intercept(&self, snapshot: &Snapshot<M, S, C>) {
        match snapshot {
            Snapshot::Initial(initial) => tracing::debug!(
                component = %self.name,
                state = ?initial.state,
                commands = ?initial.commands,
                "Initial snapshot"
            ),
            Snapshot::Regular(regular) => tracing::debug!(
                component = %self.name,
                message = ?regular.message,
                previous_state = ?regular.previous_state,
                current_state = ?regular.current_state,
                commands = ?regular.commands,
                "Regular snapshot"
            ),
        }
    }
}

/// Dependencies of one component, constructed once and shared by reference.
pub struct Env<M, S, C> {
    pub initializer: Arc<dyn Initializer<S, C>>,
    pub resolver: Arc<dyn Resolver<C, M>>,
    pub updater: Arc<dyn Updater<M, S, C>>,
    pub interceptors: Vec<Arc<dyn Interceptor<M, S, C>>>,
}

impl<M, S, C> Env<M, S, C> {
    pub fn new(
        initializer: impl Initializer<S, C> + 'static,
        resolver: impl Resolver<C, M> + 'static,
        updater: impl Updater<M, S, C> + 'static,
    ) -> Self {
        Self {
            initializer: Arc::new(initializer),
            resolver: Arc::new(resolver),
            updater: Arc::new(updater),
            interceptors: Vec::new(),
        }
    }

    pub fn with_interceptor(mut self, interceptor: impl Interceptor<M, S, C> + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Replace the initializer, keeping the other capabilities.
    pub fn with_initializer(mut self, initializer: impl Initializer<S, C> + 'static) -> Self {
        self.initializer = Arc::new(initializer);
        self
    }

    pub(crate) fn intercept(&self, snapshot: &Snapshot<M, S, C>) {
        for interceptor in &self.interceptors {
            interceptor.intercept(snapshot);
        }
    }
}

impl<M, S, C> Clone for Env<M, S, C> {
    fn clone(&self) -> Self {
        Self {
            initializer: self.initializer.clone(),
            resolver: self.resolver.clone(),
            updater: self.updater.clone(),
            interceptors: self.interceptors.clone(),
        }
    }
}
