//! Unidirectional component runtime.
//!
//! A component is assembled from an [`Env`] and run by the [`engine`]: one
//! writer task applies messages, drains commands to a fixed point and emits
//! [`Snapshot`]s. [`Component`] shares that run between any number of
//! observers through [`Shared`].

pub mod engine;
pub mod env;
pub mod error;
pub mod runtime;
pub mod share;
pub mod snapshot;

pub use engine::{Input, SnapshotResult, SnapshotStream};
pub use env::{
    Env, Initializer, Interceptor, NoopResolver, Payload, Resolver, TracingInterceptor, Updater,
};
pub use error::ComponentError;
pub use runtime::{Component, ComponentSettings, ComponentStream};
pub use share::{ShareOptions, Shared, StopPolicy, Subscription};
pub use snapshot::{Initial, Regular, Snapshot, Update};
