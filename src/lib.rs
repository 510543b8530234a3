pub mod component;
pub mod config;
pub mod debug;
pub mod demo;
pub mod util;

pub use component::{
    Component, ComponentError, ComponentSettings, ComponentStream, Env, Initial, Initializer,
    Interceptor, NoopResolver, Regular, Resolver, ShareOptions, Snapshot, StopPolicy, Update,
    Updater,
};
pub use config::Config;
pub use debug::{ComponentId, DebugSettings, SerdeJsonCodec};
