mod settings;

pub use settings::{Config, ConfigError, DebugConfig, ShareConfig, StopMode, EXAMPLE_CONFIG};
