use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::component::ShareOptions;
use crate::debug::{ComponentId, DEFAULT_DEBUG_URL};
use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Remote debugger settings
    pub debug: DebugConfig,
    /// Sharing policy for component runs
    pub share: ShareConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugConfig {
    pub enabled: bool,
    pub url: String,
    pub component_id: ComponentId,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StopMode {
    Immediately,
    WhileSubscribed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareConfig {
    pub stop: StopMode,
    pub grace: Duration,
    pub buffer: usize,
}

impl ShareConfig {
    pub fn options(&self) -> ShareOptions {
        let options = match self.stop {
            StopMode::Immediately => ShareOptions::immediately(),
            StopMode::WhileSubscribed => ShareOptions::while_subscribed(self.grace),
        };
        options.with_buffer(self.buffer)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlDebugConfig {
    pub enabled: Option<bool>,
    pub url: Option<String>,
    pub component_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlShareConfig {
    pub stop: Option<StopMode>,
    pub grace_ms: Option<u64>,
    pub buffer: Option<usize>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Debugger configuration
    pub debug: Option<TomlDebugConfig>,
    /// Sharing configuration
    pub share: Option<TomlShareConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: DebugConfig {
                enabled: false,
                url: DEFAULT_DEBUG_URL.to_string(),
                component_id: default_component_id(),
            },
            share: ShareConfig {
                stop: StopMode::WhileSubscribed,
                grace: Duration::ZERO,
                buffer: 64,
            },
        }
    }
}

fn default_component_id() -> ComponentId {
    ComponentId::from_static("counter")
}

impl Config {
    /// Load configuration from ~/.tealoop/config.toml
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_or_init(&config_path())
    }

    /// Load configuration from `path`, writing the bundled example there on
    /// first run.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            Self::create_default_config(path);
        }
        Self::load_from(path)
    }

    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let toml_config =
            toml::from_str::<TomlConfig>(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::default().merge(toml_config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let toml_config = toml::from_str::<TomlConfig>(contents).map_err(|source| {
            ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            }
        })?;
        Self::default().merge(toml_config)
    }

    fn merge(mut self, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        if let Some(debug) = toml_config.debug {
            if let Some(enabled) = debug.enabled {
                self.debug.enabled = enabled;
            }
            if let Some(url) = debug.url {
                self.debug.url = url;
            }
            if let Some(component_id) = debug.component_id {
                self.debug.component_id = ComponentId::new(component_id)
                    .map_err(|e| ConfigError::Invalid(format!("debug.component_id: {e}")))?;
            }
        }

        if let Some(share) = toml_config.share {
            if let Some(stop) = share.stop {
                self.share.stop = stop;
            }
            if let Some(grace_ms) = share.grace_ms {
                self.share.grace = Duration::from_millis(grace_ms);
            }
            if let Some(buffer) = share.buffer {
                if buffer == 0 {
                    return Err(ConfigError::Invalid(
                        "share.buffer must be at least 1".to_string(),
                    ));
                }
                self.share.buffer = buffer;
            }
        }

        Ok(self)
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }

    pub fn with_debug_enabled(mut self, enabled: bool) -> Self {
        self.debug.enabled = enabled;
        self
    }

    pub fn with_debug_url(mut self, url: impl Into<String>) -> Self {
        self.debug.url = url.into();
        self
    }

    pub fn with_component_id(mut self, component_id: ComponentId) -> Self {
        self.debug.component_id = component_id;
        self
    }
}
