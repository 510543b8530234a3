//! Path utilities for tealoop data directories

use std::path::PathBuf;

/// Get the base data directory (~/.tealoop)
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".tealoop"))
        .unwrap_or_else(|| PathBuf::from(".tealoop"))
}

/// Get the config file path (~/.tealoop/config.toml)
pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Get the logs directory (~/.tealoop/logs)
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Get the default log file path (~/.tealoop/logs/tealoop.log)
pub fn log_file_path() -> PathBuf {
    logs_dir().join("tealoop.log")
}

/// Get the directory snapshot tapes are written to (~/.tealoop/tapes)
pub fn tapes_dir() -> PathBuf {
    data_dir().join("tapes")
}
