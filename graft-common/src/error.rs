//! Common error types for graft

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for graft operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while locating, reading or writing settings
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An explicitly requested settings file does not exist
    #[error("Settings file not found: {}", .0.display())]
    SettingsNotFound(PathBuf),

    /// Settings text could not be parsed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A settings file exists but does not parse
    #[error("Invalid settings file {}: {source}", path.display())]
    InvalidSettings {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}
