use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] regsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to read feed {path}: {reason}")]
    Feed { path: String, reason: String },
    #[error("Invalid column selector '{0}': use a letter (A, G, AB) or a 1-based number")]
    InvalidColumn(String),
    #[error("Invalid delimiter '{0}': use tab, comma or semicolon")]
    InvalidDelimiter(String),
    #[error("Identifier cannot be empty")]
    EmptyIdentifier,
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
}
