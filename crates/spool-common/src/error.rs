//! Error types shared across spool crates

use thiserror::Error;

/// Result type alias for shared spool operations
pub type Result<T> = std::result::Result<T, SpoolError>;

/// Errors raised outside the batch engine proper (files, config, parsing)
#[derive(Error, Debug)]
pub enum SpoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid identifier '{0}': only letters, digits and underscores are allowed")]
    InvalidIdentifier(String),
}

impl SpoolError {
    pub fn config(message: impl Into<String>) -> Self {
        SpoolError::Config(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        SpoolError::Parse(message.into())
    }
}
