use thiserror::Error;

use crate::types::NoteId;

/// Top-level error type for the Notable system.
///
/// Subsystem crates define their own error types and wrap this one so that
/// the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotableError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Note not found: {0}")]
    NoteNotFound(NoteId),

    #[error("Pipeline parse error: {0}")]
    PipelineParse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for NotableError {
    fn from(err: toml::de::Error) -> Self {
        NotableError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for NotableError {
    fn from(err: toml::ser::Error) -> Self {
        NotableError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for NotableError {
    fn from(err: serde_json::Error) -> Self {
        NotableError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Notable operations.
pub type Result<T> = std::result::Result<T, NotableError>;
