//! Error types for the execution engine.

use notable_core::error::NotableError;
use notable_core::types::{NoteId, NoteStatus};

/// Boxed error returned by pluggable collaborators (tool bodies, language
/// models, HTTP transports).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from tool registration and dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Malformed schema, JSON, or URL, or input/output that does not match
    /// the tool's schema.
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Tool not found: {0}")]
    NotFound(NoteId),
    #[error("Tool {tool_id} failed: {message}")]
    Execution { tool_id: NoteId, message: String },
    #[error("Tool {tool_id} returned HTTP {status}: {body}")]
    Http {
        tool_id: NoteId,
        status: u16,
        body: String,
    },
    #[error(transparent)]
    Storage(#[from] NotableError),
}

/// Errors from running a single note.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Note not found: {0}")]
    NoteNotFound(NoteId),
    #[error("Invalid state transition: {0} -> {1}")]
    InvalidTransition(NoteStatus, NoteStatus),
    #[error("Pipeline parse error: {0}")]
    PipelineParse(String),
    #[error("Step {0} needs a language model but none is configured")]
    ModelUnavailable(String),
    #[error("Language model failed: {0}")]
    Model(String),
    /// The process stopped while the note was running.
    #[error("Run was interrupted before it finished")]
    Interrupted,
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Storage(NotableError),
}

impl From<NotableError> for RunError {
    fn from(err: NotableError) -> Self {
        match err {
            NotableError::PipelineParse(msg) => RunError::PipelineParse(msg),
            NotableError::NoteNotFound(id) => RunError::NoteNotFound(id),
            other => RunError::Storage(other),
        }
    }
}

/// Errors raised by planning rules. Never surfaced to a note's transcript.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Rule failed: {0}")]
    Failed(String),
    #[error("Language model failed: {0}")]
    Model(String),
    #[error("Pipeline parse error: {0}")]
    PipelineParse(String),
    #[error(transparent)]
    Storage(NotableError),
}

impl From<NotableError> for RuleError {
    fn from(err: NotableError) -> Self {
        match err {
            NotableError::PipelineParse(msg) => RuleError::PipelineParse(msg),
            other => RuleError::Storage(other),
        }
    }
}

/// Errors from the note scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler failed: {0}")]
    Failed(String),
    #[error("Note not found: {0}")]
    NoteNotFound(NoteId),
    #[error(transparent)]
    Storage(#[from] NotableError),
}

/// Errors from the [`NoteSystem`](crate::system::NoteSystem) service surface.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("Note not found: {0}")]
    NoteNotFound(NoteId),
    #[error("Scheduler is already running")]
    AlreadyStarted,
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Storage(#[from] NotableError),
}
