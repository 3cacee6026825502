//! Error taxonomy for the task core.
//!
//! Every failure is scoped to a single task, action or batch; none of these
//! is fatal to the process.

use thiserror::Error;

use crate::task::TaskId;

/// Why a task (or a follow-up action) failed. The `Display` text is what the
/// user sees in the failure notification and in the history record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Empty or malformed input, rejected before any network call.
    #[error("{0}")]
    Validation(String),
    /// A request or progress channel could not be established.
    #[error("connection failed: {0}")]
    Transport(String),
    /// The engine reported a structured failure.
    #[error("{0}")]
    Remote(String),
    /// A post-completion convenience action (open file, reveal) failed.
    #[error("{0}")]
    Action(String),
}

/// Failure at the remote-engine boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0}")]
    Transport(String),
    #[error("{message}")]
    Remote {
        code: Option<String>,
        message: String,
    },
}

impl EngineError {
    pub fn remote(message: impl Into<String>) -> Self {
        EngineError::Remote {
            code: None,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

impl From<EngineError> for TaskError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Transport(msg) => TaskError::Transport(msg),
            EngineError::Remote { message, .. } => TaskError::Remote(message),
        }
    }
}

/// Transport failure while reading from an open progress channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("progress channel error: {0}")]
pub struct ChannelError(pub String);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("task {0} already exists")]
    DuplicateId(TaskId),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("selection is locked while the batch is downloading")]
    SelectionLocked,
    #[error("batch is already running")]
    AlreadyRunning,
    #[error("no playlist item with id {0}")]
    UnknownItem(String),
    #[error("no items selected")]
    EmptySelection,
}
