//! Error types for news-forge operations.
//!
//! Errors are split by the layer that raises them:
//! - Collaborator calls (fetching, text analysis, storage, delivery)
//! - Stage executors (typed domain rejections and unexpected faults)
//! - Task dispatch
//! - The pipeline controller itself

use thiserror::Error;
use uuid::Uuid;

use crate::content::ItemId;
use crate::pipeline::config::ConfigError;
use crate::stages::Stage;

/// Errors returned by external collaborators.
///
/// Every variant is recoverable from the pipeline's point of view: the owning
/// stage either substitutes a deterministic fallback or, for fetching, turns
/// it into a typed [`StageError`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("Collaborator call timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Missing credentials: {0} not configured")]
    MissingCredentials(&'static str),

    #[error("HTTP error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("Collaborator unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid collaborator response: {0}")]
    InvalidResponse(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CollaboratorError::Timeout { seconds: 0 }
        } else if err.is_connect() {
            CollaboratorError::Unreachable(err.to_string())
        } else if err.is_decode() {
            CollaboratorError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            CollaboratorError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            CollaboratorError::Request(err.to_string())
        }
    }
}

/// Typed failures produced by a stage executor.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    /// The source could not be fetched at all.
    #[error("Source unreachable: {0}")]
    UnreachableSource(String),

    /// The source was fetched but carried no usable text.
    #[error("Source returned no usable content")]
    EmptyContent,

    /// The content is categorically irrelevant; the run stops here.
    #[error("Content is categorically irrelevant (categories: {categories:?})")]
    Irrelevant { categories: Vec<String> },

    /// Programming error, malformed data or a panicking executor.
    #[error("Executor fault: {0}")]
    Fault(String),
}

impl StageError {
    /// Domain rejections end a run as `Rejected` without paging anyone.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, StageError::Fault(_))
    }

    /// Faults are the only failure class an operator should be paged for.
    pub fn is_fault(&self) -> bool {
        matches!(self, StageError::Fault(_))
    }
}

/// Errors surfaced by the task dispatcher.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("Task {task_id} ({stage}) failed: {source}")]
    TaskFailed {
        task_id: Uuid,
        stage: Stage,
        #[source]
        source: StageError,
    },

    #[error("Dispatcher has shut down")]
    ShutDown,

    #[error("Task {0} was dropped before reporting a result")]
    TaskLost(Uuid),
}

impl DispatchError {
    /// Returns the stage failure carried by a failed task, if any.
    pub fn stage_error(&self) -> Option<&StageError> {
        match self {
            DispatchError::TaskFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors from the document store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the delivery push collaborator that prevent any attempt.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PushError {
    #[error("No destinations configured")]
    NoDestinations,

    #[error("Push collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
}

/// Errors that end a pipeline run without a finalized record.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid source reference: {0}")]
    InvalidSource(String),

    #[error("Item {0} is finalized and can no longer change")]
    ItemFinalized(ItemId),

    #[error("Illegal state transition: {0}")]
    InvalidTransition(String),

    #[error("Item {item_id}: {field} is already set")]
    FieldAlreadySet { item_id: ItemId, field: &'static str },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Run task failed to complete: {0}")]
    Join(String),
}

/// Result type alias for stage executors.
pub type StageResult<T> = Result<T, StageError>;
