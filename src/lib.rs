//! news_forge: news content pipeline with reward-gated script correction.
//!
//! Items flow from a source URL through fetch, relevance filtering,
//! verification and script generation. Each script is scored against a
//! composite reward; rejected scripts are corrected a bounded number of
//! times before the item is finalized.

// Core modules
pub mod cli;
pub mod collaborators;
pub mod content;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod scoring;
pub mod stages;

// Re-export commonly used types
pub use content::{ContentItem, FinalStatus, ItemId, PipelineState, SourceRef};
pub use error::{
    CollaboratorError, DispatchError, PipelineError, PushError, StageError, StoreError,
};
pub use pipeline::{
    FinalizedRecord, PipelineConfig, PipelineContext, PipelineController, RejectionReason,
    RunHandle, RunOptions,
};
