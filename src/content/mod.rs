//! Content items flowing through the pipeline.
//!
//! A [`ContentItem`] is one article reference and everything the stages derive
//! from it. Each derived field has exactly one owning stage:
//!
//! - **payload**: written by Fetch
//! - **relevance**: written by Filter
//! - **verification**: written by Verify (authenticity score and sentiment)
//! - **script**: written by Script, cleared when a correction cycle starts
//!
//! Only the pipeline controller mutates an item, through the `apply_*`
//! methods, and every mutation is refused once the item is finalized.

pub mod types;

pub use types::{
    AnalysisSource, ArticleMetadata, ContentItem, Credibility, FinalStatus, ItemId, Payload,
    PipelineState, Relevance, Script, Sentiment, SourceRef, Verification,
};
