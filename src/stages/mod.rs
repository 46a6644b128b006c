//! Stage executors.
//!
//! A stage reads an immutable snapshot of a [`ContentItem`] and returns the
//! field set it owns as a [`StageOutput`], or a typed [`StageError`]. Stages
//! never mutate the item themselves; the pipeline controller applies their
//! output.
//!
//! The set of stages is closed. [`StageSet::executor`] maps every [`Stage`]
//! to its executor with an exhaustive match, so there is no runtime lookup by
//! name that could fail.
//!
//! Recoverable collaborator failures never leave a stage: Filter, Verify and
//! Script answer them with a deterministic fallback and flag the output.
//! Fetch has no meaningful fallback and turns them into
//! [`StageError::UnreachableSource`].

pub mod correction;
pub mod fetch;
pub mod filter;
pub mod script;
pub mod verify;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::collaborators::{ContentFetcher, TextAnalyzer};
use crate::content::{ContentItem, Payload, Relevance, Script, Verification};
use crate::error::{StageError, StageResult};
use crate::pipeline::config::PipelineConfig;
use crate::scoring::ScoreRecord;

pub use correction::{CorrectionPlan, FeedbackStage};
pub use fetch::FetchStage;
pub use filter::FilterStage;
pub use script::ScriptStage;
pub use verify::VerifyStage;

/// A discrete step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Filter,
    Verify,
    Script,
    /// Plans a correction cycle after a rejected score.
    Feedback,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Fetch,
        Stage::Filter,
        Stage::Verify,
        Stage::Script,
        Stage::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Filter => "filter",
            Stage::Verify => "verify",
            Stage::Script => "script",
            Stage::Feedback => "feedback",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input handed to a stage executor.
#[derive(Debug, Clone)]
pub struct StageRequest {
    /// Snapshot of the item at dispatch time.
    pub item: ContentItem,
    /// Adjusted parameters for a correction pass of Script.
    pub correction: Option<CorrectionPlan>,
    /// The score that triggered a correction cycle, for Feedback.
    pub rejected: Option<ScoreRecord>,
}

impl StageRequest {
    pub fn new(item: ContentItem) -> Self {
        Self {
            item,
            correction: None,
            rejected: None,
        }
    }

    pub fn with_correction(mut self, plan: CorrectionPlan) -> Self {
        self.correction = Some(plan);
        self
    }

    pub fn with_rejected(mut self, record: ScoreRecord) -> Self {
        self.rejected = Some(record);
        self
    }

    /// The fetched payload, or a fault when a later stage runs without one.
    pub(crate) fn payload(&self, stage: Stage) -> StageResult<&Payload> {
        self.item
            .payload()
            .ok_or_else(|| StageError::Fault(format!("{} dispatched before fetch", stage)))
    }
}

/// The field set produced by one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Fetched(Payload),
    Filtered(Relevance),
    Verified(Verification),
    Scripted(Script),
    CorrectionPlanned(CorrectionPlan),
}

impl StageOutput {
    /// Whether a local fallback stood in for a collaborator.
    pub fn fallback_used(&self) -> bool {
        match self {
            StageOutput::Fetched(_) | StageOutput::CorrectionPlanned(_) => false,
            StageOutput::Filtered(relevance) => relevance.source.is_fallback(),
            StageOutput::Verified(verification) => verification.fallback_used,
            StageOutput::Scripted(script) => script.fallback_used,
        }
    }
}

/// One pipeline stage.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    async fn execute(&self, request: &StageRequest) -> StageResult<StageOutput>;
}

/// Timeouts and parameters shared by the stage executors.
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub fetch_timeout: Duration,
    pub collaborator_timeout: Duration,
    pub relevant_categories: Vec<String>,
}

impl StageSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            fetch_timeout: config.fetch_timeout,
            collaborator_timeout: config.collaborator_timeout,
            relevant_categories: config.relevant_categories.clone(),
        }
    }
}

/// The closed set of stage executors.
pub struct StageSet {
    fetch: FetchStage,
    filter: FilterStage,
    verify: VerifyStage,
    script: ScriptStage,
    feedback: FeedbackStage,
}

impl StageSet {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        analyzer: Arc<dyn TextAnalyzer>,
        settings: StageSettings,
    ) -> Self {
        Self {
            fetch: FetchStage::new(fetcher, settings.fetch_timeout),
            filter: FilterStage::new(
                Arc::clone(&analyzer),
                settings.relevant_categories.clone(),
                settings.collaborator_timeout,
            ),
            verify: VerifyStage::new(Arc::clone(&analyzer), settings.collaborator_timeout),
            script: ScriptStage::new(analyzer, settings.collaborator_timeout),
            feedback: FeedbackStage::new(),
        }
    }

    pub fn executor(&self, stage: Stage) -> &dyn StageExecutor {
        match stage {
            Stage::Fetch => &self.fetch,
            Stage::Filter => &self.filter,
            Stage::Verify => &self.verify,
            Stage::Script => &self.script,
            Stage::Feedback => &self.feedback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        let names: Vec<String> = Stage::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(names, ["fetch", "filter", "verify", "script", "feedback"]);
    }

    #[test]
    fn test_stage_serde_matches_display() {
        let json = serde_json::to_string(&Stage::Verify).unwrap();
        assert_eq!(json, "\"verify\"");
    }
}
