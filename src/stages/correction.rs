//! Feedback stage: turns a rejected score into adjusted Script parameters.
//!
//! Each correction cycle asks for a shorter summary. When tone was the
//! weakest component the next script is also requested in a neutral
//! register with emotional wording removed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Stage, StageExecutor, StageOutput, StageRequest};
use crate::collaborators::{SummaryRequest, SummaryStyle};
use crate::error::{StageError, StageResult};
use crate::scoring::ScoreRecord;

/// Summary length requested on the first pass, in words.
pub const INITIAL_SUMMARY_WORDS: usize = 150;

/// Words removed from the requested length on every correction cycle.
const SUMMARY_WORDS_STEP: usize = 30;

/// Shortest summary a correction will ask for.
const MIN_SUMMARY_WORDS: usize = 40;

/// Parameters for a corrective Script pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionPlan {
    /// Correction cycle this plan belongs to, starting at 1.
    pub attempt: u32,
    pub summary: SummaryRequest,
    /// Drop emotional wording from the summary.
    pub neutral_register: bool,
    /// Composite of the score that triggered this plan.
    pub previous_composite: f64,
}

impl CorrectionPlan {
    /// Derives the plan for correction cycle `attempt` from the rejecting
    /// score.
    pub fn for_rejection(attempt: u32, rejected: &ScoreRecord) -> Self {
        let shortened = INITIAL_SUMMARY_WORDS
            .saturating_sub(SUMMARY_WORDS_STEP * attempt as usize)
            .max(MIN_SUMMARY_WORDS);

        let c = rejected.components;
        let tone_weakest = c.tone <= c.engagement && c.tone <= c.quality;

        Self {
            attempt,
            summary: SummaryRequest {
                max_length: shortened,
                style: if tone_weakest {
                    SummaryStyle::Neutral
                } else {
                    SummaryStyle::Concise
                },
            },
            neutral_register: tone_weakest,
            previous_composite: rejected.composite,
        }
    }
}

/// Plans a correction cycle. Pure; calls no collaborator.
#[derive(Debug, Default)]
pub struct FeedbackStage;

impl FeedbackStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageExecutor for FeedbackStage {
    fn stage(&self) -> Stage {
        Stage::Feedback
    }

    async fn execute(&self, request: &StageRequest) -> StageResult<StageOutput> {
        let rejected = request
            .rejected
            .as_ref()
            .ok_or_else(|| StageError::Fault("feedback dispatched without a score".to_string()))?;

        let plan = CorrectionPlan::for_rejection(request.item.attempts(), rejected);
        debug!(
            item_id = %request.item.id,
            attempt = plan.attempt,
            max_length = plan.summary.max_length,
            style = plan.summary.style.as_str(),
            "Planned correction"
        );
        Ok(StageOutput::CorrectionPlanned(plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentItem, Script, SourceRef};
    use crate::scoring::{ComponentScores, ScoreWeights};

    fn rejected(components: ComponentScores) -> (ContentItem, ScoreRecord) {
        let source = SourceRef::parse("https://news.example.com/a").unwrap();
        let item = ContentItem::new(source, 3);
        let script = Script {
            text: "draft".into(),
            summary: String::new(),
            fallback_used: false,
            attempt: 0,
        };
        let record =
            ScoreRecord::from_components(&item, &script, components, ScoreWeights::default(), 0.6);
        (item, record)
    }

    #[test]
    fn test_plans_get_shorter() {
        let (_, record) = rejected(ComponentScores::new(0.9, 0.3, 0.5));
        let lengths: Vec<usize> = (1..=5)
            .map(|n| CorrectionPlan::for_rejection(n, &record).summary.max_length)
            .collect();
        assert_eq!(lengths, vec![120, 90, 60, 40, 40]);
    }

    #[test]
    fn test_weak_tone_requests_neutral_register() {
        let (_, record) = rejected(ComponentScores::new(0.2, 0.5, 0.5));
        let plan = CorrectionPlan::for_rejection(1, &record);
        assert!(plan.neutral_register);
        assert_eq!(plan.summary.style, SummaryStyle::Neutral);

        let (_, record) = rejected(ComponentScores::new(0.8, 0.3, 0.5));
        let plan = CorrectionPlan::for_rejection(1, &record);
        assert!(!plan.neutral_register);
        assert_eq!(plan.summary.style, SummaryStyle::Concise);
    }

    #[tokio::test]
    async fn test_feedback_stage() {
        let (mut item, record) = rejected(ComponentScores::uniform(0.4));
        assert!(item.begin_correction().unwrap());

        let request = StageRequest::new(item).with_rejected(record);
        let StageOutput::CorrectionPlanned(plan) = FeedbackStage::new().execute(&request).await.unwrap()
        else {
            panic!("expected plan");
        };
        assert_eq!(plan.attempt, 1);
        assert!((plan.previous_composite - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_feedback_without_score_is_fault() {
        let (item, _) = rejected(ComponentScores::uniform(0.4));
        let err = FeedbackStage::new()
            .execute(&StageRequest::new(item))
            .await
            .unwrap_err();
        assert!(err.is_fault());
    }
}
