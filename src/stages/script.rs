//! Script stage: generates the video script from a summary of the article.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Stage, StageExecutor, StageOutput, StageRequest};
use crate::collaborators::fallback::{extractive_summary, truncate_words};
use crate::collaborators::{with_timeout, SummaryRequest, SummaryStyle, TextAnalyzer};
use crate::content::Script;
use crate::error::StageResult;
use crate::scoring::features::EMOTIONAL_MARKERS;

use super::correction::INITIAL_SUMMARY_WORDS;

const CLOSING_LINE: &str = "Stay tuned for more updates.";

pub struct ScriptStage {
    analyzer: Arc<dyn TextAnalyzer>,
    timeout: Duration,
}

impl ScriptStage {
    pub fn new(analyzer: Arc<dyn TextAnalyzer>, timeout: Duration) -> Self {
        Self { analyzer, timeout }
    }
}

#[async_trait]
impl StageExecutor for ScriptStage {
    fn stage(&self) -> Stage {
        Stage::Script
    }

    async fn execute(&self, request: &StageRequest) -> StageResult<StageOutput> {
        let payload = request.payload(Stage::Script)?;
        let plan = request.correction.as_ref();

        let summary_request = plan.map(|p| p.summary).unwrap_or(SummaryRequest {
            max_length: INITIAL_SUMMARY_WORDS,
            style: SummaryStyle::Broadcast,
        });

        let (summary, fallback_used) = match with_timeout(
            self.timeout,
            self.analyzer.summarize(&payload.body, summary_request),
        )
        .await
        {
            Ok(summary) => (summary.trim().to_string(), false),
            Err(e) => {
                warn!(item_id = %request.item.id, error = %e, "Summarizer unavailable, using extractive fallback");
                let summary = extractive_summary(&payload.body);
                (truncate_words(&summary, summary_request.max_length), true)
            }
        };

        let summary = if plan.is_some_and(|p| p.neutral_register) {
            strip_emotional(&summary)
        } else {
            summary
        };

        let text = compose_script(&payload.title, &summary);
        debug!(
            item_id = %request.item.id,
            attempt = request.item.attempts(),
            words = text.split_whitespace().count(),
            fallback_used,
            "Generated script"
        );

        Ok(StageOutput::Scripted(Script {
            text,
            summary,
            fallback_used,
            attempt: request.item.attempts(),
        }))
    }
}

/// Lays out a broadcast script around a summary.
pub fn compose_script(title: &str, summary: &str) -> String {
    let headline = if title.trim().is_empty() {
        "Breaking News".to_string()
    } else {
        format!("Breaking News: {}", title.trim())
    };
    format!("{}\n\n{}\n\n{}", headline, summary.trim(), CLOSING_LINE)
}

/// Removes emotional marker words, keeping everything else.
fn strip_emotional(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| {
            let bare = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            !EMOTIONAL_MARKERS.contains(&bare.as_str())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Classification, SentimentReading};
    use crate::content::{ArticleMetadata, ContentItem, Payload, SourceRef};
    use crate::error::CollaboratorError;
    use crate::scoring::{ComponentScores, ScoreRecord, ScoreWeights};
    use crate::stages::CorrectionPlan;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Summarizer that records the requests it sees.
    struct RecordingSummarizer {
        reply: Result<String, CollaboratorError>,
        seen: Mutex<Vec<SummaryRequest>>,
    }

    #[async_trait]
    impl TextAnalyzer for RecordingSummarizer {
        async fn classify(
            &self,
            _text: &str,
            _candidates: &[String],
        ) -> Result<Classification, CollaboratorError> {
            Ok(Classification::default())
        }

        async fn analyze_sentiment(&self, _text: &str) -> Result<SentimentReading, CollaboratorError> {
            Err(CollaboratorError::Unreachable("unused".into()))
        }

        async fn summarize(
            &self,
            _text: &str,
            request: SummaryRequest,
        ) -> Result<String, CollaboratorError> {
            self.seen.lock().unwrap().push(request);
            self.reply.clone()
        }
    }

    fn summarizer(reply: Result<String, CollaboratorError>) -> Arc<RecordingSummarizer> {
        Arc::new(RecordingSummarizer {
            reply,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn item() -> ContentItem {
        let source = SourceRef::parse("https://news.example.com/a").unwrap();
        let mut item = ContentItem::new(source, 3);
        item.apply_payload(Payload {
            title: "Bridge reopens".into(),
            body: "The bridge reopened today. Traffic was light. Officials expect crowds later."
                .into(),
            metadata: ArticleMetadata::default(),
            fetched_at: Utc::now(),
        })
        .unwrap();
        item
    }

    #[tokio::test]
    async fn test_script_from_service_summary() {
        let analyzer = summarizer(Ok("The bridge is open again.".into()));
        let stage = ScriptStage::new(analyzer.clone(), Duration::from_secs(1));

        let StageOutput::Scripted(script) = stage.execute(&StageRequest::new(item())).await.unwrap()
        else {
            panic!("expected script");
        };

        assert_eq!(
            script.text,
            "Breaking News: Bridge reopens\n\nThe bridge is open again.\n\nStay tuned for more updates."
        );
        assert!(!script.fallback_used);
        assert_eq!(script.attempt, 0);
        assert_eq!(analyzer.seen.lock().unwrap()[0].style, SummaryStyle::Broadcast);
    }

    #[tokio::test]
    async fn test_script_extractive_fallback() {
        let stage = ScriptStage::new(
            summarizer(Err(CollaboratorError::Http {
                status: 503,
                message: "unavailable".into(),
            })),
            Duration::from_secs(1),
        );

        let StageOutput::Scripted(script) = stage.execute(&StageRequest::new(item())).await.unwrap()
        else {
            panic!("expected script");
        };

        assert!(script.fallback_used);
        assert_eq!(
            script.summary,
            "The bridge reopened today. Officials expect crowds later."
        );
    }

    #[tokio::test]
    async fn test_correction_plan_is_forwarded() {
        let analyzer = summarizer(Ok("A shocking, devastating reopening.".into()));
        let stage = ScriptStage::new(analyzer.clone(), Duration::from_secs(1));

        let mut item = item();
        let draft = Script {
            text: "draft".into(),
            summary: String::new(),
            fallback_used: false,
            attempt: 0,
        };
        let record = ScoreRecord::from_components(
            &item,
            &draft,
            ComponentScores::new(0.1, 0.5, 0.5),
            ScoreWeights::default(),
            0.6,
        );
        item.begin_correction().unwrap();
        let plan = CorrectionPlan::for_rejection(1, &record);

        let request = StageRequest::new(item).with_correction(plan);
        let StageOutput::Scripted(script) = stage.execute(&request).await.unwrap() else {
            panic!("expected script");
        };

        assert_eq!(script.attempt, 1);
        assert_eq!(script.summary, "A reopening.");
        let seen = analyzer.seen.lock().unwrap();
        assert_eq!(seen[0].max_length, 120);
        assert_eq!(seen[0].style, SummaryStyle::Neutral);
    }

    #[test]
    fn test_compose_without_title() {
        assert!(compose_script("", "Summary.").starts_with("Breaking News\n\n"));
    }
}
