//! Verify stage: authenticity score and body sentiment.
//!
//! Authenticity is a local content analysis and always available. Sentiment
//! comes from the text analysis service; when it fails the stage uses the
//! lexicon word-count heuristic and flags the result. This stage never
//! returns a collaborator failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Stage, StageExecutor, StageOutput, StageRequest};
use crate::collaborators::fallback::{authenticity_heuristic, lexicon_sentiment};
use crate::collaborators::{with_timeout, TextAnalyzer};
use crate::content::{AnalysisSource, Credibility, Sentiment, Verification};
use crate::error::StageResult;

pub struct VerifyStage {
    analyzer: Arc<dyn TextAnalyzer>,
    timeout: Duration,
}

impl VerifyStage {
    pub fn new(analyzer: Arc<dyn TextAnalyzer>, timeout: Duration) -> Self {
        Self { analyzer, timeout }
    }
}

#[async_trait]
impl StageExecutor for VerifyStage {
    fn stage(&self) -> Stage {
        Stage::Verify
    }

    async fn execute(&self, request: &StageRequest) -> StageResult<StageOutput> {
        let payload = request.payload(Stage::Verify)?;

        let sentiment = match with_timeout(
            self.timeout,
            self.analyzer.analyze_sentiment(&payload.body),
        )
        .await
        {
            Ok(reading) => Sentiment {
                polarity: reading.polarity,
                confidence: reading.confidence,
                source: AnalysisSource::Service,
            },
            Err(e) => {
                warn!(item_id = %request.item.id, error = %e, "Sentiment unavailable, using lexicon fallback");
                let reading = lexicon_sentiment(&payload.body);
                Sentiment {
                    polarity: reading.polarity,
                    confidence: reading.confidence,
                    source: AnalysisSource::Fallback,
                }
            }
        };

        let authenticity = authenticity_heuristic(&payload.body);
        debug!(
            item_id = %request.item.id,
            authenticity,
            polarity = sentiment.polarity,
            "Verified article"
        );

        Ok(StageOutput::Verified(Verification {
            authenticity,
            credibility: Credibility::from_authenticity(authenticity),
            fallback_used: sentiment.source.is_fallback(),
            sentiment,
        }))
    }
}
