//! Filter stage: decides whether the article is news worth scripting.
//!
//! The article is relevant when it falls into at least one configured
//! category, or when the keyword and length pre-screen reaches
//! [`PRESCREEN_PASS_SCORE`]. Anything else is categorically irrelevant and
//! ends the run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Stage, StageExecutor, StageOutput, StageRequest};
use crate::collaborators::fallback::{classify_keywords, prescreen_score};
use crate::collaborators::{with_timeout, TextAnalyzer};
use crate::content::{AnalysisSource, Relevance};
use crate::error::{StageError, StageResult};

/// Pre-screen score that makes an article relevant on its own.
pub const PRESCREEN_PASS_SCORE: u8 = 50;

pub struct FilterStage {
    analyzer: Arc<dyn TextAnalyzer>,
    categories: Vec<String>,
    timeout: Duration,
}

impl FilterStage {
    pub fn new(analyzer: Arc<dyn TextAnalyzer>, categories: Vec<String>, timeout: Duration) -> Self {
        Self {
            analyzer,
            categories,
            timeout,
        }
    }

    fn allowed(&self, category: &str) -> bool {
        self.categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category.trim()))
    }
}

#[async_trait]
impl StageExecutor for FilterStage {
    fn stage(&self) -> Stage {
        Stage::Filter
    }

    async fn execute(&self, request: &StageRequest) -> StageResult<StageOutput> {
        let payload = request.payload(Stage::Filter)?;
        let text = format!("{}\n\n{}", payload.title, payload.body);

        let (classification, source) =
            match with_timeout(self.timeout, self.analyzer.classify(&text, &self.categories)).await {
                Ok(classification) => (classification, AnalysisSource::Service),
                Err(e) => {
                    warn!(item_id = %request.item.id, error = %e, "Classification unavailable, using keyword fallback");
                    (classify_keywords(&text, &self.categories), AnalysisSource::Fallback)
                }
            };

        let prescreen = prescreen_score(&payload.title, &payload.body);
        let matched: Vec<String> = classification
            .categories
            .iter()
            .filter(|c| self.allowed(c))
            .cloned()
            .collect();

        debug!(
            item_id = %request.item.id,
            prescreen,
            categories = ?classification.categories,
            "Filtered article"
        );

        if matched.is_empty() && prescreen < PRESCREEN_PASS_SCORE {
            return Err(StageError::Irrelevant {
                categories: classification.categories,
            });
        }

        Ok(StageOutput::Filtered(Relevance {
            relevant: true,
            categories: matched,
            prescreen_score: prescreen,
            source,
        }))
    }
}
