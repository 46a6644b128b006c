//! External collaborators consumed by the stages.
//!
//! The pipeline talks to the outside world only through the traits in this
//! module:
//!
//! - [`ContentFetcher`]: retrieves an article by source URL
//! - [`TextAnalyzer`]: classification, sentiment and summarization
//! - [`DocumentStore`]: key/value document persistence
//! - [`DeliveryPush`]: hands finalized records to downstream video systems
//!
//! Every call made by the pipeline goes through [`with_timeout`], so a slow
//! collaborator surfaces as [`CollaboratorError::Timeout`] no matter how the
//! implementation behaves. The [`fallback`] module holds the deterministic
//! local computations stages substitute when a text service fails.

pub mod analyzer;
pub mod fallback;
pub mod http_fetcher;
pub mod push;
pub mod store;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::content::{ArticleMetadata, SourceRef};
use crate::error::{CollaboratorError, PushError, StoreError};
use crate::pipeline::outcome::FinalizedRecord;

pub use analyzer::AnalyzerClient;
pub use http_fetcher::HttpFetcher;
pub use push::{DeliveryStatus, Destination, DestinationOutcome, HttpPushClient, PushReport};
pub use store::{DocumentFilter, MemoryStore, SqliteStore};

/// Raw article returned by a fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedContent {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub metadata: ArticleMetadata,
}

/// Categories assigned to a text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub categories: Vec<String>,
    #[serde(default)]
    pub primary_category: Option<String>,
}

/// Signed sentiment reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    pub polarity: f64,
    pub confidence: f64,
}

/// Register requested from the summarizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStyle {
    Broadcast,
    Concise,
    Neutral,
}

impl SummaryStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStyle::Broadcast => "broadcast",
            SummaryStyle::Concise => "concise",
            SummaryStyle::Neutral => "neutral",
        }
    }
}

/// Parameters for a summarization call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryRequest {
    /// Upper bound on summary length, in words.
    pub max_length: usize,
    pub style: SummaryStyle,
}

impl Default for SummaryRequest {
    fn default() -> Self {
        Self {
            max_length: 150,
            style: SummaryStyle::Broadcast,
        }
    }
}

/// Retrieves article content for a source reference.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_content(&self, source: &SourceRef) -> Result<FetchedContent, CollaboratorError>;
}

/// Remote text analysis service.
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    /// Assigns categories to `text`, restricted to `candidates` when the
    /// service supports it.
    async fn classify(
        &self,
        text: &str,
        candidates: &[String],
    ) -> Result<Classification, CollaboratorError>;

    async fn analyze_sentiment(&self, text: &str) -> Result<SentimentReading, CollaboratorError>;

    async fn summarize(
        &self,
        text: &str,
        request: SummaryRequest,
    ) -> Result<String, CollaboratorError>;
}

/// Eventually consistent document storage keyed by (collection, id).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts or replaces a document.
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        document: serde_json::Value,
    ) -> Result<(), StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn query(
        &self,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<serde_json::Value>, StoreError>;
}

/// Delivers finalized records to downstream destinations.
///
/// Each destination is attempted once. The report lists an ack or failure
/// per destination; nothing is retried.
#[async_trait]
pub trait DeliveryPush: Send + Sync {
    async fn push(
        &self,
        record: &FinalizedRecord,
        destinations: &[Destination],
    ) -> Result<PushReport, PushError>;
}

/// Bounds a collaborator call by `limit`.
///
/// An elapsed deadline becomes [`CollaboratorError::Timeout`]; the inner
/// future is dropped.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            seconds: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, CollaboratorError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(CollaboratorError::Timeout { .. })));
    }

    #[test]
    fn test_summary_style_names() {
        assert_eq!(SummaryStyle::Concise.as_str(), "concise");
        assert_eq!(SummaryRequest::default().max_length, 150);
    }
}
