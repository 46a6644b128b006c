//! Fetch stage: retrieves the article payload.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::{Stage, StageExecutor, StageOutput, StageRequest};
use crate::collaborators::{with_timeout, ContentFetcher};
use crate::content::Payload;
use crate::error::{StageError, StageResult};

pub struct FetchStage {
    fetcher: Arc<dyn ContentFetcher>,
    timeout: Duration,
}

impl FetchStage {
    pub fn new(fetcher: Arc<dyn ContentFetcher>, timeout: Duration) -> Self {
        Self { fetcher, timeout }
    }
}

#[async_trait]
impl StageExecutor for FetchStage {
    fn stage(&self) -> Stage {
        Stage::Fetch
    }

    async fn execute(&self, request: &StageRequest) -> StageResult<StageOutput> {
        let source = &request.item.source;

        let content = with_timeout(self.timeout, self.fetcher.fetch_content(source))
            .await
            .map_err(|e| {
                warn!(item_id = %request.item.id, source = %source, error = %e, "Fetch failed");
                StageError::UnreachableSource(format!("{}: {}", source, e))
            })?;

        if content.body.trim().is_empty() {
            return Err(StageError::EmptyContent);
        }

        debug!(
            item_id = %request.item.id,
            words = content.body.split_whitespace().count(),
            "Fetched article"
        );

        Ok(StageOutput::Fetched(Payload {
            title: content.title.trim().to_string(),
            body: content.body,
            metadata: content.metadata,
            fetched_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::FetchedContent;
    use crate::content::{ArticleMetadata, ContentItem, SourceRef};
    use crate::error::CollaboratorError;

    struct StaticFetcher(Result<FetchedContent, CollaboratorError>);

    #[async_trait]
    impl ContentFetcher for StaticFetcher {
        async fn fetch_content(
            &self,
            _source: &SourceRef,
        ) -> Result<FetchedContent, CollaboratorError> {
            self.0.clone()
        }
    }

    struct SlowFetcher;

    #[async_trait]
    impl ContentFetcher for SlowFetcher {
        async fn fetch_content(
            &self,
            _source: &SourceRef,
        ) -> Result<FetchedContent, CollaboratorError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Err(CollaboratorError::Unreachable("never".into()))
        }
    }

    fn request() -> StageRequest {
        let source = SourceRef::parse("https://news.example.com/a").unwrap();
        StageRequest::new(ContentItem::new(source, 3))
    }

    fn stage(result: Result<FetchedContent, CollaboratorError>) -> FetchStage {
        FetchStage::new(Arc::new(StaticFetcher(result)), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let output = stage(Ok(FetchedContent {
            title: "  Title ".into(),
            body: "Body text.".into(),
            metadata: ArticleMetadata::default(),
        }))
        .execute(&request())
        .await
        .unwrap();

        match output {
            StageOutput::Fetched(payload) => {
                assert_eq!(payload.title, "Title");
                assert_eq!(payload.body, "Body text.");
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_empty_body() {
        let err = stage(Ok(FetchedContent {
            title: "Title".into(),
            body: "   ".into(),
            metadata: ArticleMetadata::default(),
        }))
        .execute(&request())
        .await
        .unwrap_err();
        assert_eq!(err, StageError::EmptyContent);
    }

    #[tokio::test]
    async fn test_fetch_collaborator_error() {
        let err = stage(Err(CollaboratorError::Http {
            status: 404,
            message: "not found".into(),
        }))
        .execute(&request())
        .await
        .unwrap_err();
        assert!(matches!(err, StageError::UnreachableSource(_)));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let stage = FetchStage::new(Arc::new(SlowFetcher), Duration::from_millis(20));
        let err = stage.execute(&request()).await.unwrap_err();
        assert!(matches!(err, StageError::UnreachableSource(msg) if msg.contains("timed out")));
    }
}
