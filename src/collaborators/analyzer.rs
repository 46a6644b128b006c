//! HTTP client for the text analysis service.
//!
//! The service exposes three JSON endpoints, all authenticated with a bearer
//! key:
//!
//! | Endpoint      | Request                          | Response                               |
//! |---------------|----------------------------------|----------------------------------------|
//! | `/classify`   | `{text, categories}`             | `{categories, primary_category}`       |
//! | `/sentiment`  | `{text}`                         | `{polarity, confidence}`               |
//! | `/summarize`  | `{text, max_length, style}`      | `{summary}`                            |
//!
//! Without a key every call fails fast with
//! [`CollaboratorError::MissingCredentials`], which the stages treat like any
//! other outage and answer with their local fallback.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Classification, SentimentReading, SummaryRequest, TextAnalyzer};
use crate::error::CollaboratorError;

/// Longest text sent to `/classify` and `/sentiment`, in characters.
const MAX_ANALYSIS_CHARS: usize = 5_000;

/// Longest text sent to `/summarize`, in characters.
const MAX_SUMMARY_INPUT_CHARS: usize = 10_000;

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    categories: &'a [String],
}

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SummarizeRequest<'a> {
    text: &'a str,
    max_length: usize,
    style: &'a str,
}

#[derive(Debug, Deserialize)]
struct SentimentResponse {
    #[serde(default)]
    polarity: f64,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct SummarizeResponse {
    #[serde(default)]
    summary: String,
}

/// Client for the remote text analysis service.
pub struct AnalyzerClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl AnalyzerClient {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Service root, e.g. `https://api.uniguru.com`
    /// * `api_key` - Bearer key; `None` makes every call fail with `MissingCredentials`
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `CollaboratorError::Request` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Request(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn post<B, R>(&self, endpoint: &str, body: &B) -> Result<R, CollaboratorError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CollaboratorError::MissingCredentials("analyzer API key"))?;

        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            return Err(CollaboratorError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(format!("{}: {}", endpoint, e)))
    }
}

#[async_trait]
impl TextAnalyzer for AnalyzerClient {
    async fn classify(
        &self,
        text: &str,
        candidates: &[String],
    ) -> Result<Classification, CollaboratorError> {
        let request = ClassifyRequest {
            text: truncate_chars(text, MAX_ANALYSIS_CHARS),
            categories: candidates,
        };
        self.post("classify", &request).await
    }

    async fn analyze_sentiment(&self, text: &str) -> Result<SentimentReading, CollaboratorError> {
        let request = TextRequest {
            text: truncate_chars(text, MAX_ANALYSIS_CHARS),
        };
        let response: SentimentResponse = self.post("sentiment", &request).await?;

        if !response.polarity.is_finite() || !response.confidence.is_finite() {
            return Err(CollaboratorError::InvalidResponse(
                "sentiment: non-finite values".to_string(),
            ));
        }

        Ok(SentimentReading {
            polarity: response.polarity.clamp(-1.0, 1.0),
            confidence: response.confidence.clamp(0.0, 1.0),
        })
    }

    async fn summarize(
        &self,
        text: &str,
        request: SummaryRequest,
    ) -> Result<String, CollaboratorError> {
        let body = SummarizeRequest {
            text: truncate_chars(text, MAX_SUMMARY_INPUT_CHARS),
            max_length: request.max_length,
            style: request.style.as_str(),
        };
        let response: SummarizeResponse = self.post("summarize", &body).await?;

        if response.summary.trim().is_empty() {
            return Err(CollaboratorError::InvalidResponse(
                "summarize: empty summary".to_string(),
            ));
        }
        Ok(response.summary)
    }
}

/// Cuts `text` to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_fails_fast() {
        let client =
            AnalyzerClient::new("http://127.0.0.1:9", None, Duration::from_secs(1)).unwrap();
        assert!(!client.has_api_key());

        let err = client.analyze_sentiment("text").await.unwrap_err();
        assert_eq!(err, CollaboratorError::MissingCredentials("analyzer API key"));

        let err = client
            .summarize("text", SummaryRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::MissingCredentials(_)));
    }

    #[test]
    fn test_blank_key_counts_as_missing() {
        let client = AnalyzerClient::new(
            "https://api.example.com/",
            Some("  ".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!client.has_api_key());
        assert_eq!(client.base_url(), "https://api.example.com");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        let client = AnalyzerClient::new(
            "http://127.0.0.1:9",
            Some("key".to_string()),
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(client.classify("text", &[]).await.is_err());
    }
}
