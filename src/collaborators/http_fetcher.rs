//! HTTP article fetcher with regex-based HTML extraction.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use super::{ContentFetcher, FetchedContent};
use crate::content::{ArticleMetadata, SourceRef};
use crate::error::CollaboratorError;

/// Paragraphs beyond this many are ignored.
const MAX_PARAGRAPHS: usize = 10;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; news-forge/0.1)";

fn title_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"))
}

fn paragraph_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<p(?:\s[^>]*)?>(.*?)</p>").expect("valid regex"))
}

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
}

fn meta_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<meta\s[^>]*>").expect("valid regex"))
}

fn attribute_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)([a-z:_-]+)\s*=\s*["']([^"']*)["']"#).expect("valid regex")
    })
}

/// Fetches articles over HTTP(S).
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `CollaboratorError::Request` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CollaboratorError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch_content(&self, source: &SourceRef) -> Result<FetchedContent, CollaboratorError> {
        let response = self.client.get(source.as_str()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Http {
                status: status.as_u16(),
                message: format!("GET {} failed", source),
            });
        }

        let html = response.text().await?;
        Ok(extract_article(&html))
    }
}

/// Extracts title, paragraph text and metadata from an HTML document.
pub fn extract_article(html: &str) -> FetchedContent {
    let title = title_pattern()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| clean_text(m.as_str()))
        .unwrap_or_default();

    let body = paragraph_pattern()
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| clean_text(m.as_str()))
        .filter(|p| !p.is_empty())
        .take(MAX_PARAGRAPHS)
        .collect::<Vec<_>>()
        .join(" ");

    let mut metadata = ArticleMetadata::default();
    for tag in meta_pattern().find_iter(html) {
        let mut key = None;
        let mut content = None;
        for attr in attribute_pattern().captures_iter(tag.as_str()) {
            let name = attr[1].to_lowercase();
            let value = attr[2].trim().to_string();
            match name.as_str() {
                "name" | "property" => key = Some(value.to_lowercase()),
                "content" => content = Some(value),
                _ => {}
            }
        }

        match (key.as_deref(), content) {
            (Some("author") | Some("article:author"), Some(value)) if metadata.author.is_none() => {
                metadata.author = Some(value);
            }
            (Some("article:published_time") | Some("pubdate") | Some("date"), Some(value))
                if metadata.published_at.is_none() =>
            {
                metadata.published_at = Some(value);
            }
            _ => {}
        }
    }

    FetchedContent {
        title,
        body,
        metadata,
    }
}

fn clean_text(fragment: &str) -> String {
    let stripped = tag_pattern().replace_all(fragment, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
