//! Delivery of finalized records to downstream video systems.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::DeliveryPush;
use crate::error::{CollaboratorError, PushError};
use crate::pipeline::outcome::FinalizedRecord;

/// One channel and avatar pair a record is delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub channel: String,
    pub avatar: String,
}

impl Destination {
    pub fn new(channel: impl Into<String>, avatar: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            avatar: avatar.into(),
        }
    }

    /// Every channel paired with every avatar, channel-major.
    pub fn matrix(channels: &[String], avatars: &[String]) -> Vec<Destination> {
        channels
            .iter()
            .flat_map(|channel| avatars.iter().map(move |avatar| Destination::new(channel, avatar)))
            .collect()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.avatar)
    }
}

/// Result of delivering to one destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    Acked { push_id: Option<String> },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationOutcome {
    pub destination: Destination,
    pub status: DeliveryStatus,
}

impl DestinationOutcome {
    pub fn acked(destination: Destination, push_id: Option<String>) -> Self {
        Self {
            destination,
            status: DeliveryStatus::Acked { push_id },
        }
    }

    pub fn failed(destination: Destination, reason: impl Into<String>) -> Self {
        Self {
            destination,
            status: DeliveryStatus::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_acked(&self) -> bool {
        matches!(self.status, DeliveryStatus::Acked { .. })
    }
}

/// Per-destination results of one push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushReport {
    pub outcomes: Vec<DestinationOutcome>,
}

impl PushReport {
    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_acked()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.successful()
    }

    /// Whether at least one destination acknowledged.
    pub fn delivered(&self) -> bool {
        self.successful() > 0
    }

    /// Some destinations acknowledged and others failed.
    pub fn is_partial(&self) -> bool {
        self.successful() > 0 && self.failed() > 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.successful() as f64 / self.outcomes.len() as f64
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(default)]
    push_id: Option<String>,
}

/// Pushes records to the downstream content API, one POST per destination.
pub struct HttpPushClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpPushClient {
    /// Creates a client.
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

    async fn push_one(
        &self,
        api_key: &str,
        record: &FinalizedRecord,
        destination: &Destination,
    ) -> Result<Option<String>, CollaboratorError> {
        let url = format!("{}/api/content/push", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("X-Source", "news-forge")
            .json(&delivery_payload(record, destination))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Http {
                status: status.as_u16(),
                message,
            });
        }

        // An ack without a parseable body still counts as delivered.
        let push_id = response
            .json::<PushResponse>()
            .await
            .ok()
            .and_then(|r| r.push_id);
        Ok(push_id)
    }
}

#[async_trait]
impl DeliveryPush for HttpPushClient {
    async fn push(
        &self,
        record: &FinalizedRecord,
        destinations: &[Destination],
    ) -> Result<PushReport, PushError> {
        if destinations.is_empty() {
            return Err(PushError::NoDestinations);
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CollaboratorError::MissingCredentials("push API key"))?;

        let attempts = destinations.iter().map(|destination| async move {
            match self.push_one(api_key, record, destination).await {
                Ok(push_id) => DestinationOutcome::acked(destination.clone(), push_id),
                Err(e) => DestinationOutcome::failed(destination.clone(), e.to_string()),
            }
        });

        Ok(PushReport {
            outcomes: join_all(attempts).await,
        })
    }
}

/// JSON body sent for one destination.
pub fn delivery_payload(record: &FinalizedRecord, destination: &Destination) -> serde_json::Value {
    let script = record.script.as_ref();
    json!({
        "request": {
            "run_id": record.run_id.to_string(),
            "source": "news-forge",
            "timestamp": record.finalized_at.to_rfc3339(),
        },
        "content": {
            "id": record.item_id.to_string(),
            "type": "news_article",
            "title": record.title,
            "source_url": record.source.as_str(),
            "summary": script.map(|s| s.summary.as_str()).unwrap_or_default(),
            "categories": record.categories,
            "authenticity_score": record.authenticity,
        },
        "video_generation": {
            "channel": destination.channel,
            "avatar": destination.avatar,
            "script": script.map(|s| s.text.as_str()).unwrap_or_default(),
            "style": "news_broadcast",
        },
        "analytics": {
            "status": record.status,
            "reward_score": record.score.as_ref().map(|s| s.composite),
            "correction_attempts": record.attempts,
            "fallback_used": record.fallback_used,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_destination_matrix() {
        let matrix = Destination::matrix(&strings(&["news", "world"]), &strings(&["ava", "ben"]));
        assert_eq!(matrix.len(), 4);
        assert_eq!(matrix[0], Destination::new("news", "ava"));
        assert_eq!(matrix[1], Destination::new("news", "ben"));
        assert_eq!(matrix[3].to_string(), "world/ben");

        assert!(Destination::matrix(&[], &strings(&["ava"])).is_empty());
    }

    #[test]
    fn test_push_report_counts() {
        let report = PushReport {
            outcomes: vec![
                DestinationOutcome::acked(Destination::new("a", "x"), Some("p1".into())),
                DestinationOutcome::failed(Destination::new("b", "x"), "HTTP 503"),
            ],
        };
        assert_eq!(report.successful(), 1);
        assert_eq!(report.failed(), 1);
        assert!(report.delivered());
        assert!(report.is_partial());
        assert_eq!(report.success_rate(), 0.5);

        let empty = PushReport::default();
        assert!(!empty.delivered());
        assert_eq!(empty.success_rate(), 0.0);
    }
}
