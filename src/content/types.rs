//! Content item data types and lifecycle state.

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// Stable identifier of a content item, derived from its source URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Derives the identifier for a source: the same URL always maps to the
    /// same item.
    pub fn for_source(source: &SourceRef) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, source.as_str().as_bytes()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A validated reference to an article: an absolute http(s) URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceRef(Url);

impl SourceRef {
    /// Parses and validates a source reference.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidSource` for empty input, unparseable
    /// URLs, non-http(s) schemes or URLs without a host.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::InvalidSource("URL is required".to_string()));
        }

        let mut url = Url::parse(trimmed)
            .map_err(|e| PipelineError::InvalidSource(format!("{}: {}", trimmed, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::InvalidSource(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(PipelineError::InvalidSource(format!(
                "{} has no host",
                trimmed
            )));
        }

        // Fragments never change the fetched document.
        url.set_fragment(None);
        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl TryFrom<String> for SourceRef {
    type Error = PipelineError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<SourceRef> for String {
    fn from(source: SourceRef) -> Self {
        source.0.into()
    }
}

/// Author and publication metadata extracted by Fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub author: Option<String>,
    pub published_at: Option<String>,
}

/// Raw article payload produced by Fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub title: String,
    pub body: String,
    pub metadata: ArticleMetadata,
    pub fetched_at: DateTime<Utc>,
}

impl Payload {
    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }
}

/// Where an analysis result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    /// The external text service answered.
    Service,
    /// A deterministic local heuristic stood in for the service.
    Fallback,
}

impl AnalysisSource {
    pub fn is_fallback(self) -> bool {
        self == AnalysisSource::Fallback
    }
}

/// Relevance decision produced by Filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relevance {
    pub relevant: bool,
    pub categories: Vec<String>,
    /// Keyword and length pre-screen, 0-100.
    pub prescreen_score: u8,
    pub source: AnalysisSource,
}

/// Signed sentiment of the article body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    /// In [-1, 1]; 0 is neutral.
    pub polarity: f64,
    /// In [0, 1].
    pub confidence: f64,
    pub source: AnalysisSource,
}

impl Sentiment {
    pub fn neutral(source: AnalysisSource) -> Self {
        Self {
            polarity: 0.0,
            confidence: 0.0,
            source,
        }
    }
}

/// Coarse credibility band derived from the authenticity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credibility {
    High,
    Medium,
    Low,
}

impl Credibility {
    pub fn from_authenticity(score: f64) -> Self {
        if score >= 80.0 {
            Credibility::High
        } else if score >= 60.0 {
            Credibility::Medium
        } else {
            Credibility::Low
        }
    }
}

/// Authenticity assessment produced by Verify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    /// In [0, 100].
    pub authenticity: f64,
    pub credibility: Credibility,
    pub sentiment: Sentiment,
    pub fallback_used: bool,
}

/// Generated video script produced by Script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub text: String,
    pub summary: String,
    pub fallback_used: bool,
    /// Correction cycle this script was generated in (0 for the first pass).
    pub attempt: u32,
}

impl Script {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Accepted,
    Degraded,
    Rejected,
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalStatus::Accepted => write!(f, "accepted"),
            FinalStatus::Degraded => write!(f, "degraded"),
            FinalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Pipeline lifecycle state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Start,
    Fetching,
    Filtering,
    Verifying,
    Scripting,
    Scoring,
    Correcting,
    Finalized(FinalStatus),
}

impl PipelineState {
    pub fn is_finalized(&self) -> bool {
        matches!(self, PipelineState::Finalized(_))
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (*self, next) {
            (Finalized(_), _) => false,
            (_, Finalized(FinalStatus::Rejected)) => true,
            (Start, Fetching)
            | (Fetching, Filtering)
            | (Filtering, Verifying)
            | (Verifying, Scripting)
            | (Scripting, Scoring)
            | (Scoring, Correcting)
            | (Correcting, Scripting)
            | (Scoring, Finalized(FinalStatus::Accepted))
            | (Scoring, Finalized(FinalStatus::Degraded)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Start => write!(f, "start"),
            PipelineState::Fetching => write!(f, "fetching"),
            PipelineState::Filtering => write!(f, "filtering"),
            PipelineState::Verifying => write!(f, "verifying"),
            PipelineState::Scripting => write!(f, "scripting"),
            PipelineState::Scoring => write!(f, "scoring"),
            PipelineState::Correcting => write!(f, "correcting"),
            PipelineState::Finalized(status) => write!(f, "finalized({})", status),
        }
    }
}

/// One article through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ItemId,
    pub source: SourceRef,
    pub created_at: DateTime<Utc>,
    payload: Option<Payload>,
    relevance: Option<Relevance>,
    verification: Option<Verification>,
    script: Option<Script>,
    state: PipelineState,
    attempts: u32,
    max_attempts: u32,
}

impl ContentItem {
    /// Creates a fresh item in the `Start` state.
    pub fn new(source: SourceRef, max_attempts: u32) -> Self {
        Self {
            id: ItemId::for_source(&source),
            source,
            created_at: Utc::now(),
            payload: None,
            relevance: None,
            verification: None,
            script: None,
            state: PipelineState::Start,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn relevance(&self) -> Option<&Relevance> {
        self.relevance.as_ref()
    }

    pub fn verification(&self) -> Option<&Verification> {
        self.verification.as_ref()
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Correction cycles consumed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn title(&self) -> &str {
        self.payload.as_ref().map_or("", |p| p.title.as_str())
    }

    pub fn body(&self) -> &str {
        self.payload.as_ref().map_or("", |p| p.body.as_str())
    }

    /// Authenticity on the 0-100 scale, 0 until Verify has run.
    pub fn authenticity(&self) -> f64 {
        self.verification.as_ref().map_or(0.0, |v| v.authenticity)
    }

    /// Whether any stage substituted a local fallback for a collaborator.
    pub fn fallback_used(&self) -> bool {
        self.relevance
            .as_ref()
            .is_some_and(|r| r.source.is_fallback())
            || self.verification.as_ref().is_some_and(|v| v.fallback_used)
            || self.script.as_ref().is_some_and(|s| s.fallback_used)
    }

    fn ensure_open(&self) -> Result<(), PipelineError> {
        if self.state.is_finalized() {
            return Err(PipelineError::ItemFinalized(self.id));
        }
        Ok(())
    }

    /// Moves the item to `next`. Illegal transitions are programming errors
    /// and are reported as faults by the controller.
    pub(crate) fn transition(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        self.ensure_open()?;
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition(format!(
                "illegal transition {} -> {}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub(crate) fn apply_payload(&mut self, payload: Payload) -> Result<(), PipelineError> {
        self.ensure_open()?;
        write_once(&mut self.payload, payload, self.id, "payload")
    }

    pub(crate) fn apply_relevance(&mut self, relevance: Relevance) -> Result<(), PipelineError> {
        self.ensure_open()?;
        write_once(&mut self.relevance, relevance, self.id, "relevance")
    }

    pub(crate) fn apply_verification(
        &mut self,
        verification: Verification,
    ) -> Result<(), PipelineError> {
        self.ensure_open()?;
        write_once(&mut self.verification, verification, self.id, "verification")
    }

    pub(crate) fn apply_script(&mut self, script: Script) -> Result<(), PipelineError> {
        self.ensure_open()?;
        write_once(&mut self.script, script, self.id, "script")
    }

    /// Starts a correction cycle: consumes one attempt and clears the script
    /// so the next Scripting pass can write it again.
    ///
    /// Returns `false` without changing anything once attempts are exhausted.
    pub(crate) fn begin_correction(&mut self) -> Result<bool, PipelineError> {
        self.ensure_open()?;
        if self.attempts >= self.max_attempts {
            return Ok(false);
        }
        self.attempts += 1;
        self.script = None;
        Ok(true)
    }

    /// Puts back the script of an earlier attempt before finalizing.
    pub(crate) fn restore_script(&mut self, script: Script) -> Result<(), PipelineError> {
        self.ensure_open()?;
        self.script = Some(script);
        Ok(())
    }
}

/// Stores `value` in an empty slot; a second write is an error.
fn write_once<T>(
    slot: &mut Option<T>,
    value: T,
    item_id: ItemId,
    field: &'static str,
) -> Result<(), PipelineError> {
    if slot.is_some() {
        return Err(PipelineError::FieldAlreadySet { item_id, field });
    }
    *slot = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceRef {
        SourceRef::parse("https://news.example.com/world/story-1#comments").unwrap()
    }

    fn payload() -> Payload {
        Payload {
            title: "Council approves budget".into(),
            body: "The council approved the budget today.".into(),
            metadata: ArticleMetadata::default(),
            fetched_at: Utc::now(),
        }
    }

    fn script(attempt: u32) -> Script {
        Script {
            text: format!("draft {}", attempt),
            summary: String::new(),
            fallback_used: false,
            attempt,
        }
    }

    #[test]
    fn test_source_ref_validation() {
        assert!(SourceRef::parse("").is_err());
        assert!(SourceRef::parse("   ").is_err());
        assert!(SourceRef::parse("not a url").is_err());
        assert!(SourceRef::parse("ftp://example.com/file").is_err());
        assert!(SourceRef::parse("https://example.com/a").is_ok());
    }

    #[test]
    fn test_source_ref_drops_fragment() {
        assert_eq!(source().as_str(), "https://news.example.com/world/story-1");
    }

    #[test]
    fn test_source_ref_serializes_as_string() {
        let json = serde_json::to_value(source()).unwrap();
        assert_eq!(json, "https://news.example.com/world/story-1");

        let bad: Result<SourceRef, _> = serde_json::from_str("\"ftp://example.com/a\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_item_id_is_stable() {
        let a = ItemId::for_source(&source());
        let b = ItemId::for_source(&SourceRef::parse("https://news.example.com/world/story-1").unwrap());
        let c = ItemId::for_source(&SourceRef::parse("https://news.example.com/other").unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_state_transitions() {
        use PipelineState::*;
        assert!(Start.can_transition_to(Fetching));
        assert!(Scoring.can_transition_to(Correcting));
        assert!(Correcting.can_transition_to(Scripting));
        assert!(Fetching.can_transition_to(Finalized(FinalStatus::Rejected)));
        assert!(!Correcting.can_transition_to(Verifying));
        assert!(!Start.can_transition_to(Scripting));
        assert!(!Fetching.can_transition_to(Finalized(FinalStatus::Accepted)));
        assert!(!Finalized(FinalStatus::Accepted).can_transition_to(Scripting));
    }

    #[test]
    fn test_fields_written_once() {
        let mut item = ContentItem::new(source(), 3);
        item.apply_payload(payload()).unwrap();

        let mut other = payload();
        other.title = "Replaced".into();
        let err = item.apply_payload(other).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::FieldAlreadySet {
                field: "payload",
                ..
            }
        ));
        assert_eq!(item.title(), "Council approves budget");

        item.apply_script(script(0)).unwrap();
        assert!(item.apply_script(script(1)).is_err());
        assert_eq!(item.script().map(|s| s.attempt), Some(0));
    }

    #[test]
    fn test_correction_is_capped() {
        let mut item = ContentItem::new(source(), 2);
        item.apply_script(script(0)).unwrap();

        assert!(item.begin_correction().unwrap());
        assert!(item.script().is_none());
        assert!(item.begin_correction().unwrap());
        assert!(!item.begin_correction().unwrap());
        assert_eq!(item.attempts(), 2);
    }

    #[test]
    fn test_finalized_item_is_immutable() {
        let mut item = ContentItem::new(source(), 3);
        item.transition(PipelineState::Fetching).unwrap();
        item.transition(PipelineState::Finalized(FinalStatus::Rejected))
            .unwrap();

        assert!(matches!(
            item.apply_payload(payload()),
            Err(PipelineError::ItemFinalized(_))
        ));
        assert!(item.begin_correction().is_err());
        assert!(item.transition(PipelineState::Filtering).is_err());
        assert!(item.payload().is_none());
    }

    #[test]
    fn test_fallback_flag_aggregates_stages() {
        let mut item = ContentItem::new(source(), 3);
        assert!(!item.fallback_used());

        item.apply_verification(Verification {
            authenticity: 70.0,
            credibility: Credibility::Medium,
            sentiment: Sentiment::neutral(AnalysisSource::Fallback),
            fallback_used: true,
        })
        .unwrap();
        assert!(item.fallback_used());
    }

    #[test]
    fn test_credibility_bands() {
        assert_eq!(Credibility::from_authenticity(85.0), Credibility::High);
        assert_eq!(Credibility::from_authenticity(60.0), Credibility::Medium);
        assert_eq!(Credibility::from_authenticity(59.9), Credibility::Low);
    }
}
