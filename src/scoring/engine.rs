//! The scoring engine and score records.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::features::{engagement_score, quality_score, tone_score, WordBand};
use super::weights::ScoreWeights;
use crate::content::{ContentItem, ItemId, Script};

/// Composite reward at or above which a script is accepted.
pub const DEFAULT_ACCEPT_THRESHOLD: f64 = 0.6;

/// The three component scores of one evaluation, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub tone: f64,
    pub engagement: f64,
    pub quality: f64,
}

impl ComponentScores {
    pub fn new(tone: f64, engagement: f64, quality: f64) -> Self {
        Self {
            tone: clamp_unit(tone),
            engagement: clamp_unit(engagement),
            quality: clamp_unit(quality),
        }
    }

    /// All three components set to the same value.
    pub fn uniform(value: f64) -> Self {
        Self::new(value, value, value)
    }
}

/// Result of one scoring evaluation.
///
/// Records are never edited. Scoring the same script again produces a new,
/// identical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub item_id: ItemId,
    /// Correction cycle the scored script belongs to.
    pub attempt: u32,
    pub components: ComponentScores,
    /// Weights the composite was computed with.
    pub weights: ScoreWeights,
    pub composite: f64,
    pub threshold: f64,
    pub accepted: bool,
    /// SHA-256 over title, body, script and weights.
    pub input_digest: String,
}

impl ScoreRecord {
    /// Assembles a record from already computed components.
    pub fn from_components(
        item: &ContentItem,
        script: &Script,
        components: ComponentScores,
        weights: ScoreWeights,
        threshold: f64,
    ) -> Self {
        let composite = clamp_unit(weights.apply(
            components.tone,
            components.engagement,
            components.quality,
        ));

        Self {
            item_id: item.id,
            attempt: script.attempt,
            components,
            weights,
            composite,
            threshold,
            accepted: composite >= threshold,
            input_digest: input_digest(item.title(), item.body(), &script.text, &weights),
        }
    }

    /// Storage key: one record per item, run and attempt. Re-running a
    /// source adds records instead of replacing earlier ones.
    pub fn key(&self, run_id: Uuid) -> String {
        format!("{}:{}:{}", self.item_id, run_id, self.attempt)
    }
}

/// Computes a score record for a script.
///
/// Implementations must be deterministic and free of side effects.
pub trait Scorer: Send + Sync {
    fn score(&self, item: &ContentItem, script: &Script, weights: &ScoreWeights) -> ScoreRecord;
}

/// Heuristic scorer over observable content features.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    threshold: f64,
    band: WordBand,
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(DEFAULT_ACCEPT_THRESHOLD, WordBand::default())
    }
}

impl ScoringEngine {
    pub fn new(threshold: f64, band: WordBand) -> Self {
        Self {
            threshold: clamp_unit(threshold),
            band,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Computes the component scores without building a record.
    pub fn components(&self, item: &ContentItem, script: &Script) -> ComponentScores {
        let polarity = item
            .verification()
            .map_or(0.0, |v| v.sentiment.polarity);

        ComponentScores::new(
            tone_score(polarity, &script.text),
            engagement_score(item.title(), item.body(), &script.text, self.band),
            quality_score(item.authenticity(), item.title(), item.body(), &script.text),
        )
    }
}

impl Scorer for ScoringEngine {
    fn score(&self, item: &ContentItem, script: &Script, weights: &ScoreWeights) -> ScoreRecord {
        let components = self.components(item, script);
        ScoreRecord::from_components(item, script, components, *weights, self.threshold)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn input_digest(title: &str, body: &str, script: &str, weights: &ScoreWeights) -> String {
    let mut hasher = Sha256::new();
    for part in [title, body, script] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.update(weights.tone.to_le_bytes());
    hasher.update(weights.engagement.to_le_bytes());
    hasher.update(weights.quality.to_le_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{
        AnalysisSource, ArticleMetadata, Credibility, Payload, Sentiment, SourceRef, Verification,
    };
    use chrono::Utc;

    fn verified_item(polarity: f64, authenticity: f64) -> ContentItem {
        let source = SourceRef::parse("https://news.example.com/a").unwrap();
        let mut item = ContentItem::new(source, 3);
        item.apply_payload(Payload {
            title: "Breaking: council passes budget update".into(),
            body: "According to officials, the council passed the budget today.".into(),
            metadata: ArticleMetadata::default(),
            fetched_at: Utc::now(),
        })
        .unwrap();
        item.apply_verification(Verification {
            authenticity,
            credibility: Credibility::from_authenticity(authenticity),
            sentiment: Sentiment {
                polarity,
                confidence: 0.9,
                source: AnalysisSource::Service,
            },
            fallback_used: false,
        })
        .unwrap();
        item
    }

    fn script(text: &str) -> Script {
        Script {
            text: text.into(),
            summary: String::new(),
            fallback_used: false,
            attempt: 0,
        }
    }

    const GOOD_SCRIPT: &str = "Breaking News: the council passed the budget today, \
        according to officials who confirmed the vote after a long session. \
        Spending on schools and transit rises next year. Stay tuned for more updates.";

    #[test]
    fn test_score_is_deterministic() {
        let engine = ScoringEngine::default();
        let item = verified_item(0.1, 85.0);
        let script = script(GOOD_SCRIPT);
        let weights = ScoreWeights::default();

        let first = engine.score(&item, &script, &weights);
        for _ in 0..10 {
            assert_eq!(engine.score(&item, &script, &weights), first);
        }
    }

    #[test]
    fn test_composite_within_unit_interval() {
        let engine = ScoringEngine::default();
        for (polarity, authenticity) in [(-1.0, 0.0), (0.0, 100.0), (0.5, 50.0), (1.0, 100.0)] {
            let item = verified_item(polarity, authenticity);
            for text in ["", "short", GOOD_SCRIPT] {
                let record = engine.score(&item, &script(text), &ScoreWeights::default());
                assert!((0.0..=1.0).contains(&record.composite));
            }
        }
    }

    #[test]
    fn test_good_script_is_accepted() {
        let engine = ScoringEngine::default();
        let record = engine.score(
            &verified_item(0.0, 90.0),
            &script(GOOD_SCRIPT),
            &ScoreWeights::default(),
        );
        assert!(record.accepted, "composite was {}", record.composite);
        assert_eq!(record.weights, ScoreWeights::default());
    }

    #[test]
    fn test_empty_script_is_rejected() {
        let engine = ScoringEngine::default();
        let record = engine.score(&verified_item(0.0, 90.0), &script(""), &ScoreWeights::default());
        assert!(!record.accepted);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let item = verified_item(0.0, 90.0);
        let record = ScoreRecord::from_components(
            &item,
            &script("x"),
            ComponentScores::uniform(0.6),
            ScoreWeights::default(),
            DEFAULT_ACCEPT_THRESHOLD,
        );
        assert!((record.composite - 0.6).abs() < 1e-9);
        assert_eq!(record.accepted, record.composite >= DEFAULT_ACCEPT_THRESHOLD);
    }

    #[test]
    fn test_weights_change_digest() {
        let engine = ScoringEngine::default();
        let item = verified_item(0.0, 90.0);
        let script = script(GOOD_SCRIPT);

        let a = engine.score(&item, &script, &ScoreWeights::default());
        let b = engine.score(&item, &script, &ScoreWeights::normalized(0.5, 0.25, 0.25));
        assert_ne!(a.input_digest, b.input_digest);
        assert_eq!(a.input_digest.len(), 64);
    }

    #[test]
    fn test_key_separates_runs() {
        let engine = ScoringEngine::default();
        let item = verified_item(0.0, 90.0);
        let record = engine.score(&item, &script(GOOD_SCRIPT), &ScoreWeights::default());

        let first = record.key(Uuid::new_v4());
        let second = record.key(Uuid::new_v4());
        assert_ne!(first, second);
        assert!(first.starts_with(&item.id.to_string()));
        assert!(first.ends_with(":0"));
    }
}
