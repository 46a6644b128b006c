//! Component score heuristics.
//!
//! Each function is total over its inputs and returns a value in [0, 1].
//! Phrase matching is case-insensitive substring matching.

use serde::{Deserialize, Serialize};

/// Words that push a script away from a neutral news register.
pub const EMOTIONAL_MARKERS: &[&str] = &[
    "shocking",
    "outrageous",
    "unbelievable",
    "devastating",
    "incredible",
];

/// Attribution phrases typical of neutral reporting.
pub const NEUTRAL_MARKERS: &[&str] = &[
    "according to",
    "reported",
    "stated",
    "confirmed",
    "announced",
];

/// Title words that draw attention.
pub const ATTENTION_MARKERS: &[&str] = &["breaking", "urgent", "exclusive", "major", "crisis", "update"];

/// Closing phrases that invite the viewer to keep watching.
pub const CALL_TO_ACTION_MARKERS: &[&str] = &[
    "stay tuned",
    "more updates",
    "follow for more",
    "breaking news",
];

/// Body phrases signalling fresh news.
pub const FRESHNESS_MARKERS: &[&str] = &["today", "yesterday", "this morning", "just now", "breaking"];

/// Phrases attributing a claim to a source.
pub const ATTRIBUTION_MARKERS: &[&str] = &[
    "according to",
    "source said",
    "reported by",
    "official statement",
];

const ENGAGEMENT_BASE: f64 = 0.4;
const ENGAGEMENT_LENGTH_SHARE: f64 = 0.3;

/// Target script length in words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordBand {
    pub min: usize,
    pub max: usize,
}

impl Default for WordBand {
    fn default() -> Self {
        Self { min: 20, max: 160 }
    }
}

impl WordBand {
    pub fn contains(&self, words: usize) -> bool {
        words >= self.min && words <= self.max
    }

    /// 1.0 inside the band, decaying proportionally outside it.
    pub fn fit(&self, words: usize) -> f64 {
        if words == 0 {
            0.0
        } else if words < self.min {
            words as f64 / self.min.max(1) as f64
        } else if words > self.max {
            self.max as f64 / words as f64
        } else {
            1.0
        }
    }
}

/// Counts how many of `markers` appear in `text`.
pub fn count_markers(text: &str, markers: &[&str]) -> usize {
    let lower = text.to_lowercase();
    markers.iter().filter(|m| lower.contains(*m)).count()
}

/// Tone score.
///
/// Starts from `1 - |polarity|` so neutral coverage scores highest, then
/// nudges by the register of the script itself: a script dominated by
/// emotional markers loses 0.1, one that carries neutral attribution gains
/// 0.05.
pub fn tone_score(polarity: f64, script: &str) -> f64 {
    let polarity = if polarity.is_finite() {
        polarity.clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let mut score = 1.0 - polarity.abs();

    let emotional = count_markers(script, EMOTIONAL_MARKERS);
    let neutral = count_markers(script, NEUTRAL_MARKERS);
    if emotional > neutral {
        score -= 0.1;
    } else if neutral > 0 {
        score += 0.05;
    }

    score.clamp(0.0, 1.0)
}

/// Engagement score from surface features of the script and title.
pub fn engagement_score(title: &str, body: &str, script: &str, band: WordBand) -> f64 {
    let words = script.split_whitespace().count();
    let mut score = ENGAGEMENT_BASE + ENGAGEMENT_LENGTH_SHARE * band.fit(words);

    score += (count_markers(title, ATTENTION_MARKERS) as f64 * 0.05).min(0.15);
    score += (count_markers(script, CALL_TO_ACTION_MARKERS) as f64 * 0.05).min(0.1);
    score += (count_markers(body, FRESHNESS_MARKERS) as f64 * 0.03).min(0.1);

    if words == 0 {
        // Nothing to watch.
        score = 0.0;
    }

    score.clamp(0.0, 1.0)
}

/// Quality score from authenticity (0-100), structural completeness and
/// source attribution.
pub fn quality_score(authenticity: f64, title: &str, body: &str, script: &str) -> f64 {
    let authenticity = if authenticity.is_finite() {
        (authenticity / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let present = [title, body, script]
        .iter()
        .filter(|part| !part.trim().is_empty())
        .count();
    let completeness = present as f64 / 3.0;

    let attribution = (count_markers(body, ATTRIBUTION_MARKERS) as f64 * 0.05).min(0.1);

    (authenticity * 0.5 + completeness * 0.4 + attribution).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_favors_neutral() {
        let neutral = tone_score(0.0, "The ministry announced new rules.");
        let charged = tone_score(0.8, "The ministry announced new rules.");
        assert!(neutral > charged);
        assert_eq!(neutral, 1.0);
    }

    #[test]
    fn test_tone_penalizes_emotional_script() {
        let calm = tone_score(0.2, "Officials confirmed the figures.");
        let loud = tone_score(0.2, "Shocking and devastating figures!");
        assert!(calm > loud);
        assert!((loud - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_tone_handles_out_of_range_polarity() {
        assert_eq!(tone_score(5.0, ""), 0.0);
        assert_eq!(tone_score(f64::NAN, ""), 1.0);
    }

    #[test]
    fn test_word_band_fit() {
        let band = WordBand { min: 10, max: 20 };
        assert_eq!(band.fit(0), 0.0);
        assert_eq!(band.fit(5), 0.5);
        assert_eq!(band.fit(15), 1.0);
        assert_eq!(band.fit(40), 0.5);
        assert!(band.contains(10) && band.contains(20) && !band.contains(21));
    }

    #[test]
    fn test_engagement_rewards_markers() {
        let band = WordBand { min: 3, max: 50 };
        let plain = engagement_score("Council meets", "", "The council met and voted.", band);
        let marked = engagement_score(
            "Breaking: major update",
            "It happened today.",
            "The council met and voted. Stay tuned for more updates.",
            band,
        );
        assert!(marked > plain);
        assert!(marked <= 1.0);
    }

    #[test]
    fn test_engagement_empty_script_is_zero() {
        assert_eq!(engagement_score("Breaking", "today", "", WordBand::default()), 0.0);
    }

    #[test]
    fn test_quality_components() {
        let full = quality_score(100.0, "Title", "According to officials, it rained.", "Script");
        assert!((full - 0.95).abs() < 1e-9);

        let hollow = quality_score(0.0, "", "", "");
        assert_eq!(hollow, 0.0);

        let partial = quality_score(50.0, "Title", "", "");
        assert!(partial > 0.0 && partial < full);
    }
}
