//! Component weight sets.

use serde::{Deserialize, Serialize};

/// Default weight of the tone component.
pub const DEFAULT_TONE_WEIGHT: f64 = 0.3;

/// Default weight of the engagement component.
pub const DEFAULT_ENGAGEMENT_WEIGHT: f64 = 0.4;

/// Default weight of the quality component.
pub const DEFAULT_QUALITY_WEIGHT: f64 = 0.3;

/// Tolerance used when checking that weights sum to one.
const SUM_TOLERANCE: f64 = 1e-9;

/// Weights applied to tone, engagement and quality when computing a composite.
///
/// A weight set is always normalized: every weight is non-negative and the
/// three sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub tone: f64,
    pub engagement: f64,
    pub quality: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            tone: DEFAULT_TONE_WEIGHT,
            engagement: DEFAULT_ENGAGEMENT_WEIGHT,
            quality: DEFAULT_QUALITY_WEIGHT,
        }
    }
}

impl ScoreWeights {
    /// Builds a weight set from raw values, clamping negatives to zero and
    /// renormalizing to sum 1.0. An all-zero input yields the defaults.
    pub fn normalized(tone: f64, engagement: f64, quality: f64) -> Self {
        let tone = sanitize(tone);
        let engagement = sanitize(engagement);
        let quality = sanitize(quality);
        let sum = tone + engagement + quality;

        if sum <= 0.0 {
            return Self::default();
        }

        Self {
            tone: tone / sum,
            engagement: engagement / sum,
            quality: quality / sum,
        }
    }

    pub fn sum(&self) -> f64 {
        self.tone + self.engagement + self.quality
    }

    pub fn is_normalized(&self) -> bool {
        self.tone >= 0.0
            && self.engagement >= 0.0
            && self.quality >= 0.0
            && (self.sum() - 1.0).abs() < SUM_TOLERANCE
    }

    /// Weighted sum of the three components.
    pub fn apply(&self, tone: f64, engagement: f64, quality: f64) -> f64 {
        tone * self.tone + engagement * self.engagement + quality * self.quality
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let weights = ScoreWeights::default();
        assert!(weights.is_normalized());
        assert!((weights.apply(1.0, 1.0, 1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalized_rescales() {
        let weights = ScoreWeights::normalized(1.0, 2.0, 1.0);
        assert!(weights.is_normalized());
        assert!((weights.engagement - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_normalized_rejects_garbage() {
        assert_eq!(ScoreWeights::normalized(0.0, 0.0, 0.0), ScoreWeights::default());

        let weights = ScoreWeights::normalized(f64::NAN, -1.0, 2.0);
        assert!(weights.is_normalized());
        assert_eq!(weights.quality, 1.0);
    }
}
