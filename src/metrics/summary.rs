//! Aggregate feedback statistics over score records.

use serde::{Deserialize, Serialize};

use crate::scoring::ScoreRecord;

/// Count of records per composite band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreDistribution {
    /// Composite >= 0.8.
    pub excellent: usize,
    /// 0.6 <= composite < 0.8.
    pub good: usize,
    /// 0.4 <= composite < 0.6.
    pub needs_improvement: usize,
    /// Composite < 0.4.
    pub poor: usize,
}

impl ScoreDistribution {
    fn add(&mut self, composite: f64) {
        if composite >= 0.8 {
            self.excellent += 1;
        } else if composite >= 0.6 {
            self.good += 1;
        } else if composite >= 0.4 {
            self.needs_improvement += 1;
        } else {
            self.poor += 1;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub total: usize,
    pub average_composite: f64,
    pub average_tone: f64,
    pub average_engagement: f64,
    pub average_quality: f64,
    /// Share of records that were rejected and called for a correction.
    pub correction_rate: f64,
    pub distribution: ScoreDistribution,
}

impl FeedbackSummary {
    pub fn from_records(records: &[ScoreRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let n = records.len() as f64;
        let mut summary = Self {
            total: records.len(),
            ..Self::default()
        };
        let mut rejected = 0usize;

        for record in records {
            summary.average_composite += record.composite;
            summary.average_tone += record.components.tone;
            summary.average_engagement += record.components.engagement;
            summary.average_quality += record.components.quality;
            if !record.accepted {
                rejected += 1;
            }
            summary.distribution.add(record.composite);
        }

        summary.average_composite /= n;
        summary.average_tone /= n;
        summary.average_engagement /= n;
        summary.average_quality /= n;
        summary.correction_rate = rejected as f64 / n;
        summary
    }
}
