//! Weight policies and score history.
//!
//! A [`WeightPolicy`] is a pure function from a [`ScoreHistory`] snapshot to a
//! weight set. The controller asks the policy for weights once per scoring
//! call, so every [`ScoreRecord`](super::ScoreRecord) is computed with exactly
//! one weight set.

use std::collections::VecDeque;

use super::engine::ComponentScores;
use super::weights::ScoreWeights;

/// Default number of records kept in a history window.
pub const DEFAULT_HISTORY_WINDOW: usize = 50;

/// Bounded window of recent component scores, oldest first.
#[derive(Debug, Clone)]
pub struct ScoreHistory {
    window: usize,
    entries: VecDeque<ComponentScores>,
}

impl Default for ScoreHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW)
    }
}

impl ScoreHistory {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            entries: VecDeque::with_capacity(window),
        }
    }

    /// Appends an entry, evicting the oldest once the window is full.
    pub fn push(&mut self, scores: ComponentScores) {
        if self.entries.len() == self.window {
            self.entries.pop_front();
        }
        self.entries.push_back(scores);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Mean of each component over the window.
    pub fn means(&self) -> Option<ComponentScores> {
        if self.entries.is_empty() {
            return None;
        }

        let n = self.entries.len() as f64;
        let (tone, engagement, quality) = self
            .entries
            .iter()
            .fold((0.0, 0.0, 0.0), |(t, e, q), s| {
                (t + s.tone, e + s.engagement, q + s.quality)
            });

        Some(ComponentScores::new(tone / n, engagement / n, quality / n))
    }
}

/// Chooses the weight set for the next scoring call.
pub trait WeightPolicy: Send + Sync {
    /// Short name reported in logs.
    fn name(&self) -> &'static str;

    /// Weights for the next call. Must return a normalized set and must be
    /// deterministic in `history`.
    fn weights(&self, history: &ScoreHistory) -> ScoreWeights;
}

/// Always returns the same weights.
#[derive(Debug, Clone, Default)]
pub struct FixedWeights {
    weights: ScoreWeights,
}

impl FixedWeights {
    pub fn new(weights: ScoreWeights) -> Self {
        Self {
            weights: ScoreWeights::normalized(weights.tone, weights.engagement, weights.quality),
        }
    }
}

impl WeightPolicy for FixedWeights {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn weights(&self, _history: &ScoreHistory) -> ScoreWeights {
        self.weights
    }
}

/// Shifts weight toward the component that has scored lowest recently.
///
/// Starting from the base weights, the weakest component (by window mean)
/// gains `step` and the other two each lose `step / 2`. The set is then
/// normalized with every weight held at or above `floor`. The result depends
/// only on the current window, never on earlier outputs, so it cannot drift.
#[derive(Debug, Clone)]
pub struct AdaptiveWeights {
    base: ScoreWeights,
    step: f64,
    floor: f64,
    min_samples: usize,
}

impl Default for AdaptiveWeights {
    fn default() -> Self {
        Self {
            base: ScoreWeights::default(),
            step: 0.05,
            floor: 0.1,
            min_samples: 5,
        }
    }
}

impl AdaptiveWeights {
    pub fn new(base: ScoreWeights) -> Self {
        Self {
            base,
            ..Default::default()
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step.clamp(0.0, 0.3);
        self
    }

    pub fn with_floor(mut self, floor: f64) -> Self {
        self.floor = floor.clamp(0.0, 1.0 / 3.0);
        self
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }
}

impl WeightPolicy for AdaptiveWeights {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn weights(&self, history: &ScoreHistory) -> ScoreWeights {
        if history.len() < self.min_samples.max(1) {
            return self.base;
        }
        let Some(means) = history.means() else {
            return self.base;
        };

        let mut tone = self.base.tone - self.step / 2.0;
        let mut engagement = self.base.engagement - self.step / 2.0;
        let mut quality = self.base.quality - self.step / 2.0;

        // Ties resolve in component order: tone, engagement, quality.
        let weakest = means.tone.min(means.engagement).min(means.quality);
        if means.tone == weakest {
            tone += self.step * 1.5;
        } else if means.engagement == weakest {
            engagement += self.step * 1.5;
        } else {
            quality += self.step * 1.5;
        }

        floored(ScoreWeights::normalized(tone, engagement, quality), self.floor)
    }
}

/// Raises any weight below `floor` to exactly `floor` and rescales the rest
/// so the set still sums to 1. Requires `floor <= 1/3`.
fn floored(weights: ScoreWeights, floor: f64) -> ScoreWeights {
    let mut values = [weights.tone, weights.engagement, weights.quality];
    let mut pinned = [false; 3];

    // Pinning one weight can push another under the floor; three passes
    // cover every component.
    for _ in 0..values.len() {
        let pinned_count = pinned.iter().filter(|p| **p).count();
        let free_count = values.len() - pinned_count;
        if free_count == 0 {
            break;
        }
        let budget = 1.0 - floor * pinned_count as f64;
        let free_sum: f64 = (0..values.len())
            .filter(|i| !pinned[*i])
            .map(|i| values[i])
            .sum();

        for i in 0..values.len() {
            if pinned[i] {
                values[i] = floor;
            } else if free_sum > 0.0 {
                values[i] *= budget / free_sum;
            } else {
                values[i] = budget / free_count as f64;
            }
        }

        let mut changed = false;
        for i in 0..values.len() {
            if !pinned[i] && values[i] < floor {
                pinned[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for i in 0..values.len() {
        if pinned[i] {
            values[i] = floor;
        }
    }

    ScoreWeights {
        tone: values[0],
        engagement: values[1],
        quality: values[2],
    }
}
