//! Reward scoring for generated scripts.
//!
//! The [`ScoringEngine`] maps an item and a candidate script to a
//! [`ScoreRecord`]: three component scores in [0, 1], a weighted composite
//! and an accept/reject decision against a fixed threshold. Scoring is a pure
//! function. It performs no I/O and holds no state, so the same inputs and
//! weights always produce the same record.
//!
//! Weights come from a [`WeightPolicy`]. [`FixedWeights`] always returns
//! 0.3/0.4/0.3; [`AdaptiveWeights`] derives a weight set from a bounded
//! [`ScoreHistory`] window. Whichever policy is used, every record reports the
//! exact weights it was computed with.
//!
//! # Example
//!
//! ```ignore
//! use news_forge::scoring::{Scorer, ScoringEngine, ScoreWeights};
//!
//! let engine = ScoringEngine::default();
//! let record = engine.score(&item, &script, &ScoreWeights::default());
//! if record.accepted {
//!     println!("accepted with {:.2}", record.composite);
//! }
//! ```

pub mod adaptation;
pub mod engine;
pub mod features;
pub mod weights;

pub use adaptation::{AdaptiveWeights, FixedWeights, ScoreHistory, WeightPolicy};
pub use engine::{ComponentScores, ScoreRecord, Scorer, ScoringEngine, DEFAULT_ACCEPT_THRESHOLD};
pub use weights::ScoreWeights;
