//! Pipeline metrics.
//!
//! Two layers:
//! - [`MetricsRecorder`]: the append-only, per-run transition log with a live
//!   stream, owned by the pipeline context
//! - Prometheus: process-wide counters and histograms, written through
//!   [`MetricsCollector`] and exported as text
//!
//! # Example
//!
//! ```ignore
//! use news_forge::metrics::{export_metrics, init_metrics};
//!
//! init_metrics()?;
//! // ... run pipelines ...
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;
pub mod recorder;
pub mod summary;

pub use collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics, REGISTRY};
pub use recorder::{MetricEntry, MetricsRecorder, StateSummary, Transition, TransitionOutcome};
pub use summary::{FeedbackSummary, ScoreDistribution};
