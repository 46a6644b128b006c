//! High-level interface for recording pipeline metrics into Prometheus.
//!
//! The `MetricsCollector` wraps the raw metric statics with consistent
//! labels. Every method silently does nothing until
//! [`init_metrics`](super::init_metrics) has run, so library users and tests
//! never need a registry.

use super::prometheus::{
    COMPOSITE_REWARD, CORRECTIONS_TOTAL, DELIVERIES_TOTAL, DISPATCH_QUEUE_DEPTH, DISPATCH_RUNNING,
    FALLBACKS_TOTAL, RUNS_FINALIZED_TOTAL, STATE_DURATION, TRANSITIONS_TOTAL,
};
use crate::collaborators::PushReport;
use crate::content::FinalStatus;

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record leaving a pipeline state.
    ///
    /// # Arguments
    ///
    /// * `state` - State that was left (e.g. "verifying")
    /// * `outcome` - How it ended (e.g. "succeeded", "fallback", "failed")
    /// * `duration_secs` - Time spent in the state
    pub fn record_transition(&self, state: &str, outcome: &str, duration_secs: f64) {
        if let Some(transitions) = TRANSITIONS_TOTAL.get() {
            transitions.with_label_values(&[state, outcome]).inc();
        }

        if let Some(duration) = STATE_DURATION.get() {
            duration.with_label_values(&[state]).observe(duration_secs);
        }

        if outcome == "fallback" {
            if let Some(fallbacks) = FALLBACKS_TOTAL.get() {
                fallbacks.with_label_values(&[state]).inc();
            }
        }

        tracing::trace!(
            state = state,
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded transition metric"
        );
    }

    pub fn record_score(&self, composite: f64) {
        if let Some(reward) = COMPOSITE_REWARD.get() {
            reward.observe(composite);
        }
    }

    pub fn record_correction(&self) {
        if let Some(corrections) = CORRECTIONS_TOTAL.get() {
            corrections.inc();
        }
    }

    pub fn record_finalized(&self, status: FinalStatus) {
        if let Some(runs) = RUNS_FINALIZED_TOTAL.get() {
            runs.with_label_values(&[&status.to_string()]).inc();
        }
    }

    /// Record one counter increment per destination in a push report.
    pub fn record_delivery(&self, report: &PushReport) {
        if let Some(deliveries) = DELIVERIES_TOTAL.get() {
            deliveries
                .with_label_values(&["acked"])
                .inc_by(report.successful() as f64);
            deliveries
                .with_label_values(&["failed"])
                .inc_by(report.failed() as f64);
        }
    }

    /// Update the dispatcher gauges.
    pub fn set_dispatcher_load(&self, queued: usize, running: usize) {
        if let Some(depth) = DISPATCH_QUEUE_DEPTH.get() {
            depth.set(queued as f64);
        }
        if let Some(gauge) = DISPATCH_RUNNING.get() {
            gauge.set(running as f64);
        }
    }
}
