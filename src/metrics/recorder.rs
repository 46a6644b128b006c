//! Append-only log of pipeline state transitions.
//!
//! Every transition a run makes produces one [`MetricEntry`]. Entries are
//! numbered under a single lock, so concurrent runs never interleave inside
//! an entry and the live stream observes entries in log order. Nothing here
//! feeds back into pipeline decisions.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::collectors::MetricsCollector;
use crate::content::{ItemId, PipelineState};

/// Live stream buffer; slow subscribers see `Lagged` rather than blocking
/// the pipeline.
const STREAM_CAPACITY: usize = 1024;

/// How a pipeline state was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    Succeeded,
    /// Succeeded using a local fallback for a collaborator.
    Fallback,
    /// Scoring accepted the script.
    Accepted,
    /// Scoring rejected the script, or a stage rejected the item.
    Rejected,
    /// An executor fault.
    Failed,
    Cancelled,
}

impl TransitionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionOutcome::Succeeded => "succeeded",
            TransitionOutcome::Fallback => "fallback",
            TransitionOutcome::Accepted => "accepted",
            TransitionOutcome::Rejected => "rejected",
            TransitionOutcome::Failed => "failed",
            TransitionOutcome::Cancelled => "cancelled",
        }
    }
}

/// A transition about to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub run_id: Uuid,
    pub item_id: ItemId,
    pub state: PipelineState,
    pub next: PipelineState,
    pub outcome: TransitionOutcome,
    pub duration: Duration,
    pub score: Option<f64>,
}

impl Transition {
    pub fn new(
        run_id: Uuid,
        item_id: ItemId,
        state: PipelineState,
        next: PipelineState,
        outcome: TransitionOutcome,
        duration: Duration,
    ) -> Self {
        Self {
            run_id,
            item_id,
            state,
            next,
            outcome,
            duration,
            score: None,
        }
    }

    pub fn with_score(mut self, composite: f64) -> Self {
        self.score = Some(composite);
        self
    }
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    /// Position in the log, starting at 0.
    pub seq: u64,
    pub run_id: Uuid,
    pub item_id: ItemId,
    /// State that was left.
    pub state: PipelineState,
    pub next: PipelineState,
    pub outcome: TransitionOutcome,
    pub duration_ms: u64,
    /// Composite reward, on transitions out of `Scoring`.
    pub score: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregates over every entry that left one state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSummary {
    pub state: PipelineState,
    pub count: u64,
    pub failures: u64,
    pub fallbacks: u64,
    pub mean_duration: Duration,
}

pub struct MetricsRecorder {
    log: Mutex<Vec<MetricEntry>>,
    stream: broadcast::Sender<MetricEntry>,
    collector: MetricsCollector,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let (stream, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            log: Mutex::new(Vec::new()),
            stream,
            collector: MetricsCollector::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MetricEntry>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a transition and publishes it to subscribers.
    pub fn record(&self, transition: Transition) -> MetricEntry {
        let state_label = transition.state.to_string();
        self.collector.record_transition(
            &state_label,
            transition.outcome.as_str(),
            transition.duration.as_secs_f64(),
        );
        if let Some(score) = transition.score {
            self.collector.record_score(score);
        }

        let mut log = self.lock();
        let entry = MetricEntry {
            seq: log.len() as u64,
            run_id: transition.run_id,
            item_id: transition.item_id,
            state: transition.state,
            next: transition.next,
            outcome: transition.outcome,
            duration_ms: transition.duration.as_millis() as u64,
            score: transition.score,
            recorded_at: Utc::now(),
        };
        log.push(entry.clone());
        // No subscribers is fine.
        let _ = self.stream.send(entry.clone());
        entry
    }

    pub fn entries(&self) -> Vec<MetricEntry> {
        self.lock().clone()
    }

    /// Entries of one run, in the order they were recorded.
    pub fn entries_for_run(&self, run_id: Uuid) -> Vec<MetricEntry> {
        self.lock()
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Live stream of entries recorded from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MetricEntry> {
        self.stream.subscribe()
    }

    /// Per-state aggregates, in first-seen order.
    pub fn stage_summary(&self) -> Vec<StateSummary> {
        let log = self.lock();
        let mut summaries: Vec<(StateSummary, u64)> = Vec::new();

        for entry in log.iter() {
            let index = match summaries.iter().position(|(s, _)| s.state == entry.state) {
                Some(index) => index,
                None => {
                    summaries.push((
                        StateSummary {
                            state: entry.state,
                            count: 0,
                            failures: 0,
                            fallbacks: 0,
                            mean_duration: Duration::ZERO,
                        },
                        0,
                    ));
                    summaries.len() - 1
                }
            };

            let (summary, total_ms) = &mut summaries[index];
            summary.count += 1;
            *total_ms += entry.duration_ms;
            match entry.outcome {
                TransitionOutcome::Failed => summary.failures += 1,
                TransitionOutcome::Fallback => summary.fallbacks += 1,
                _ => {}
            }
        }

        summaries
            .into_iter()
            .map(|(mut summary, total_ms)| {
                summary.mean_duration = Duration::from_millis(total_ms / summary.count.max(1));
                summary
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{FinalStatus, SourceRef};
    use std::sync::Arc;

    fn item_id(n: usize) -> ItemId {
        let source = SourceRef::parse(&format!("https://news.example.com/{}", n)).unwrap();
        ItemId::for_source(&source)
    }

    fn transition(run_id: Uuid, state: PipelineState, outcome: TransitionOutcome, ms: u64) -> Transition {
        Transition::new(
            run_id,
            item_id(0),
            state,
            PipelineState::Finalized(FinalStatus::Rejected),
            outcome,
            Duration::from_millis(ms),
        )
    }

    #[test]
    fn test_entries_are_numbered_in_order() {
        let recorder = MetricsRecorder::new();
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();

        recorder.record(transition(run_a, PipelineState::Fetching, TransitionOutcome::Succeeded, 10));
        recorder.record(transition(run_b, PipelineState::Fetching, TransitionOutcome::Succeeded, 10));
        recorder.record(
            transition(run_a, PipelineState::Scoring, TransitionOutcome::Accepted, 1).with_score(0.7),
        );

        let entries = recorder.entries();
        let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);

        let run_a_entries = recorder.entries_for_run(run_a);
        assert_eq!(run_a_entries.len(), 2);
        assert_eq!(run_a_entries[1].score, Some(0.7));
    }

    #[test]
    fn test_stage_summary() {
        let recorder = MetricsRecorder::new();
        let run = Uuid::new_v4();
        recorder.record(transition(run, PipelineState::Verifying, TransitionOutcome::Fallback, 30));
        recorder.record(transition(run, PipelineState::Verifying, TransitionOutcome::Succeeded, 10));
        recorder.record(transition(run, PipelineState::Fetching, TransitionOutcome::Failed, 5));

        let summary = recorder.stage_summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].state, PipelineState::Verifying);
        assert_eq!(summary[0].count, 2);
        assert_eq!(summary[0].fallbacks, 1);
        assert_eq!(summary[0].mean_duration, Duration::from_millis(20));
        assert_eq!(summary[1].failures, 1);
    }

    #[tokio::test]
    async fn test_subscribers_receive_entries() {
        let recorder = MetricsRecorder::new();
        let mut stream = recorder.subscribe();
        let run = Uuid::new_v4();

        recorder.record(transition(run, PipelineState::Filtering, TransitionOutcome::Rejected, 3));

        let entry = stream.recv().await.unwrap();
        assert_eq!(entry.run_id, run);
        assert_eq!(entry.outcome, TransitionOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_every_entry() {
        let recorder = Arc::new(MetricsRecorder::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let recorder = Arc::clone(&recorder);
            tasks.push(tokio::spawn(async move {
                let run = Uuid::new_v4();
                for _ in 0..25 {
                    recorder.record(transition(
                        run,
                        PipelineState::Scripting,
                        TransitionOutcome::Succeeded,
                        1,
                    ));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let entries = recorder.entries();
        assert_eq!(entries.len(), 200);
        assert!(entries.iter().enumerate().all(|(i, e)| e.seq == i as u64));
    }
}
