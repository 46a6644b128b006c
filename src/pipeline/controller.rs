//! Pipeline controller: drives one item through the stage state machine.
//!
//! ```text
//! Start -> Fetching -> Filtering -> Verifying -> Scripting -> Scoring
//!                                                  ^            |
//!                                                  |            +-> Finalized(Accepted)
//!                                              Correcting <-----+-> Finalized(Degraded)
//!
//! any non-final state -> Finalized(Rejected)
//! ```
//!
//! Each loop iteration performs the work of the current state, then moves
//! the item to the next one and records the transition. The correction
//! counter lives on the item and is bounded by `max_correction_attempts`, so
//! the loop terminates after at most `6 + 3 * max_attempts` steps.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::PipelineContext;
use super::outcome::{FinalizedRecord, RejectionReason};
use super::run::{CancelFlag, RunHandle, RunOptions};
use crate::collaborators::PushReport;
use crate::content::{ContentItem, FinalStatus, PipelineState, Script, SourceRef};
use crate::error::PipelineError;
use crate::metrics::{MetricsCollector, Transition, TransitionOutcome};
use crate::scoring::ScoreRecord;
use crate::stages::{CorrectionPlan, Stage, StageOutput, StageRequest};

/// Store collection holding every score record.
pub const SCORE_RECORDS_COLLECTION: &str = "score_records";

/// Store collection holding finalized records, keyed by item.
pub const FINALIZED_COLLECTION: &str = "finalized_items";

/// Starts and drives pipeline runs.
#[derive(Clone)]
pub struct PipelineController {
    context: Arc<PipelineContext>,
}

impl PipelineController {
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    /// Validates `source` and starts a run in the background.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidSource` before any run exists when the
    /// source is not an absolute http(s) URL.
    pub fn start(&self, source: &str, options: RunOptions) -> Result<RunHandle, PipelineError> {
        let source = SourceRef::parse(source)?;
        let item = ContentItem::new(source, self.context.config.max_correction_attempts);
        let run_id = Uuid::new_v4();
        let item_id = item.id;
        let (state_tx, state_rx) = watch::channel(item.state());
        let cancel = CancelFlag::default();

        let run = Run {
            context: Arc::clone(&self.context),
            run_id,
            item,
            options,
            cancel: cancel.clone(),
            state_tx,
            collector: MetricsCollector::new(),
            best: None,
            last_score: None,
            plan: None,
            reason: None,
        };

        let task = tokio::spawn(run.drive());
        Ok(RunHandle::new(run_id, item_id, state_rx, cancel, task))
    }

    /// Runs one source to completion.
    pub async fn run(
        &self,
        source: &str,
        options: RunOptions,
    ) -> Result<FinalizedRecord, PipelineError> {
        self.start(source, options)?.wait().await
    }

    /// Runs several sources concurrently. Results keep the input order.
    pub async fn run_batch(
        &self,
        sources: &[String],
        options: RunOptions,
    ) -> Vec<Result<FinalizedRecord, PipelineError>> {
        if sources.is_empty() {
            return Vec::new();
        }

        let futures: Vec<_> = sources
            .iter()
            .map(|source| self.run(source, options.clone()))
            .collect();

        futures::future::join_all(futures).await
    }
}

/// What a state produced: the state to move to and how the current one
/// ended.
struct Step {
    next: PipelineState,
    outcome: TransitionOutcome,
    score: Option<f64>,
}

impl Step {
    fn to(next: PipelineState, outcome: TransitionOutcome) -> Self {
        Self {
            next,
            outcome,
            score: None,
        }
    }

    fn advance(next: PipelineState, fallback_used: bool) -> Self {
        let outcome = if fallback_used {
            TransitionOutcome::Fallback
        } else {
            TransitionOutcome::Succeeded
        };
        Self::to(next, outcome)
    }
}

const REJECTED: PipelineState = PipelineState::Finalized(FinalStatus::Rejected);

/// State of one run. Owned by the run's task; nothing else mutates the item.
struct Run {
    context: Arc<PipelineContext>,
    run_id: Uuid,
    item: ContentItem,
    options: RunOptions,
    cancel: CancelFlag,
    state_tx: watch::Sender<PipelineState>,
    collector: MetricsCollector,
    /// Highest-scoring attempt so far; later attempts win ties.
    best: Option<(ScoreRecord, Script)>,
    last_score: Option<ScoreRecord>,
    plan: Option<CorrectionPlan>,
    reason: Option<RejectionReason>,
}

impl Run {
    async fn drive(mut self) -> FinalizedRecord {
        let started = Instant::now();
        info!(
            run_id = %self.run_id,
            item_id = %self.item.id,
            source = %self.item.source,
            priority = %self.options.priority,
            "Run started"
        );

        loop {
            let state = self.item.state();
            if let PipelineState::Finalized(status) = state {
                return self.finish(status, started.elapsed()).await;
            }

            let entered = Instant::now();
            let step = if self.cancel.is_cancelled() {
                info!(run_id = %self.run_id, state = %state, "Run cancelled");
                self.reason = Some(RejectionReason::Cancelled);
                Step::to(REJECTED, TransitionOutcome::Cancelled)
            } else {
                self.step(state).await
            };
            self.enter(state, step, entered.elapsed());
        }
    }

    async fn step(&mut self, state: PipelineState) -> Step {
        match state {
            PipelineState::Start => Step::to(PipelineState::Fetching, TransitionOutcome::Succeeded),
            PipelineState::Fetching => self.fetch().await,
            PipelineState::Filtering => self.filter().await,
            PipelineState::Verifying => self.verify().await,
            PipelineState::Scripting => self.script().await,
            PipelineState::Scoring => self.score().await,
            PipelineState::Correcting => self.correct().await,
            PipelineState::Finalized(_) => self.fault("step requested for a finalized item"),
        }
    }

    async fn fetch(&mut self) -> Step {
        let output = match self.dispatch(Stage::Fetch, self.request()).await {
            Ok(output) => output,
            Err(step) => return step,
        };
        let fallback_used = output.fallback_used();
        match output {
            StageOutput::Fetched(payload) => {
                let applied = self.item.apply_payload(payload);
                self.applied(applied, PipelineState::Filtering, fallback_used)
            }
            other => self.unexpected(Stage::Fetch, &other),
        }
    }

    async fn filter(&mut self) -> Step {
        let output = match self.dispatch(Stage::Filter, self.request()).await {
            Ok(output) => output,
            Err(step) => return step,
        };
        let fallback_used = output.fallback_used();
        match output {
            StageOutput::Filtered(relevance) => {
                let applied = self.item.apply_relevance(relevance);
                self.applied(applied, PipelineState::Verifying, fallback_used)
            }
            other => self.unexpected(Stage::Filter, &other),
        }
    }

    async fn verify(&mut self) -> Step {
        let output = match self.dispatch(Stage::Verify, self.request()).await {
            Ok(output) => output,
            Err(step) => return step,
        };
        let fallback_used = output.fallback_used();
        match output {
            StageOutput::Verified(verification) => {
                let applied = self.item.apply_verification(verification);
                self.applied(applied, PipelineState::Scripting, fallback_used)
            }
            other => self.unexpected(Stage::Verify, &other),
        }
    }

    async fn script(&mut self) -> Step {
        let mut request = self.request();
        if let Some(plan) = self.plan {
            request = request.with_correction(plan);
        }

        let output = match self.dispatch(Stage::Script, request).await {
            Ok(output) => output,
            Err(step) => return step,
        };
        let fallback_used = output.fallback_used();
        match output {
            StageOutput::Scripted(script) => {
                let applied = self.item.apply_script(script);
                self.applied(applied, PipelineState::Scoring, fallback_used)
            }
            other => self.unexpected(Stage::Script, &other),
        }
    }

    /// Scores the current script and decides between acceptance, another
    /// correction cycle and degradation.
    async fn score(&mut self) -> Step {
        let Some(script) = self.item.script().cloned() else {
            return self.fault("scoring reached without a script");
        };

        let weights = self.context.current_weights();
        let record = self.context.scorer.score(&self.item, &script, &weights);
        self.context.history().push(record.components);
        self.persist_score(&record).await;

        debug!(
            run_id = %self.run_id,
            attempt = record.attempt,
            composite = record.composite,
            tone = record.components.tone,
            engagement = record.components.engagement,
            quality = record.components.quality,
            accepted = record.accepted,
            "Scored script"
        );

        let is_best = self
            .best
            .as_ref()
            .map_or(true, |(best, _)| record.composite >= best.composite);
        if is_best {
            self.best = Some((record.clone(), script));
        }

        let composite = record.composite;
        let accepted = record.accepted;
        self.last_score = Some(record);

        let (next, outcome) = if accepted {
            (
                PipelineState::Finalized(FinalStatus::Accepted),
                TransitionOutcome::Accepted,
            )
        } else if self.item.attempts() < self.item.max_attempts() {
            (PipelineState::Correcting, TransitionOutcome::Rejected)
        } else {
            if let Some((_, best_script)) = self.best.clone() {
                if let Err(e) = self.item.restore_script(best_script) {
                    return self.fault(&e.to_string());
                }
            }
            (
                PipelineState::Finalized(FinalStatus::Degraded),
                TransitionOutcome::Rejected,
            )
        };

        Step {
            next,
            outcome,
            score: Some(composite),
        }
    }

    /// Consumes one correction cycle and plans the next Script pass.
    async fn correct(&mut self) -> Step {
        match self.item.begin_correction() {
            Ok(true) => {}
            Ok(false) => return self.fault("correction requested with no attempts left"),
            Err(e) => return self.fault(&e.to_string()),
        }
        self.collector.record_correction();

        let Some(rejected) = self.last_score.clone() else {
            return self.fault("correction requested without a rejected score");
        };

        let request = self.request().with_rejected(rejected);
        let output = match self.dispatch(Stage::Feedback, request).await {
            Ok(output) => output,
            Err(step) => return step,
        };
        match output {
            StageOutput::CorrectionPlanned(plan) => {
                info!(
                    run_id = %self.run_id,
                    attempt = plan.attempt,
                    max_attempts = self.item.max_attempts(),
                    previous_composite = plan.previous_composite,
                    "Starting correction cycle"
                );
                self.plan = Some(plan);
                Step::to(PipelineState::Scripting, TransitionOutcome::Succeeded)
            }
            other => self.unexpected(Stage::Feedback, &other),
        }
    }

    fn request(&self) -> StageRequest {
        StageRequest::new(self.item.clone())
    }

    /// Runs one stage task; a failed task ends the run as rejected.
    async fn dispatch(&mut self, stage: Stage, request: StageRequest) -> Result<StageOutput, Step> {
        let result = self
            .context
            .dispatcher
            .execute(stage, request, self.options.priority)
            .await;

        match result {
            Ok(output) => Ok(output),
            Err(e) => {
                let reason = RejectionReason::from(&e);
                let outcome = match &reason {
                    RejectionReason::Fault { .. } => {
                        error!(run_id = %self.run_id, stage = %stage, error = %e, "Stage executor fault");
                        TransitionOutcome::Failed
                    }
                    RejectionReason::Cancelled => TransitionOutcome::Cancelled,
                    _ => {
                        info!(run_id = %self.run_id, stage = %stage, reason = %reason, "Item rejected");
                        TransitionOutcome::Rejected
                    }
                };
                self.reason = Some(reason);
                Err(Step::to(REJECTED, outcome))
            }
        }
    }

    fn applied(
        &mut self,
        result: Result<(), PipelineError>,
        next: PipelineState,
        fallback_used: bool,
    ) -> Step {
        match result {
            Ok(()) => Step::advance(next, fallback_used),
            Err(e) => self.fault(&e.to_string()),
        }
    }

    fn unexpected(&mut self, stage: Stage, output: &StageOutput) -> Step {
        self.fault(&format!("{} returned unexpected output {:?}", stage, output))
    }

    fn fault(&mut self, detail: &str) -> Step {
        error!(run_id = %self.run_id, item_id = %self.item.id, detail, "Pipeline fault");
        self.reason = Some(RejectionReason::Fault {
            detail: detail.to_string(),
        });
        Step::to(REJECTED, TransitionOutcome::Failed)
    }

    /// Moves the item to the step's target state and records the
    /// transition.
    fn enter(&mut self, left: PipelineState, step: Step, duration: Duration) {
        let mut outcome = step.outcome;
        if let Err(e) = self.item.transition(step.next) {
            error!(run_id = %self.run_id, error = %e, "Pipeline fault");
            self.reason = Some(RejectionReason::Fault {
                detail: e.to_string(),
            });
            outcome = TransitionOutcome::Failed;
            if let Err(e) = self.item.transition(REJECTED) {
                error!(run_id = %self.run_id, error = %e, "Could not reject item");
            }
        }

        let entered = self.item.state();
        let mut transition = Transition::new(
            self.run_id,
            self.item.id,
            left,
            entered,
            outcome,
            duration,
        );
        if let Some(score) = step.score {
            transition = transition.with_score(score);
        }
        self.context.recorder.record(transition);
        self.state_tx.send_replace(entered);

        debug!(
            run_id = %self.run_id,
            from = %left,
            to = %entered,
            outcome = outcome.as_str(),
            duration_ms = duration.as_millis() as u64,
            "State transition"
        );
    }

    async fn finish(mut self, status: FinalStatus, elapsed: Duration) -> FinalizedRecord {
        let score = match status {
            FinalStatus::Accepted => self.last_score.take(),
            FinalStatus::Degraded => self.best.take().map(|(record, _)| record),
            FinalStatus::Rejected => None,
        };

        let mut record =
            FinalizedRecord::from_item(self.run_id, &self.item, status, score, self.reason.take());

        match &record.reason {
            Some(reason) if reason.is_fault() => error!(
                run_id = %self.run_id,
                item_id = %record.item_id,
                reason = %reason,
                "Run aborted by fault"
            ),
            _ => info!(
                run_id = %self.run_id,
                item_id = %record.item_id,
                status = %status,
                attempts = record.attempts,
                composite = record.composite(),
                fallback_used = record.fallback_used,
                duration_ms = elapsed.as_millis() as u64,
                "Run finalized"
            ),
        }
        self.collector.record_finalized(status);

        if self.options.enable_push && record.is_deliverable() {
            record.push = self.deliver(&record).await;
        }

        self.persist_finalized(&record).await;
        self.context.record_run(status, elapsed);
        record
    }

    async fn deliver(&self, record: &FinalizedRecord) -> Option<PushReport> {
        let destinations = self
            .options
            .destinations
            .clone()
            .unwrap_or_else(|| self.context.config.destinations());
        let limit = self.context.config.collaborator_timeout;

        match tokio::time::timeout(limit, self.context.push.push(record, &destinations)).await {
            Ok(Ok(report)) => {
                self.collector.record_delivery(&report);
                if report.is_partial() {
                    warn!(
                        run_id = %self.run_id,
                        acked = report.successful(),
                        failed = report.failed(),
                        "Partial delivery"
                    );
                } else {
                    info!(
                        run_id = %self.run_id,
                        acked = report.successful(),
                        failed = report.failed(),
                        "Delivery finished"
                    );
                }
                Some(report)
            }
            Ok(Err(e)) => {
                warn!(run_id = %self.run_id, error = %e, "Delivery skipped");
                None
            }
            Err(_) => {
                warn!(run_id = %self.run_id, timeout_secs = limit.as_secs(), "Delivery timed out");
                None
            }
        }
    }

    async fn persist_score(&self, record: &ScoreRecord) {
        match serde_json::to_value(record) {
            Ok(document) => {
                self.persist(SCORE_RECORDS_COLLECTION, &record.key(self.run_id), document)
                    .await
            }
            Err(e) => warn!(run_id = %self.run_id, error = %e, "Could not serialize score record"),
        }
    }

    async fn persist_finalized(&self, record: &FinalizedRecord) {
        match serde_json::to_value(record) {
            Ok(document) => {
                self.persist(FINALIZED_COLLECTION, &record.item_id.to_string(), document)
                    .await
            }
            Err(e) => warn!(run_id = %self.run_id, error = %e, "Could not serialize finalized record"),
        }
    }

    /// Writes a document; failures are logged and never change the run.
    async fn persist(&self, collection: &str, id: &str, document: serde_json::Value) {
        let Some(store) = &self.context.store else {
            return;
        };
        let limit = self.context.config.collaborator_timeout;

        match tokio::time::timeout(limit, store.upsert(collection, id, document)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(run_id = %self.run_id, collection, id, error = %e, "Persisting document failed")
            }
            Err(_) => warn!(run_id = %self.run_id, collection, id, "Persisting document timed out"),
        }
    }
}
