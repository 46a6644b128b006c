//! Process-wide pipeline context.
//!
//! Everything a run needs (dispatcher, scorer, weight policy, collaborators
//! and the metrics recorder) is built once here and shared by reference. No
//! other part of the crate keeps global state besides the Prometheus
//! statics.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::info;

use super::config::PipelineConfig;
use crate::collaborators::{
    AnalyzerClient, ContentFetcher, DeliveryPush, DocumentStore, HttpFetcher, HttpPushClient,
    SqliteStore, TextAnalyzer,
};
use crate::content::FinalStatus;
use crate::dispatcher::Dispatcher;
use crate::error::PipelineError;
use crate::metrics::MetricsRecorder;
use crate::scoring::{
    AdaptiveWeights, FixedWeights, ScoreHistory, ScoreWeights, Scorer, ScoringEngine,
    WeightPolicy,
};
use crate::stages::{StageSet, StageSettings};

/// Run counters kept by the context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub total_runs: u64,
    pub accepted: u64,
    pub degraded: u64,
    pub rejected: u64,
    pub average_duration: Duration,
}

impl PipelineStats {
    pub(crate) fn record(&mut self, status: FinalStatus, duration: Duration) {
        self.total_runs += 1;
        match status {
            FinalStatus::Accepted => self.accepted += 1,
            FinalStatus::Degraded => self.degraded += 1,
            FinalStatus::Rejected => self.rejected += 1,
        }

        // Incremental average: avg = avg + (new - avg) / n
        let n = self.total_runs as f64;
        let old_avg = self.average_duration.as_secs_f64();
        let new_avg = old_avg + (duration.as_secs_f64() - old_avg) / n;
        self.average_duration = Duration::from_secs_f64(new_avg.max(0.0));
    }

    /// Share of runs that produced a deliverable script, as a percentage.
    pub fn delivery_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            ((self.accepted + self.degraded) as f64 / self.total_runs as f64) * 100.0
        }
    }
}

pub struct PipelineContext {
    pub config: PipelineConfig,
    pub dispatcher: Dispatcher,
    pub scorer: Arc<dyn Scorer>,
    pub weight_policy: Arc<dyn WeightPolicy>,
    pub recorder: Arc<MetricsRecorder>,
    pub store: Option<Arc<dyn DocumentStore>>,
    pub push: Arc<dyn DeliveryPush>,
    history: Mutex<ScoreHistory>,
    stats: Mutex<PipelineStats>,
}

impl PipelineContext {
    pub fn builder(config: PipelineConfig) -> PipelineContextBuilder {
        PipelineContextBuilder::new(config)
    }

    /// Weights for the next scoring call, from the current history.
    pub fn current_weights(&self) -> ScoreWeights {
        self.weight_policy.weights(&self.history())
    }

    pub(crate) fn history(&self) -> MutexGuard<'_, ScoreHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_run(&self, status: FinalStatus, duration: Duration) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(status, duration);
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stops the dispatcher. Runs still in flight end as cancelled.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

/// Builds a [`PipelineContext`]. Collaborators that are not supplied are
/// created from the configuration.
pub struct PipelineContextBuilder {
    config: PipelineConfig,
    fetcher: Option<Arc<dyn ContentFetcher>>,
    analyzer: Option<Arc<dyn TextAnalyzer>>,
    store: Option<Arc<dyn DocumentStore>>,
    push: Option<Arc<dyn DeliveryPush>>,
    scorer: Option<Arc<dyn Scorer>>,
    weight_policy: Option<Arc<dyn WeightPolicy>>,
    recorder: Option<Arc<MetricsRecorder>>,
}

impl PipelineContextBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            fetcher: None,
            analyzer: None,
            store: None,
            push: None,
            scorer: None,
            weight_policy: None,
            recorder: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn TextAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_push(mut self, push: Arc<dyn DeliveryPush>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_weight_policy(mut self, policy: Arc<dyn WeightPolicy>) -> Self {
        self.weight_policy = Some(policy);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<MetricsRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Validates the configuration and assembles the context.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the configuration is invalid, an HTTP
    /// client cannot be built or the document store cannot be opened.
    pub async fn build(self) -> Result<PipelineContext, PipelineError> {
        let config = self.config;
        config.validate()?;

        let fetcher: Arc<dyn ContentFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(
                HttpFetcher::new(config.fetch_timeout)
                    .map_err(|e| PipelineError::InitializationFailed(e.to_string()))?,
            ),
        };

        let analyzer: Arc<dyn TextAnalyzer> = match self.analyzer {
            Some(analyzer) => analyzer,
            None => Arc::new(
                AnalyzerClient::new(
                    config.analyzer_base_url.clone(),
                    config.analyzer_api_key.clone(),
                    config.collaborator_timeout,
                )
                .map_err(|e| PipelineError::InitializationFailed(e.to_string()))?,
            ),
        };

        let store: Option<Arc<dyn DocumentStore>> = match (self.store, &config.database_url) {
            (Some(store), _) => Some(store),
            (None, Some(url)) => Some(Arc::new(SqliteStore::connect(url).await?)),
            (None, None) => None,
        };

        let push: Arc<dyn DeliveryPush> = match self.push {
            Some(push) => push,
            None => Arc::new(
                HttpPushClient::new(
                    config.push_base_url.clone(),
                    config.push_api_key.clone(),
                    config.collaborator_timeout,
                )
                .map_err(|e| PipelineError::InitializationFailed(e.to_string()))?,
            ),
        };

        let scorer: Arc<dyn Scorer> = match self.scorer {
            Some(scorer) => scorer,
            None => Arc::new(ScoringEngine::new(
                config.accept_threshold,
                config.script_word_band,
            )),
        };

        let weight_policy: Arc<dyn WeightPolicy> = match self.weight_policy {
            Some(policy) => policy,
            None if config.adaptive_weights => {
                Arc::new(AdaptiveWeights::new(ScoreWeights::default()))
            }
            None => Arc::new(FixedWeights::default()),
        };

        let stages = StageSet::new(fetcher, analyzer, StageSettings::from_config(&config));
        let dispatcher = Dispatcher::new(
            Arc::new(stages),
            config.dispatcher_capacity,
            config.max_queued_tasks,
        );

        info!(
            capacity = config.dispatcher_capacity,
            max_attempts = config.max_correction_attempts,
            threshold = config.accept_threshold,
            weight_policy = weight_policy.name(),
            store = store.is_some(),
            "Pipeline context ready"
        );

        Ok(PipelineContext {
            history: Mutex::new(ScoreHistory::new(config.history_window)),
            stats: Mutex::new(PipelineStats::default()),
            dispatcher,
            scorer,
            weight_policy,
            recorder: self.recorder.unwrap_or_default(),
            store,
            push,
            config,
        })
    }
}
