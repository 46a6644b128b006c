//! Prometheus metrics registration and export.
//!
//! Metrics live in process-wide statics that stay empty until
//! [`init_metrics`] runs. Recording through
//! [`MetricsCollector`](super::MetricsCollector) before that is a no-op.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Global Prometheus registry for all news_forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Serializes initialization so all statics come from one registry.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Pipeline state transitions, labeled by the state left and its outcome.
pub static TRANSITIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Time spent in a pipeline state, in seconds.
pub static STATE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Distribution of composite rewards.
pub static COMPOSITE_REWARD: OnceLock<Histogram> = OnceLock::new();

/// Finalized runs, labeled by final status.
pub static RUNS_FINALIZED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Stage results produced by a local fallback, labeled by state.
pub static FALLBACKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Correction cycles started.
pub static CORRECTIONS_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Per-destination delivery results, labeled by result.
pub static DELIVERIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Tasks waiting in the dispatch queue.
pub static DISPATCH_QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Tasks currently running in the dispatcher.
pub static DISPATCH_RUNNING: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls leave the first registration in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric cannot be created or registered.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let transitions_total = CounterVec::new(
        Opts::new(
            "news_forge_transitions_total",
            "Pipeline state transitions",
        ),
        &["state", "outcome"],
    )?;

    let state_duration = HistogramVec::new(
        HistogramOpts::new(
            "news_forge_state_duration_seconds",
            "Time spent in a pipeline state",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["state"],
    )?;

    let composite_reward = Histogram::with_opts(
        HistogramOpts::new("news_forge_composite_reward", "Distribution of composite rewards")
            .buckets(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
    )?;

    let runs_finalized_total = CounterVec::new(
        Opts::new("news_forge_runs_finalized_total", "Finalized runs by status"),
        &["status"],
    )?;

    let fallbacks_total = CounterVec::new(
        Opts::new(
            "news_forge_fallbacks_total",
            "Stage results produced by a local fallback",
        ),
        &["state"],
    )?;

    let corrections_total = Counter::new(
        "news_forge_corrections_total",
        "Correction cycles started",
    )?;

    let deliveries_total = CounterVec::new(
        Opts::new("news_forge_deliveries_total", "Per-destination delivery results"),
        &["result"],
    )?;

    let dispatch_queue_depth = Gauge::new(
        "news_forge_dispatch_queue_depth",
        "Tasks waiting in the dispatch queue",
    )?;

    let dispatch_running = Gauge::new(
        "news_forge_dispatch_running",
        "Tasks currently running in the dispatcher",
    )?;

    registry.register(Box::new(transitions_total.clone()))?;
    registry.register(Box::new(state_duration.clone()))?;
    registry.register(Box::new(composite_reward.clone()))?;
    registry.register(Box::new(runs_finalized_total.clone()))?;
    registry.register(Box::new(fallbacks_total.clone()))?;
    registry.register(Box::new(corrections_total.clone()))?;
    registry.register(Box::new(deliveries_total.clone()))?;
    registry.register(Box::new(dispatch_queue_depth.clone()))?;
    registry.register(Box::new(dispatch_running.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = TRANSITIONS_TOTAL.set(transitions_total);
    let _ = STATE_DURATION.set(state_duration);
    let _ = COMPOSITE_REWARD.set(composite_reward);
    let _ = RUNS_FINALIZED_TOTAL.set(runs_finalized_total);
    let _ = FALLBACKS_TOTAL.set(fallbacks_total);
    let _ = CORRECTIONS_TOTAL.set(corrections_total);
    let _ = DELIVERIES_TOTAL.set(deliveries_total);
    let _ = DISPATCH_QUEUE_DEPTH.set(dispatch_queue_depth);
    let _ = DISPATCH_RUNNING.set(dispatch_running);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry is not initialized or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
