//! CLI command definitions for news-forge.

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::collaborators::{DocumentFilter, DocumentStore, SqliteStore};
use crate::dispatcher::Priority;
use crate::metrics::{export_metrics, init_metrics, FeedbackSummary};
use crate::pipeline::{
    FinalizedRecord, PipelineConfig, PipelineContext, PipelineController, PipelineStats,
    RunOptions, SCORE_RECORDS_COLLECTION,
};
use crate::scoring::ScoreRecord;

/// News content pipeline with reward-gated script correction.
#[derive(Parser)]
#[command(name = "news-forge")]
#[command(about = "Turn news articles into scored, deliverable scripts")]
#[command(version)]
#[command(
    long_about = "news-forge fetches articles, filters them for relevance, verifies them, writes a short script and scores it. Scripts below the acceptance threshold are corrected a bounded number of times.\n\nExample usage:\n  news-forge run https://news.example.com/story --no-push"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run one or more source URLs through the pipeline.
    Run(RunArgs),

    /// Summarize score records kept in a SQLite store.
    Summary(SummaryArgs),

    /// Print the Prometheus metrics registered by this process.
    Metrics,
}

/// Arguments for `news-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Source URLs (absolute http or https).
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// YAML configuration file. Environment variables override it.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Submit stage tasks at high priority.
    #[arg(long)]
    pub high_priority: bool,

    /// Do not push finalized records downstream.
    #[arg(long)]
    pub no_push: bool,

    /// Override the acceptance threshold.
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Override the database URL.
    #[arg(long)]
    pub database_url: Option<String>,

    /// Print Prometheus metrics after the runs finish.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `news-forge summary`.
#[derive(Parser, Debug)]
pub struct SummaryArgs {
    /// SQLite URL of the store written by earlier runs.
    #[arg(long, env = "NEWS_FORGE_DATABASE_URL")]
    pub database_url: String,

    /// Only read this many records.
    #[arg(long)]
    pub limit: Option<usize>,
}

/// JSON document printed by `news-forge run`.
#[derive(Debug, Serialize)]
struct RunReport {
    records: Vec<FinalizedRecord>,
    errors: Vec<RunFailure>,
    stats: StatsReport,
}

#[derive(Debug, Serialize)]
struct RunFailure {
    source: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct StatsReport {
    total_runs: u64,
    accepted: u64,
    degraded: u64,
    rejected: u64,
    average_duration_ms: u64,
    delivery_rate: f64,
}

impl From<PipelineStats> for StatsReport {
    fn from(stats: PipelineStats) -> Self {
        Self {
            delivery_rate: stats.delivery_rate(),
            total_runs: stats.total_runs,
            accepted: stats.accepted,
            degraded: stats.degraded,
            rejected: stats.rejected,
            average_duration_ms: stats.average_duration.as_millis() as u64,
        }
    }
}

/// Parse CLI arguments without running any command.
///
/// Use this with `run_with_cli()` when logging has to be set up from the
/// parsed arguments first.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Summary(args) => run_summary_command(args).await,
        Commands::Metrics => run_metrics_command(),
    }
}

fn load_config(args: &RunArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !Path::new(path).exists() {
                anyhow::bail!("Configuration file not found: {}", path);
            }
            PipelineConfig::from_yaml_file(path)?
        }
        None => PipelineConfig::from_env()?,
    };

    if let Some(threshold) = args.threshold {
        config = config.with_accept_threshold(threshold);
    }
    if let Some(url) = &args.database_url {
        config = config.with_database_url(url.clone());
    }

    config.validate()?;
    Ok(config)
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    init_metrics().map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?;

    let config = load_config(&args)?;
    let context = PipelineContext::builder(config).build().await?;
    let controller = PipelineController::new(Arc::new(context));

    let priority = if args.high_priority {
        Priority::High
    } else {
        Priority::Normal
    };
    let options = RunOptions::new()
        .with_priority(priority)
        .with_push(!args.no_push);

    info!(sources = args.sources.len(), priority = %priority, "Starting pipeline runs");
    let results = controller.run_batch(&args.sources, options).await;

    let mut report = RunReport {
        records: Vec::with_capacity(results.len()),
        errors: Vec::new(),
        stats: StatsReport::from(controller.context().stats()),
    };
    for (source, result) in args.sources.iter().zip(results) {
        match result {
            Ok(record) => report.records.push(record),
            Err(e) => {
                warn!(source = %source, error = %e, "Run did not start");
                report.errors.push(RunFailure {
                    source: source.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    let json_output = serde_json::to_string_pretty(&report)
        .map_err(|e| anyhow::anyhow!("Failed to serialize run report: {}", e))?;
    println!("{}", json_output);

    if args.metrics {
        print!("{}", export_metrics());
    }

    controller.context().shutdown();
    Ok(())
}

async fn run_summary_command(args: SummaryArgs) -> anyhow::Result<()> {
    let store = SqliteStore::connect(&args.database_url).await?;

    let mut filter = DocumentFilter::all();
    if let Some(limit) = args.limit {
        filter = filter.with_limit(limit);
    }
    let documents = store.query(SCORE_RECORDS_COLLECTION, &filter).await?;

    let mut records = Vec::with_capacity(documents.len());
    for document in documents {
        match serde_json::from_value::<ScoreRecord>(document) {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "Skipping malformed score record"),
        }
    }

    let summary = FeedbackSummary::from_records(&records);
    let json_output = serde_json::to_string_pretty(&summary)
        .map_err(|e| anyhow::anyhow!("Failed to serialize summary: {}", e))?;
    println!("{}", json_output);

    store.close().await;
    Ok(())
}

fn run_metrics_command() -> anyhow::Result<()> {
    init_metrics().map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?;
    print!("{}", export_metrics());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        let cli = Cli::try_parse_from(["news-forge", "run", "https://news.example.com/a"])
            .expect("should parse");

        assert_eq!(cli.log_level, "info");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.sources, vec!["https://news.example.com/a"]);
                assert!(args.config.is_none());
                assert!(!args.high_priority);
                assert!(!args.no_push);
                assert!(args.threshold.is_none());
                assert!(!args.metrics);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_command_with_options() {
        let cli = Cli::try_parse_from([
            "news-forge",
            "run",
            "https://news.example.com/a",
            "https://news.example.com/b",
            "--high-priority",
            "--no-push",
            "--threshold",
            "0.7",
            "-l",
            "debug",
        ])
        .expect("should parse");

        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.sources.len(), 2);
                assert!(args.high_priority);
                assert!(args.no_push);
                assert_eq!(args.threshold, Some(0.7));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_requires_a_source() {
        assert!(Cli::try_parse_from(["news-forge", "run"]).is_err());
    }

    #[test]
    fn test_load_config_rejects_bad_threshold() {
        let args = RunArgs {
            sources: vec!["https://news.example.com/a".into()],
            config: None,
            high_priority: false,
            no_push: true,
            threshold: Some(1.5),
            database_url: None,
            metrics: false,
        };
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let args = RunArgs {
            sources: vec!["https://news.example.com/a".into()],
            config: Some("/nonexistent/news-forge.yaml".into()),
            high_priority: false,
            no_push: false,
            threshold: None,
            database_url: None,
            metrics: false,
        };
        let err = load_config(&args).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
