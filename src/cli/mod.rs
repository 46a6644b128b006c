//! Command-line interface for news-forge.
//!
//! Provides commands for running sources through the pipeline, summarizing
//! stored score records, and dumping Prometheus metrics.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
