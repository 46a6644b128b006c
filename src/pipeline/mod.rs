//! Pipeline controller and run lifecycle.
//!
//! A run takes one source URL through fetch, relevance filtering,
//! verification and script generation, then scores the script. Rejected
//! scripts go back through a bounded number of correction cycles; the item
//! always ends in exactly one of `Accepted`, `Degraded` or `Rejected`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use news_forge::pipeline::{PipelineConfig, PipelineContext, PipelineController, RunOptions};
//!
//! let config = PipelineConfig::from_env()?;
//! let context = PipelineContext::builder(config).build().await?;
//! let controller = PipelineController::new(Arc::new(context));
//!
//! let record = controller
//!     .run("https://news.example.com/story", RunOptions::default())
//!     .await?;
//! println!("{} -> {}", record.item_id, record.status);
//! ```
//!
//! # Batch Execution
//!
//! `run_batch` starts every source at once. Stage tasks from all runs share
//! the dispatcher, which caps how many execute concurrently.
//!
//! ```rust,ignore
//! let sources = vec![
//!     "https://news.example.com/a".to_string(),
//!     "https://news.example.com/b".to_string(),
//! ];
//! for result in controller.run_batch(&sources, RunOptions::default()).await {
//!     match result {
//!         Ok(record) => println!("{}: {}", record.source, record.status),
//!         Err(e) => eprintln!("run failed: {}", e),
//!     }
//! }
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod outcome;
pub mod run;

pub use config::{ConfigError, PipelineConfig};
pub use context::{PipelineContext, PipelineContextBuilder, PipelineStats};
pub use controller::{PipelineController, FINALIZED_COLLECTION, SCORE_RECORDS_COLLECTION};
pub use outcome::{FinalizedRecord, RejectionReason};
pub use run::{RunHandle, RunOptions};
