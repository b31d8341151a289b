//! # Session Analysis Pipeline
//!
//! A two-wave asynchronous orchestrator that supervises a fixed set of
//! analyzers against a session, with bounded retry, per-attempt timeouts,
//! exponential backoff, and a durable attempt log.
//!
//! ## Topology
//!
//! - **Wave 1**: Mood, Topics and Breakthrough run concurrently; a failure
//!   of any one fails the run. ActionSummary then runs best-effort because it
//!   reads the Topics output.
//! - **Wave 2**: Deep synthesis runs only after the Wave 1 completion
//!   timestamps are confirmed from storage.
//!
//! ## Architecture
//!
//! ```text
//! Caller → WaveOrchestrator → RetryRunner → Analyzer (Langbase pipe, ...)
//!                 ↓                ↓               ↓
//!           SessionStore      ProgressLog     SessionStore
//!                 └────────── SQLite ──────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use session_analysis_pipeline::{Config, WaveOrchestrator};
//! use session_analysis_pipeline::analyzers::PipeAnalyzer;
//! use session_analysis_pipeline::langbase::LangbaseClient;
//! use session_analysis_pipeline::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = Arc::new(SqliteStorage::new(&config.database).await?);
//!     let client = LangbaseClient::new(config.langbase.as_ref().unwrap(), config.request.clone())?;
//!     let analyzers = PipeAnalyzer::set_from_config(&config.pipes, client, storage.clone());
//!     let orchestrator = WaveOrchestrator::new(
//!         storage.clone(),
//!         storage,
//!         analyzers,
//!         config.pipeline.retry_policy(),
//!     );
//!     let status = orchestrator.process_session_full_pipeline("S1", false).await?;
//!     println!("{}", status.analysis_status);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Analyzer contract and the Langbase-backed implementation.
pub mod analyzers;
/// Command-line interface.
pub mod cli;
/// Configuration loaded from the environment.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Langbase API client used by pipe analyzers.
pub mod langbase;
/// Retry runner, wave orchestrator and status accessor.
pub mod pipeline;
/// System prompts for analyzer pipes.
pub mod prompts;
/// Session and progress log persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult, PipelineError, PipelineResult};
pub use pipeline::{AnalysisResult, PipelineStatus, RetryPolicy, WaveOrchestrator};
