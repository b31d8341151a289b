//! Multi-wave analysis pipeline.
//!
//! - [`retry`]: single-task supervision (timeout, bounded retry, backoff).
//! - [`orchestrator`]: the two-wave topology and status state machine.
//! - [`status`]: read-only status snapshots derived from persisted timestamps.

pub mod orchestrator;
pub mod retry;
pub mod status;

pub use orchestrator::WaveOrchestrator;
pub use retry::{AnalysisResult, ResultStatus, RetryPolicy, RetryRunner};
pub use status::{get_pipeline_status, PipelineStatus};
