//! Bounded retry with timeout and exponential backoff for a single
//! analyzer call.
//!
//! ```text
//! attempt a ─▶ started row ─▶ operation (≤ timeout) ─┬─ ok ──▶ completed row ─▶ Completed
//!                                                    └─ err ─▶ failed row
//!                                                              │
//!                          sleep unit × multiplier^a ◀─────────┤ (a < max - 1)
//!                                                              └─▶ Failed (a = max - 1)
//! ```
//!
//! The runner only writes progress log rows. Session fields belong to the
//! analyzer being retried.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::AnalyzerResult;
use crate::storage::{AnalysisTask, ProgressLog};

/// Retry, backoff and timeout bounds for one wave task.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts.
    pub max_retries: u32,
    /// Exponential base of the inter-attempt delay.
    pub backoff_multiplier: f64,
    /// Delay unit multiplied by `backoff_multiplier^attempt`.
    pub backoff_unit: Duration,
    /// Deadline of a single attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (zero-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        Duration::try_from_secs_f64(self.backoff_unit.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_multiplier: 2.0,
            backoff_unit: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Terminal outcome of a retried task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// An attempt succeeded.
    Completed,
    /// Every attempt failed.
    Failed,
}

/// Transient outcome of one retried wave task. Never persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Wave (task) name.
    pub wave: AnalysisTask,
    /// Completed or failed.
    pub status: ResultStatus,
    /// When the first attempt started.
    pub started_at: DateTime<Utc>,
    /// When the successful attempt finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error text of the last failed attempt.
    pub error_message: Option<String>,
    /// Index of the successful attempt, or the number of attempts made on failure.
    pub retry_count: u32,
    /// Wall-clock time across all attempts and backoff sleeps.
    pub processing_duration_ms: u64,
}

impl AnalysisResult {
    /// Whether the task completed.
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Completed
    }

    /// Failed result for a task that died outside the retry loop
    /// (for example a panicking analyzer).
    pub fn synthetic_failure(
        wave: AnalysisTask,
        started_at: DateTime<Utc>,
        error_message: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            wave,
            status: ResultStatus::Failed,
            started_at,
            completed_at: None,
            error_message: Some(error_message.into()),
            retry_count,
            processing_duration_ms: elapsed_ms_since(started_at),
        }
    }
}

fn elapsed_ms_since(started_at: DateTime<Utc>) -> u64 {
    u64::try_from((Utc::now() - started_at).num_milliseconds()).unwrap_or_default()
}

/// Runs one wave task under a [`RetryPolicy`], recording each attempt in
/// the progress log.
pub struct RetryRunner {
    policy: RetryPolicy,
    progress: Arc<dyn ProgressLog>,
}

impl RetryRunner {
    /// Create a runner writing to the given progress log.
    pub fn new(policy: RetryPolicy, progress: Arc<dyn ProgressLog>) -> Self {
        Self { policy, progress }
    }

    /// The policy applied to every run.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `operation` until it succeeds or the attempt bound is reached.
    ///
    /// Timeouts and raised errors are treated alike; only the recorded
    /// message differs.
    pub async fn run<F, Fut>(
        &self,
        session_id: &str,
        wave: AnalysisTask,
        mut operation: F,
    ) -> AnalysisResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AnalyzerResult<()>>,
    {
        let started_at = Utc::now();
        let run_start = Instant::now();
        let max_retries = self.policy.max_retries;
        let mut last_error = format!("{} was never attempted (max_retries = 0)", wave);

        for attempt in 0..max_retries {
            if let Err(e) = self.progress.log_started(session_id, wave, attempt).await {
                warn!(session_id, wave = %wave, attempt, error = %e, "Failed to record attempt start");
            }

            let attempt_start = Instant::now();
            let outcome = tokio::time::timeout(self.policy.timeout, operation()).await;
            let duration_ms = i64::try_from(attempt_start.elapsed().as_millis()).unwrap_or(i64::MAX);

            let message = match outcome {
                Ok(Ok(())) => {
                    if let Err(e) = self
                        .progress
                        .log_completed(session_id, wave, attempt, duration_ms)
                        .await
                    {
                        warn!(session_id, wave = %wave, attempt, error = %e, "Failed to record attempt completion");
                    }
                    info!(session_id, wave = %wave, attempt, duration_ms, "Analysis attempt succeeded");

                    return AnalysisResult {
                        wave,
                        status: ResultStatus::Completed,
                        started_at,
                        completed_at: Some(Utc::now()),
                        error_message: None,
                        retry_count: attempt,
                        processing_duration_ms: run_start.elapsed().as_millis() as u64,
                    };
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "{} timed out after {}ms",
                    wave,
                    self.policy.timeout.as_millis()
                ),
            };

            if let Err(e) = self
                .progress
                .log_failed(session_id, wave, attempt, duration_ms, &message)
                .await
            {
                warn!(session_id, wave = %wave, attempt, error = %e, "Failed to record attempt failure");
            }

            if attempt + 1 < max_retries {
                let delay = self.policy.backoff_delay(attempt);
                warn!(
                    session_id,
                    wave = %wave,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Analysis attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                debug!(session_id, wave = %wave, next_attempt = attempt + 1, "Backoff elapsed");
            } else {
                error!(
                    session_id,
                    wave = %wave,
                    attempts = max_retries,
                    error = %message,
                    "Analysis failed after all retries"
                );
            }
            last_error = message;
        }

        AnalysisResult {
            wave,
            status: ResultStatus::Failed,
            started_at,
            completed_at: None,
            error_message: Some(last_error),
            retry_count: max_retries,
            processing_duration_ms: run_start.elapsed().as_millis() as u64,
        }
    }
}
