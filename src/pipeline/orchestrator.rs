//! Two-wave analysis orchestrator.
//!
//! ```text
//!              ┌── Mood ──────────┐
//! Wave 1  ─────┼── Topics ────────┼──▶ all ok? ──▶ ActionSummary ──▶ wave1_completed_at
//! (parallel)   └── Breakthrough ──┘       │          (best-effort)           │
//!                                         ▼                                  ▼
//!                                       failed        persisted re-check ──▶ Deep ──▶ complete
//! ```
//!
//! Only the orchestrator writes `analysis_status`; analyzers own their
//! output fields and completion timestamps.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use super::retry::{AnalysisResult, RetryPolicy, RetryRunner};
use super::status::{get_pipeline_status, PipelineStatus};
use crate::analyzers::AnalyzerSet;
use crate::error::{PipelineError, PipelineResult, StorageError};
use crate::storage::{
    AnalysisStatus, AnalysisTask, ProgressLog, ProgressStatus, Session, SessionStore,
};

/// Drives the fixed two-wave topology for one session at a time.
///
/// Independent invocations for different sessions share no mutable state
/// and may run concurrently.
pub struct WaveOrchestrator {
    sessions: Arc<dyn SessionStore>,
    progress: Arc<dyn ProgressLog>,
    runner: Arc<RetryRunner>,
    analyzers: AnalyzerSet,
}

impl WaveOrchestrator {
    /// Create an orchestrator with its own retry policy.
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        progress: Arc<dyn ProgressLog>,
        analyzers: AnalyzerSet,
        policy: RetryPolicy,
    ) -> Self {
        let misplaced = analyzers.misplaced();
        if !misplaced.is_empty() {
            warn!(?misplaced, "Analyzer registered under a different task slot");
        }

        Self {
            sessions,
            runner: Arc::new(RetryRunner::new(policy, Arc::clone(&progress))),
            progress,
            analyzers,
        }
    }

    /// The retry policy applied to every task.
    pub fn policy(&self) -> &RetryPolicy {
        self.runner.policy()
    }

    /// Run both waves for a session and return its final status.
    ///
    /// With `force == false` a fully analysed session is returned as-is and a
    /// failed session is rejected with [`PipelineError::AlreadyFailed`].
    pub async fn process_session_full_pipeline(
        &self,
        session_id: &str,
        force: bool,
    ) -> PipelineResult<PipelineStatus> {
        let session = self.load_session(session_id).await?;

        if !force {
            if session.analysis_status == AnalysisStatus::Complete
                && session.missing_wave1().is_empty()
                && session.is_complete(AnalysisTask::Deep)
            {
                info!(session_id, "Session already analysed, nothing to do");
                return Ok(PipelineStatus::from_session(&session));
            }
            if session.analysis_status == AnalysisStatus::Failed {
                return Err(PipelineError::AlreadyFailed {
                    session_id: session_id.to_string(),
                });
            }
        }

        info!(session_id, force, "Starting full analysis pipeline");

        self.execute_wave1(&session, force).await?;

        self.set_status(
            session_id,
            AnalysisStatus::Wave1Complete,
            AnalysisStatus::Wave2Running,
        )
        .await?;

        if let Err(e) = self.verify_wave1_persisted(session_id).await {
            self.set_status(
                session_id,
                AnalysisStatus::Wave2Running,
                AnalysisStatus::Failed,
            )
            .await?;
            return Err(e);
        }

        self.execute_deep(session_id, force).await?;

        let status = get_pipeline_status(self.sessions.as_ref(), session_id).await?;
        info!(
            session_id,
            analysis_status = %status.analysis_status,
            "Analysis pipeline finished"
        );
        Ok(status)
    }

    /// Run Wave 1 only: the parallel core tasks, then the best-effort
    /// ActionSummary. Returns every task result.
    pub async fn run_wave1(
        &self,
        session_id: &str,
        force: bool,
    ) -> PipelineResult<Vec<AnalysisResult>> {
        let session = self.load_session(session_id).await?;
        self.execute_wave1(&session, force).await
    }

    /// Run Wave 2 only, after confirming from storage that Wave 1 finished.
    ///
    /// A missing core timestamp raises [`PipelineError::PreconditionFailed`]
    /// without touching the session or invoking the deep analyzer. A failed
    /// session is rejected unless `force` is set.
    pub async fn run_wave2(&self, session_id: &str, force: bool) -> PipelineResult<AnalysisResult> {
        let session = self.load_session(session_id).await?;
        if !force && session.analysis_status == AnalysisStatus::Failed {
            return Err(PipelineError::AlreadyFailed {
                session_id: session_id.to_string(),
            });
        }
        self.verify_wave1_persisted(session_id).await?;

        self.set_status(
            session_id,
            session.analysis_status,
            AnalysisStatus::Wave2Running,
        )
        .await?;

        self.execute_deep(session_id, force).await
    }

    /// Current status snapshot of a session.
    pub async fn pipeline_status(&self, session_id: &str) -> PipelineResult<PipelineStatus> {
        get_pipeline_status(self.sessions.as_ref(), session_id).await
    }

    async fn execute_wave1(
        &self,
        session: &Session,
        force: bool,
    ) -> PipelineResult<Vec<AnalysisResult>> {
        let session_id = session.id.as_str();

        self.set_status(
            session_id,
            session.analysis_status,
            AnalysisStatus::Wave1Running,
        )
        .await?;
        info!(session_id, "Wave 1 started");

        let started_at = Utc::now();
        let (mood, topics, breakthrough) = tokio::join!(
            self.spawn_task(session_id, AnalysisTask::Mood, force),
            self.spawn_task(session_id, AnalysisTask::Topics, force),
            self.spawn_task(session_id, AnalysisTask::Breakthrough, force),
        );
        let mut results = vec![
            self.settle(session_id, AnalysisTask::Mood, mood, started_at).await,
            self.settle(session_id, AnalysisTask::Topics, topics, started_at).await,
            self.settle(session_id, AnalysisTask::Breakthrough, breakthrough, started_at)
                .await,
        ];

        let failed: Vec<String> = results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.wave.to_string())
            .collect();

        if !failed.is_empty() {
            error!(session_id, failed = ?failed, "Wave 1 failed");
            self.set_status(session_id, AnalysisStatus::Wave1Running, AnalysisStatus::Failed)
                .await?;
            return Err(PipelineError::Wave1Failed {
                session_id: session_id.to_string(),
                failed,
            });
        }

        // Reads the Topics output, so it runs only after the parallel phase.
        let summary_started = Utc::now();
        let summary = self.spawn_task(session_id, AnalysisTask::ActionSummary, force).await;
        let summary = self
            .settle(session_id, AnalysisTask::ActionSummary, summary, summary_started)
            .await;
        if !summary.is_success() {
            warn!(
                session_id,
                error = summary.error_message.as_deref().unwrap_or("unknown"),
                "Action summary failed, continuing without it"
            );
        }
        results.push(summary);

        self.sessions
            .mark_wave1_complete(session_id, Utc::now())
            .await?;
        self.set_status(
            session_id,
            AnalysisStatus::Wave1Running,
            AnalysisStatus::Wave1Complete,
        )
        .await?;
        info!(session_id, "Wave 1 complete");

        Ok(results)
    }

    /// Re-read the session and require every core Wave 1 timestamp.
    async fn verify_wave1_persisted(&self, session_id: &str) -> PipelineResult<()> {
        let session = self.load_session(session_id).await?;
        let missing = session.missing_wave1();
        if missing.is_empty() {
            return Ok(());
        }

        let missing: Vec<String> = missing.iter().map(|t| t.to_string()).collect();
        error!(session_id, missing = ?missing, "Wave 2 precondition not met");
        Err(PipelineError::PreconditionFailed {
            session_id: session_id.to_string(),
            missing,
        })
    }

    /// Run the deep synthesis; the session must already be `wave2_running`.
    async fn execute_deep(&self, session_id: &str, force: bool) -> PipelineResult<AnalysisResult> {
        info!(session_id, "Wave 2 started");

        let started_at = Utc::now();
        let joined = self.spawn_task(session_id, AnalysisTask::Deep, force).await;
        let result = self
            .settle(session_id, AnalysisTask::Deep, joined, started_at)
            .await;

        if !result.is_success() {
            let message = result
                .error_message
                .clone()
                .unwrap_or_else(|| "deep analysis failed".to_string());
            error!(session_id, error = %message, "Wave 2 failed");
            self.set_status(session_id, AnalysisStatus::Wave2Running, AnalysisStatus::Failed)
                .await?;
            return Err(PipelineError::Wave2Failed {
                session_id: session_id.to_string(),
                message,
            });
        }

        self.sessions
            .mark_deep_analyzed(session_id, Utc::now())
            .await?;
        self.set_status(session_id, AnalysisStatus::Wave2Running, AnalysisStatus::Complete)
            .await?;
        info!(session_id, "Wave 2 complete");

        Ok(result)
    }

    /// Run one task through the retry runner on its own tokio task, so a
    /// panicking analyzer cannot take down its siblings.
    async fn spawn_task(
        &self,
        session_id: &str,
        task: AnalysisTask,
        force: bool,
    ) -> Result<AnalysisResult, JoinError> {
        let runner = Arc::clone(&self.runner);
        let analyzer = self.analyzers.get(task);
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            runner
                .run(&session_id, task, || analyzer.analyze(&session_id, force))
                .await
        })
        .await
    }

    /// Turn a joined task into its result. An aborted task also closes the
    /// attempt it left open in the progress log.
    async fn settle(
        &self,
        session_id: &str,
        task: AnalysisTask,
        joined: Result<AnalysisResult, JoinError>,
        started_at: DateTime<Utc>,
    ) -> AnalysisResult {
        match joined {
            Ok(result) => result,
            Err(e) => {
                let message = format!("{} task aborted: {}", task, e);
                error!(session_id, task = %task, error = %e, "Analyzer task aborted");
                self.fail_open_attempt(session_id, task, &message).await;
                AnalysisResult::synthetic_failure(
                    task,
                    started_at,
                    message,
                    self.runner.policy().max_retries,
                )
            }
        }
    }

    /// Mark the latest `started` row of `task` as failed.
    async fn fail_open_attempt(&self, session_id: &str, task: AnalysisTask, message: &str) {
        let entries = match self.progress.get_progress(session_id).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(session_id, task = %task, error = %e, "Failed to load progress for aborted task");
                return;
            }
        };

        let open = entries
            .iter()
            .rev()
            .find(|entry| entry.wave == task && entry.status == ProgressStatus::Started);
        let Some(open) = open else {
            return;
        };

        let duration_ms = (Utc::now() - open.started_at).num_milliseconds().max(0);
        if let Err(e) = self
            .progress
            .log_failed(session_id, task, open.retry_count, duration_ms, message)
            .await
        {
            warn!(session_id, task = %task, error = %e, "Failed to record aborted attempt");
        }
    }

    async fn set_status(
        &self,
        session_id: &str,
        from: AnalysisStatus,
        to: AnalysisStatus,
    ) -> PipelineResult<()> {
        if !from.can_transition_to(to) {
            warn!(session_id, from = %from, to = %to, "Unexpected analysis status transition");
        }
        self.sessions.update_analysis_status(session_id, to).await?;
        debug!(session_id, status = %to, "Analysis status updated");
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> PipelineResult<Session> {
        self.sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| {
                StorageError::SessionNotFound {
                    session_id: session_id.to_string(),
                }
                .into()
            })
    }
}
