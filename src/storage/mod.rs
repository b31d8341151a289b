//! Storage layer for session analysis persistence.
//!
//! Two narrow contracts are consumed by the pipeline:
//!
//! - [`SessionStore`]: point reads and single-row updates of a session's
//!   analysis status, per-task outputs and completion timestamps.
//! - [`ProgressLog`]: append-only audit trail of analyzer attempts.
//!
//! [`SqliteStorage`] implements both on top of a single SQLite pool.

mod sqlite;


pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;

/// Overall analysis state of a session.
///
/// ```text
/// pending → wave1_running → wave1_complete → wave2_running → complete
///                 │                               │
///                 └──────────→ failed ←───────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// No pipeline run has started yet.
    #[default]
    Pending,
    /// The parallel Wave 1 analyzers are running.
    Wave1Running,
    /// Wave 1 finished; internal marker before Wave 2 starts.
    Wave1Complete,
    /// The deep synthesis analyzer is running.
    Wave2Running,
    /// Both waves finished successfully.
    Complete,
    /// A fatal wave failure occurred. Terminal until a forced re-run.
    Failed,
}

impl AnalysisStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Wave1Running => "wave1_running",
            AnalysisStatus::Wave1Complete => "wave1_complete",
            AnalysisStatus::Wave2Running => "wave2_running",
            AnalysisStatus::Complete => "complete",
            AnalysisStatus::Failed => "failed",
        }
    }

    /// Whether `next` is a legal edge of the status state machine.
    ///
    /// Any state may re-enter `wave1_running`, which is how forced re-runs
    /// and crash recovery restart a session.
    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        use AnalysisStatus::*;
        matches!(
            (self, next),
            (_, Wave1Running)
                | (Wave1Running, Wave1Complete)
                | (Wave1Running, Failed)
                | (Wave1Complete, Wave2Running)
                | (Wave2Running, Complete)
                | (Wave2Running, Failed)
                | (Complete, Wave2Running)
                | (Failed, Wave2Running)
        )
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(AnalysisStatus::Pending),
            "wave1_running" => Ok(AnalysisStatus::Wave1Running),
            "wave1_complete" => Ok(AnalysisStatus::Wave1Complete),
            "wave2_running" => Ok(AnalysisStatus::Wave2Running),
            "complete" => Ok(AnalysisStatus::Complete),
            "failed" => Ok(AnalysisStatus::Failed),
            _ => Err(format!("Unknown analysis status: {}", s)),
        }
    }
}

/// One analysis task of the pipeline. The task name doubles as the wave
/// name recorded in the progress log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisTask {
    /// Mood scoring (Wave 1, parallel).
    Mood,
    /// Topic extraction (Wave 1, parallel).
    Topics,
    /// Breakthrough detection (Wave 1, parallel).
    Breakthrough,
    /// Action item summary (Wave 1, dependent on Topics, best-effort).
    ActionSummary,
    /// Deep synthesis (Wave 2).
    Deep,
}

impl AnalysisTask {
    /// Tasks whose joint success gates Wave 2.
    pub const WAVE1_CORE: [AnalysisTask; 3] = [
        AnalysisTask::Mood,
        AnalysisTask::Topics,
        AnalysisTask::Breakthrough,
    ];

    /// Every task in pipeline order.
    pub const ALL: [AnalysisTask; 5] = [
        AnalysisTask::Mood,
        AnalysisTask::Topics,
        AnalysisTask::Breakthrough,
        AnalysisTask::ActionSummary,
        AnalysisTask::Deep,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisTask::Mood => "mood",
            AnalysisTask::Topics => "topics",
            AnalysisTask::Breakthrough => "breakthrough",
            AnalysisTask::ActionSummary => "action_summary",
            AnalysisTask::Deep => "deep",
        }
    }
}

impl std::fmt::Display for AnalysisTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnalysisTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mood" => Ok(AnalysisTask::Mood),
            "topics" => Ok(AnalysisTask::Topics),
            "breakthrough" => Ok(AnalysisTask::Breakthrough),
            "action_summary" => Ok(AnalysisTask::ActionSummary),
            "deep" => Ok(AnalysisTask::Deep),
            _ => Err(format!("Unknown analysis task: {}", s)),
        }
    }
}

/// A unit of work analysed by the pipeline.
///
/// A completion timestamp is the source of truth for "this task finished";
/// when it is set, the matching output field is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Input material for the analyzers (transcript segments, metadata).
    pub transcript: Option<serde_json::Value>,
    /// Current pipeline state. Written only by the orchestrator.
    pub analysis_status: AnalysisStatus,
    pub mood_output: Option<serde_json::Value>,
    pub mood_analyzed_at: Option<DateTime<Utc>>,
    pub topics_output: Option<serde_json::Value>,
    pub topics_extracted_at: Option<DateTime<Utc>>,
    pub breakthrough_output: Option<serde_json::Value>,
    pub breakthrough_analyzed_at: Option<DateTime<Utc>>,
    pub action_summary_output: Option<serde_json::Value>,
    pub action_items_summarized_at: Option<DateTime<Utc>>,
    pub deep_output: Option<serde_json::Value>,
    pub deep_analyzed_at: Option<DateTime<Utc>>,
    /// Milestone written by the orchestrator once Wave 1 has passed.
    pub wave1_completed_at: Option<DateTime<Utc>>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a pending session with a generated identifier.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Create a pending session with the given identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            transcript: None,
            analysis_status: AnalysisStatus::Pending,
            mood_output: None,
            mood_analyzed_at: None,
            topics_output: None,
            topics_extracted_at: None,
            breakthrough_output: None,
            breakthrough_analyzed_at: None,
            action_summary_output: None,
            action_items_summarized_at: None,
            deep_output: None,
            deep_analyzed_at: None,
            wave1_completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach analyzer input.
    pub fn with_transcript(mut self, transcript: serde_json::Value) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Completion timestamp of a task, if it has finished.
    pub fn completed_at(&self, task: AnalysisTask) -> Option<DateTime<Utc>> {
        match task {
            AnalysisTask::Mood => self.mood_analyzed_at,
            AnalysisTask::Topics => self.topics_extracted_at,
            AnalysisTask::Breakthrough => self.breakthrough_analyzed_at,
            AnalysisTask::ActionSummary => self.action_items_summarized_at,
            AnalysisTask::Deep => self.deep_analyzed_at,
        }
    }

    /// Output of a task, if it has been written.
    pub fn output(&self, task: AnalysisTask) -> Option<&serde_json::Value> {
        match task {
            AnalysisTask::Mood => self.mood_output.as_ref(),
            AnalysisTask::Topics => self.topics_output.as_ref(),
            AnalysisTask::Breakthrough => self.breakthrough_output.as_ref(),
            AnalysisTask::ActionSummary => self.action_summary_output.as_ref(),
            AnalysisTask::Deep => self.deep_output.as_ref(),
        }
    }

    /// Whether the task has a completion timestamp.
    pub fn is_complete(&self, task: AnalysisTask) -> bool {
        self.completed_at(task).is_some()
    }

    /// Core Wave 1 tasks that have no completion timestamp.
    pub fn missing_wave1(&self) -> Vec<AnalysisTask> {
        AnalysisTask::WAVE1_CORE
            .into_iter()
            .filter(|task| !self.is_complete(*task))
            .collect()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Status of a progress log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Attempt in flight.
    Started,
    /// Attempt succeeded.
    Completed,
    /// Attempt raised or timed out.
    Failed,
}

impl ProgressStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Started => "started",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProgressStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "started" => Ok(ProgressStatus::Started),
            "completed" => Ok(ProgressStatus::Completed),
            "failed" => Ok(ProgressStatus::Failed),
            _ => Err(format!("Unknown progress status: {}", s)),
        }
    }
}

/// One analyzer attempt in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressLogEntry {
    /// Insertion-ordered row identifier.
    pub id: i64,
    /// Session the attempt belongs to.
    pub session_id: String,
    /// Wave (task) name.
    pub wave: AnalysisTask,
    /// Started until resolved, then completed or failed.
    pub status: ProgressStatus,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt resolved.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error text of a failed attempt.
    pub error_message: Option<String>,
    /// Zero-based attempt index.
    pub retry_count: u32,
    /// Wall-clock duration of a resolved attempt.
    pub processing_duration_ms: Option<i64>,
}

/// Session persistence consumed by the orchestrator and analyzers.
///
/// Writes are single-row updates; no cross-row transactions are required.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session.
    async fn create_session(&self, session: &Session) -> StorageResult<()>;
    /// Point read of a session.
    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>>;
    /// Set `analysis_status`. Orchestrator only.
    async fn update_analysis_status(&self, id: &str, status: AnalysisStatus) -> StorageResult<()>;
    /// Write a task's output and completion timestamp as one update. Analyzers only.
    async fn record_task_output(
        &self,
        id: &str,
        task: AnalysisTask,
        output: &serde_json::Value,
        completed_at: DateTime<Utc>,
    ) -> StorageResult<()>;
    /// Set the `wave1_completed_at` milestone.
    async fn mark_wave1_complete(&self, id: &str, at: DateTime<Utc>) -> StorageResult<()>;
    /// Set `deep_analyzed_at` unless the analyzer already stamped it.
    async fn mark_deep_analyzed(&self, id: &str, at: DateTime<Utc>) -> StorageResult<()>;
}

/// Append-only audit trail of analyzer attempts.
#[async_trait]
pub trait ProgressLog: Send + Sync {
    /// Insert a `started` row for an attempt.
    async fn log_started(
        &self,
        session_id: &str,
        wave: AnalysisTask,
        retry_count: u32,
    ) -> StorageResult<()>;
    /// Transition the most recent `started` row for `(session_id, wave)` to `completed`.
    async fn log_completed(
        &self,
        session_id: &str,
        wave: AnalysisTask,
        retry_count: u32,
        duration_ms: i64,
    ) -> StorageResult<()>;
    /// Transition the most recent `started` row for `(session_id, wave)` to `failed`.
    async fn log_failed(
        &self,
        session_id: &str,
        wave: AnalysisTask,
        retry_count: u32,
        duration_ms: i64,
        error: &str,
    ) -> StorageResult<()>;
    /// All entries for a session in insertion order.
    async fn get_progress(&self, session_id: &str) -> StorageResult<Vec<ProgressLogEntry>>;
}
