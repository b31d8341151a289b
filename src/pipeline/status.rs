use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineResult, StorageError};
use crate::storage::{AnalysisStatus, AnalysisTask, Session, SessionStore};

/// Read-only snapshot of a session's analysis progress.
///
/// Always derived from the session's persisted timestamps, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub session_id: String,
    pub analysis_status: AnalysisStatus,
    pub mood_complete: bool,
    pub topics_complete: bool,
    pub breakthrough_complete: bool,
    pub action_summary_complete: bool,
    /// Mood, Topics and Breakthrough all have completion timestamps.
    pub wave1_complete: bool,
    pub deep_complete: bool,
    pub wave1_completed_at: Option<DateTime<Utc>>,
    pub deep_analyzed_at: Option<DateTime<Utc>>,
}

impl PipelineStatus {
    /// Derive the snapshot from a session record.
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            analysis_status: session.analysis_status,
            mood_complete: session.is_complete(AnalysisTask::Mood),
            topics_complete: session.is_complete(AnalysisTask::Topics),
            breakthrough_complete: session.is_complete(AnalysisTask::Breakthrough),
            action_summary_complete: session.is_complete(AnalysisTask::ActionSummary),
            wave1_complete: session.missing_wave1().is_empty(),
            deep_complete: session.is_complete(AnalysisTask::Deep),
            wave1_completed_at: session.wave1_completed_at,
            deep_analyzed_at: session.deep_analyzed_at,
        }
    }
}

/// Current pipeline status of a session.
///
/// Performs no writes; safe to call while a run is in flight.
pub async fn get_pipeline_status(
    sessions: &dyn SessionStore,
    session_id: &str,
) -> PipelineResult<PipelineStatus> {
    let session = sessions
        .get_session(session_id)
        .await?
        .ok_or_else(|| StorageError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;

    Ok(PipelineStatus::from_session(&session))
}
