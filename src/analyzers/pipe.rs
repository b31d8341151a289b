use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use super::{Analyzer, AnalyzerSet};
use crate::config::AnalyzerPipeConfig;
use crate::error::{AnalyzerError, AnalyzerResult};
use crate::langbase::{LangbaseClient, Message, PipeRequest};
use crate::prompts::system_prompt;
use crate::storage::{AnalysisTask, Session, SessionStore};

/// Analyzer that delegates its computation to a Langbase pipe.
///
/// The request carries the session transcript and, for dependent tasks, the
/// upstream outputs. The completion is stored as the task output.
pub struct PipeAnalyzer {
    task: AnalysisTask,
    pipe_name: String,
    client: LangbaseClient,
    sessions: Arc<dyn SessionStore>,
}

impl PipeAnalyzer {
    /// Create an analyzer for `task` backed by `pipe_name`.
    pub fn new(
        task: AnalysisTask,
        pipe_name: impl Into<String>,
        client: LangbaseClient,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            task,
            pipe_name: pipe_name.into(),
            client,
            sessions,
        }
    }

    /// Build all five analyzers from the configured pipe names.
    pub fn set_from_config(
        pipes: &AnalyzerPipeConfig,
        client: LangbaseClient,
        sessions: Arc<dyn SessionStore>,
    ) -> AnalyzerSet {
        let make = |task: AnalysisTask, pipe: &str| -> Arc<dyn Analyzer> {
            Arc::new(PipeAnalyzer::new(
                task,
                pipe,
                client.clone(),
                Arc::clone(&sessions),
            ))
        };

        AnalyzerSet {
            mood: make(AnalysisTask::Mood, &pipes.mood),
            topics: make(AnalysisTask::Topics, &pipes.topics),
            breakthrough: make(AnalysisTask::Breakthrough, &pipes.breakthrough),
            action_summary: make(AnalysisTask::ActionSummary, &pipes.action_summary),
            deep: make(AnalysisTask::Deep, &pipes.deep),
        }
    }

    /// Upstream outputs this task cannot run without.
    fn required_inputs(&self) -> &'static [AnalysisTask] {
        match self.task {
            AnalysisTask::ActionSummary => &[AnalysisTask::Topics],
            AnalysisTask::Deep => &AnalysisTask::WAVE1_CORE,
            _ => &[],
        }
    }

    /// Upstream outputs included when present.
    fn optional_inputs(&self) -> &'static [AnalysisTask] {
        match self.task {
            AnalysisTask::Deep => &[AnalysisTask::ActionSummary],
            _ => &[],
        }
    }

    fn build_input(&self, session: &Session) -> AnalyzerResult<serde_json::Value> {
        let transcript = session
            .transcript
            .as_ref()
            .ok_or_else(|| AnalyzerError::MissingInput {
                task: self.task.to_string(),
                dependency: "transcript".to_string(),
            })?;

        let mut input = json!({
            "session_id": session.id,
            "transcript": transcript,
        });

        for dependency in self.required_inputs() {
            let output = session
                .output(*dependency)
                .ok_or_else(|| AnalyzerError::MissingInput {
                    task: self.task.to_string(),
                    dependency: dependency.to_string(),
                })?;
            input[dependency.as_str()] = output.clone();
        }

        for dependency in self.optional_inputs() {
            if let Some(output) = session.output(*dependency) {
                input[dependency.as_str()] = output.clone();
            }
        }

        Ok(input)
    }
}

#[async_trait]
impl Analyzer for PipeAnalyzer {
    fn task(&self) -> AnalysisTask {
        self.task
    }

    async fn analyze(&self, session_id: &str, force: bool) -> AnalyzerResult<()> {
        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| AnalyzerError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;

        if !force && session.is_complete(self.task) {
            debug!(session_id, task = %self.task, "Task already complete, skipping");
            return Ok(());
        }

        let input = self.build_input(&session)?;
        let request = PipeRequest::new(
            &self.pipe_name,
            vec![
                Message::system(system_prompt(self.task)),
                Message::user(input.to_string()),
            ],
        )
        .with_variable("session_id", session_id);

        let response = self.client.call_pipe(&request).await?;
        if !response.success {
            return Err(AnalyzerError::Execution {
                message: format!("pipe {} reported failure", self.pipe_name),
            });
        }

        // Output and timestamp land in one update.
        self.sessions
            .record_task_output(session_id, self.task, &response.completion_json(), Utc::now())
            .await?;

        info!(session_id, task = %self.task, pipe = %self.pipe_name, "Analysis stored");
        Ok(())
    }
}
