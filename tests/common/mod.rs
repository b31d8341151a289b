//! Shared fixtures for integration tests: scripted analyzers and an
//! in-memory store.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use session_analysis_pipeline::analyzers::{Analyzer, AnalyzerSet};
use session_analysis_pipeline::error::{AnalyzerError, AnalyzerResult};
use session_analysis_pipeline::pipeline::{RetryPolicy, WaveOrchestrator};
use session_analysis_pipeline::storage::{
    AnalysisTask, ProgressLogEntry, ProgressStatus, Session, SessionStore, SqliteStorage,
};

/// What a scripted analyzer does when it actually computes.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write output and timestamp.
    Succeed,
    /// Raise on every attempt.
    Fail(&'static str),
    /// Raise on the first `n` attempts, then succeed.
    FailTimes(u32),
    /// Sleep, then succeed.
    Delay(Duration),
    /// Sleep far past any test timeout.
    Hang,
    /// Panic inside the analyzer.
    Panic,
    /// Report success without committing anything.
    SucceedWithoutTimestamp,
}

/// Analyzer honoring the skip contract with scripted computation.
pub struct ScriptedAnalyzer {
    task: AnalysisTask,
    sessions: Arc<dyn SessionStore>,
    behavior: Behavior,
    calls: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedAnalyzer {
    pub fn new(task: AnalysisTask, sessions: Arc<dyn SessionStore>, behavior: Behavior) -> Self {
        Self {
            task,
            sessions,
            behavior,
            calls: AtomicU32::new(0),
            call_times: Mutex::new(Vec::new()),
        }
    }

    /// Number of times the analyzer computed (skips excluded).
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    async fn commit(&self, session_id: &str) -> AnalyzerResult<()> {
        self.sessions
            .record_task_output(
                session_id,
                self.task,
                &json!({ "task": self.task.as_str(), "ok": true }),
                Utc::now(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
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
            return Ok(());
        }

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());

        match &self.behavior {
            Behavior::Succeed => self.commit(session_id).await,
            Behavior::Fail(message) => Err(AnalyzerError::Execution {
                message: message.to_string(),
            }),
            Behavior::FailTimes(n) if call < *n => Err(AnalyzerError::Execution {
                message: format!("transient failure {}", call),
            }),
            Behavior::FailTimes(_) => self.commit(session_id).await,
            Behavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                self.commit(session_id).await
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Behavior::Panic => panic!("{} analyzer exploded", self.task),
            Behavior::SucceedWithoutTimestamp => Ok(()),
        }
    }
}

/// Five scripted analyzers plus handles to inspect them.
pub struct Harness {
    pub storage: Arc<SqliteStorage>,
    pub analyzers: Vec<Arc<ScriptedAnalyzer>>,
    pub orchestrator: WaveOrchestrator,
}

impl Harness {
    /// All analyzers succeed.
    pub async fn new() -> Self {
        Self::with_behaviors(&[]).await
    }

    /// Override behaviors per task; the rest succeed.
    pub async fn with_behaviors(overrides: &[(AnalysisTask, Behavior)]) -> Self {
        Self::with_policy(overrides, fast_policy()).await
    }

    pub async fn with_policy(overrides: &[(AnalysisTask, Behavior)], policy: RetryPolicy) -> Self {
        let storage = Arc::new(
            SqliteStorage::new_in_memory()
                .await
                .expect("Failed to create in-memory storage"),
        );

        let analyzers: Vec<Arc<ScriptedAnalyzer>> = AnalysisTask::ALL
            .into_iter()
            .map(|task| {
                let behavior = overrides
                    .iter()
                    .find(|(t, _)| *t == task)
                    .map(|(_, b)| b.clone())
                    .unwrap_or(Behavior::Succeed);
                Arc::new(ScriptedAnalyzer::new(task, storage.clone(), behavior))
            })
            .collect();

        let set = AnalyzerSet {
            mood: analyzers[0].clone(),
            topics: analyzers[1].clone(),
            breakthrough: analyzers[2].clone(),
            action_summary: analyzers[3].clone(),
            deep: analyzers[4].clone(),
        };

        let orchestrator = WaveOrchestrator::new(storage.clone(), storage.clone(), set, policy);

        Self {
            storage,
            analyzers,
            orchestrator,
        }
    }

    pub fn analyzer(&self, task: AnalysisTask) -> &ScriptedAnalyzer {
        let index = AnalysisTask::ALL
            .iter()
            .position(|t| *t == task)
            .expect("known task");
        &self.analyzers[index]
    }

    pub fn total_calls(&self) -> u32 {
        self.analyzers.iter().map(|a| a.calls()).sum()
    }

    pub async fn create_session(&self, id: &str) {
        self.storage
            .create_session(&Session::with_id(id).with_transcript(json!({"text": "hello"})))
            .await
            .expect("Failed to create session");
    }

    pub async fn session(&self, id: &str) -> Session {
        self.storage
            .get_session(id)
            .await
            .expect("query")
            .expect("session exists")
    }

    pub async fn progress(&self, id: &str) -> Vec<ProgressLogEntry> {
        use session_analysis_pipeline::storage::ProgressLog;
        self.storage.get_progress(id).await.expect("progress")
    }
}

/// Three attempts, 1ms backoff unit, 2s timeout.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        backoff_multiplier: 2.0,
        backoff_unit: Duration::from_millis(1),
        timeout: Duration::from_secs(2),
    }
}

pub fn entries_for(
    entries: &[ProgressLogEntry],
    wave: AnalysisTask,
) -> Vec<&ProgressLogEntry> {
    entries.iter().filter(|e| e.wave == wave).collect()
}

pub fn count_status(entries: &[ProgressLogEntry], status: ProgressStatus) -> usize {
    entries.iter().filter(|e| e.status == status).count()
}
