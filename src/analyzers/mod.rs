//! Analyzer contract consumed by the wave orchestrator.
//!
//! An analyzer owns one [`AnalysisTask`]: it reads the session, performs its
//! computation, and commits output plus completion timestamp as one update.
//! Analyzers are skip-capable: with `force == false` and the task's
//! completion timestamp already set, `analyze` returns without side effects.

mod pipe;

pub use pipe::PipeAnalyzer;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AnalyzerResult;
use crate::storage::AnalysisTask;

/// One kind of session analysis.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// The task this analyzer completes.
    fn task(&self) -> AnalysisTask;

    /// Analyze the session. Idempotent; a raised error must leave the
    /// completion timestamp unset.
    async fn analyze(&self, session_id: &str, force: bool) -> AnalyzerResult<()>;
}

/// The five analyzers of the two-wave topology.
#[derive(Clone)]
pub struct AnalyzerSet {
    pub mood: Arc<dyn Analyzer>,
    pub topics: Arc<dyn Analyzer>,
    pub breakthrough: Arc<dyn Analyzer>,
    pub action_summary: Arc<dyn Analyzer>,
    pub deep: Arc<dyn Analyzer>,
}

impl AnalyzerSet {
    /// Analyzer registered for `task`.
    pub fn get(&self, task: AnalysisTask) -> Arc<dyn Analyzer> {
        match task {
            AnalysisTask::Mood => Arc::clone(&self.mood),
            AnalysisTask::Topics => Arc::clone(&self.topics),
            AnalysisTask::Breakthrough => Arc::clone(&self.breakthrough),
            AnalysisTask::ActionSummary => Arc::clone(&self.action_summary),
            AnalysisTask::Deep => Arc::clone(&self.deep),
        }
    }

    /// Slots whose analyzer reports a different task than the slot name.
    pub fn misplaced(&self) -> Vec<AnalysisTask> {
        AnalysisTask::ALL
            .into_iter()
            .filter(|task| self.get(*task).task() != *task)
            .collect()
    }
}
