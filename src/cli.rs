//! Command-line entry points for importing sessions, running the pipeline
//! and inspecting its state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};

use crate::analyzers::PipeAnalyzer;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::langbase::LangbaseClient;
use crate::pipeline::{get_pipeline_status, PipelineStatus, WaveOrchestrator};
use crate::storage::{ProgressLog, ProgressLogEntry, Session, SessionStore, SqliteStorage};

/// Session analysis pipeline.
#[derive(Parser, Debug)]
#[command(name = "session-pipeline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Pipeline subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Register a new pending session from a transcript file
    Import {
        /// Transcript file (JSON, or plain text stored as {"text": ...})
        #[arg(long)]
        transcript: PathBuf,

        /// Session identifier (generated when omitted)
        #[arg(long)]
        session_id: Option<String>,
    },

    /// Run both analysis waves for a session
    Run {
        /// Session identifier
        session_id: String,

        /// Recompute tasks that already completed, and re-enter failed sessions
        #[arg(long)]
        force: bool,
    },

    /// Show the pipeline status of a session as JSON
    Status {
        /// Session identifier
        session_id: String,
    },

    /// Show the attempt log of a session
    Progress {
        /// Session identifier
        session_id: String,
    },
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a CLI command against the configured storage.
pub async fn execute_command(
    command: Commands,
    config: &Config,
    storage: &SqliteStorage,
) -> CliResult {
    match command {
        Commands::Import {
            transcript,
            session_id,
        } => execute_import(storage, &transcript, session_id).await,
        Commands::Run { session_id, force } => match build_orchestrator(config, storage) {
            Ok(orchestrator) => execute_run(&orchestrator, &session_id, force).await,
            Err(e) => CliResult::error(e.to_string()),
        },
        Commands::Status { session_id } => execute_status(storage, &session_id).await,
        Commands::Progress { session_id } => execute_progress(storage, &session_id).await,
    }
}

/// Wire Langbase-backed analyzers to the storage.
pub fn build_orchestrator(
    config: &Config,
    storage: &SqliteStorage,
) -> AppResult<WaveOrchestrator> {
    let langbase = config.langbase.as_ref().ok_or_else(|| AppError::Config {
        message: "LANGBASE_API_KEY is required to run the pipeline".to_string(),
    })?;
    let client = LangbaseClient::new(langbase, config.request.clone())?;

    let storage = Arc::new(storage.clone());
    let analyzers = PipeAnalyzer::set_from_config(&config.pipes, client, storage.clone());

    Ok(WaveOrchestrator::new(
        storage.clone(),
        storage,
        analyzers,
        config.pipeline.retry_policy(),
    ))
}

/// Register a session from a transcript file.
pub async fn execute_import(
    storage: &dyn SessionStore,
    transcript: &Path,
    session_id: Option<String>,
) -> CliResult {
    let raw = match tokio::fs::read_to_string(transcript).await {
        Ok(raw) => raw,
        Err(e) => {
            return CliResult::error(format!(
                "Failed to read transcript {}: {}",
                transcript.display(),
                e
            ))
        }
    };

    let transcript = serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({ "text": raw }));
    let session = match session_id {
        Some(id) => Session::with_id(id),
        None => Session::new(),
    }
    .with_transcript(transcript);

    match storage.create_session(&session).await {
        Ok(()) => CliResult::success(format!("Imported session {}", session.id)),
        Err(e) => CliResult::error(format!("Import failed: {}", e)),
    }
}

/// Run the full pipeline and report the final status.
pub async fn execute_run(
    orchestrator: &WaveOrchestrator,
    session_id: &str,
    force: bool,
) -> CliResult {
    let result = orchestrator
        .process_session_full_pipeline(session_id, force)
        .await;
    render_status(result.map_err(AppError::from))
}

/// Print the status snapshot as JSON.
pub async fn execute_status(storage: &dyn SessionStore, session_id: &str) -> CliResult {
    let result = get_pipeline_status(storage, session_id).await;
    render_status(result.map_err(AppError::from))
}

fn render_status(result: AppResult<PipelineStatus>) -> CliResult {
    match result {
        Ok(status) => match serde_json::to_string_pretty(&status) {
            Ok(json) => CliResult::success(json),
            Err(e) => CliResult::error(format!("Failed to render status: {}", e)),
        },
        Err(e) => CliResult::error(e.to_string()),
    }
}

/// Print the attempt log.
pub async fn execute_progress(storage: &dyn ProgressLog, session_id: &str) -> CliResult {
    let entries = match storage.get_progress(session_id).await {
        Ok(entries) => entries,
        Err(e) => return CliResult::error(format!("Failed to load progress: {}", e)),
    };

    if entries.is_empty() {
        return CliResult::success(format!("No attempts recorded for session {}", session_id));
    }

    let mut output = format!("Attempts for session {}\n", session_id);
    output.push_str("═══════════════════════════════════════════════════════════════\n");
    for entry in &entries {
        output.push_str(&format_entry(entry));
        output.push('\n');
    }
    CliResult::success(output)
}

fn format_entry(entry: &ProgressLogEntry) -> String {
    let duration = entry
        .processing_duration_ms
        .map(|ms| format!("{}ms", ms))
        .unwrap_or_else(|| "-".to_string());
    let age = Utc::now() - entry.started_at;

    let mut line = format!(
        "{:<15} {:<10} attempt {} {:>8}  ({} ago)",
        entry.wave.as_str(),
        entry.status.as_str(),
        entry.retry_count,
        duration,
        format_duration(age)
    );
    if let Some(error) = &entry.error_message {
        line.push_str(&format!("  error: {}", error));
    }
    line
}

/// Format a duration for human display.
fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}
