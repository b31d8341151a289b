use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session already exists: {session_id}")]
    SessionExists { session_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Langbase API errors
#[derive(Debug, Error)]
pub enum LangbaseError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised by a single analyzer attempt.
///
/// The display text is carried verbatim into `AnalysisResult::error_message`.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("{task} requires {dependency} output, which is not available")]
    MissingInput { task: String, dependency: String },

    #[error("Analysis failed: {message}")]
    Execution { message: String },

    #[error("Langbase error: {0}")]
    Langbase(#[from] LangbaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Pipeline-level errors surfaced to the caller of the orchestrator
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Wave 1 failed for session {session_id}: {}", failed.join(", "))]
    Wave1Failed {
        session_id: String,
        failed: Vec<String>,
    },

    #[error("Wave 2 failed for session {session_id}: {message}")]
    Wave2Failed { session_id: String, message: String },

    #[error("Wave 2 precondition failed for session {session_id}: missing {}", missing.join(", "))]
    PreconditionFailed {
        session_id: String,
        missing: Vec<String>,
    },

    #[error("Session {session_id} is in failed state; re-run with force")]
    AlreadyFailed { session_id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Langbase operations
pub type LangbaseResult<T> = Result<T, LangbaseError>;

/// Result type alias for analyzer attempts
pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

/// Result type alias for pipeline runs
pub type PipelineResult<T> = Result<T, PipelineError>;
