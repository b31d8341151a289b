use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{info, warn};

use super::{
    AnalysisStatus, AnalysisTask, ProgressLog, ProgressLogEntry, ProgressStatus, Session,
    SessionStore,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory instance (tests and dry runs).
    ///
    /// A single connection keeps every query on the same in-memory database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Transition the latest `started` row of `(session_id, wave)`.
    async fn resolve_started(
        &self,
        session_id: &str,
        wave: AnalysisTask,
        status: ProgressStatus,
        retry_count: u32,
        duration_ms: i64,
        error: Option<&str>,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_progress
            SET status = ?, completed_at = ?, error_message = ?, retry_count = ?,
                processing_duration_ms = ?
            WHERE id = (
                SELECT id FROM analysis_progress
                WHERE session_id = ? AND wave = ? AND status = 'started'
                ORDER BY id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(error)
        .bind(retry_count as i64)
        .bind(duration_ms)
        .bind(session_id)
        .bind(wave.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Query {
                message: format!(
                    "No started progress entry for session {} wave {}",
                    session_id, wave
                ),
            });
        }

        Ok(())
    }
}

/// Column pair (output, completion timestamp) owned by each task.
fn task_columns(task: AnalysisTask) -> (&'static str, &'static str) {
    match task {
        AnalysisTask::Mood => ("mood_output", "mood_analyzed_at"),
        AnalysisTask::Topics => ("topics_output", "topics_extracted_at"),
        AnalysisTask::Breakthrough => ("breakthrough_output", "breakthrough_analyzed_at"),
        AnalysisTask::ActionSummary => ("action_summary_output", "action_items_summarized_at"),
        AnalysisTask::Deep => ("deep_output", "deep_analyzed_at"),
    }
}

fn not_found_if_untouched(rows_affected: u64, id: &str) -> StorageResult<()> {
    if rows_affected == 0 {
        return Err(StorageError::SessionNotFound {
            session_id: id.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl SessionStore for SqliteStorage {
    async fn create_session(&self, session: &Session) -> StorageResult<()> {
        let transcript = session
            .transcript
            .as_ref()
            .map(|t| serde_json::to_string(t).unwrap_or_default());

        let result = sqlx::query(
            r#"
            INSERT INTO sessions (id, transcript, analysis_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&transcript)
        .bind(session.analysis_status.as_str())
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::SessionExists {
                    session_id: session.id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, transcript, analysis_status,
                   mood_output, mood_analyzed_at,
                   topics_output, topics_extracted_at,
                   breakthrough_output, breakthrough_analyzed_at,
                   action_summary_output, action_items_summarized_at,
                   deep_output, deep_analyzed_at,
                   wave1_completed_at, created_at, updated_at
            FROM sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn update_analysis_status(&self, id: &str, status: AnalysisStatus) -> StorageResult<()> {
        let result =
            sqlx::query("UPDATE sessions SET analysis_status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await?;

        not_found_if_untouched(result.rows_affected(), id)
    }

    async fn record_task_output(
        &self,
        id: &str,
        task: AnalysisTask,
        output: &serde_json::Value,
        completed_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let (output_column, timestamp_column) = task_columns(task);
        let output = serde_json::to_string(output).map_err(|e| StorageError::Query {
            message: format!("Failed to serialize {} output: {}", task, e),
        })?;

        let sql = format!(
            "UPDATE sessions SET {} = ?, {} = ?, updated_at = ? WHERE id = ?",
            output_column, timestamp_column
        );
        let result = sqlx::query(&sql)
            .bind(&output)
            .bind(completed_at.to_rfc3339())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        not_found_if_untouched(result.rows_affected(), id)
    }

    async fn mark_wave1_complete(&self, id: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let result =
            sqlx::query("UPDATE sessions SET wave1_completed_at = ?, updated_at = ? WHERE id = ?")
                .bind(at.to_rfc3339())
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(&self.pool)
                .await?;

        not_found_if_untouched(result.rows_affected(), id)
    }

    async fn mark_deep_analyzed(&self, id: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET deep_analyzed_at = COALESCE(deep_analyzed_at, ?), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        not_found_if_untouched(result.rows_affected(), id)
    }
}

#[async_trait]
impl ProgressLog for SqliteStorage {
    async fn log_started(
        &self,
        session_id: &str,
        wave: AnalysisTask,
        retry_count: u32,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_progress (session_id, wave, status, started_at, retry_count)
            VALUES (?, ?, 'started', ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(wave.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(retry_count as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn log_completed(
        &self,
        session_id: &str,
        wave: AnalysisTask,
        retry_count: u32,
        duration_ms: i64,
    ) -> StorageResult<()> {
        self.resolve_started(
            session_id,
            wave,
            ProgressStatus::Completed,
            retry_count,
            duration_ms,
            None,
        )
        .await
    }

    async fn log_failed(
        &self,
        session_id: &str,
        wave: AnalysisTask,
        retry_count: u32,
        duration_ms: i64,
        error: &str,
    ) -> StorageResult<()> {
        self.resolve_started(
            session_id,
            wave,
            ProgressStatus::Failed,
            retry_count,
            duration_ms,
            Some(error),
        )
        .await
    }

    async fn get_progress(&self, session_id: &str) -> StorageResult<Vec<ProgressLogEntry>> {
        let rows: Vec<ProgressRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, wave, status, started_at, completed_at, error_message,
                   retry_count, processing_duration_ms
            FROM analysis_progress
            WHERE session_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProgressLogEntry::try_from).collect()
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    transcript: Option<String>,
    analysis_status: String,
    mood_output: Option<String>,
    mood_analyzed_at: Option<String>,
    topics_output: Option<String>,
    topics_extracted_at: Option<String>,
    breakthrough_output: Option<String>,
    breakthrough_analyzed_at: Option<String>,
    action_summary_output: Option<String>,
    action_items_summarized_at: Option<String>,
    deep_output: Option<String>,
    deep_analyzed_at: Option<String>,
    wave1_completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

fn parse_timestamp(owner: &str, column: &str, value: Option<String>) -> Option<DateTime<Utc>> {
    let raw = value?;
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            warn!(
                owner,
                column,
                value = %raw,
                error = %e,
                "Unreadable stored timestamp, treating as unset"
            );
            None
        }
    }
}

fn parse_json(owner: &str, column: &str, value: Option<String>) -> Option<serde_json::Value> {
    let raw = value?;
    match serde_json::from_str(&raw) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(owner, column, error = %e, "Unreadable stored JSON, treating as unset");
            None
        }
    }
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        let id = row.id;
        let analysis_status = row.analysis_status.parse().unwrap_or_else(|e| {
            warn!(session_id = %id, error = %e, "Unreadable analysis status, treating as pending");
            AnalysisStatus::Pending
        });
        let json = |column: &str, value: Option<String>| parse_json(&id, column, value);
        let timestamp = |column: &str, value: Option<String>| parse_timestamp(&id, column, value);

        Self {
            analysis_status,
            transcript: json("transcript", row.transcript),
            mood_output: json("mood_output", row.mood_output),
            mood_analyzed_at: timestamp("mood_analyzed_at", row.mood_analyzed_at),
            topics_output: json("topics_output", row.topics_output),
            topics_extracted_at: timestamp("topics_extracted_at", row.topics_extracted_at),
            breakthrough_output: json("breakthrough_output", row.breakthrough_output),
            breakthrough_analyzed_at: timestamp(
                "breakthrough_analyzed_at",
                row.breakthrough_analyzed_at,
            ),
            action_summary_output: json("action_summary_output", row.action_summary_output),
            action_items_summarized_at: timestamp(
                "action_items_summarized_at",
                row.action_items_summarized_at,
            ),
            deep_output: json("deep_output", row.deep_output),
            deep_analyzed_at: timestamp("deep_analyzed_at", row.deep_analyzed_at),
            wave1_completed_at: timestamp("wave1_completed_at", row.wave1_completed_at),
            created_at: timestamp("created_at", Some(row.created_at)).unwrap_or_else(Utc::now),
            updated_at: timestamp("updated_at", Some(row.updated_at)).unwrap_or_else(Utc::now),
            id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    id: i64,
    session_id: String,
    wave: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    error_message: Option<String>,
    retry_count: i64,
    processing_duration_ms: Option<i64>,
}

impl TryFrom<ProgressRow> for ProgressLogEntry {
    type Error = StorageError;

    fn try_from(row: ProgressRow) -> Result<Self, Self::Error> {
        let wave = row
            .wave
            .parse()
            .map_err(|message| StorageError::Query { message })?;
        let status = row
            .status
            .parse()
            .map_err(|message| StorageError::Query { message })?;

        let started_at = parse_timestamp(&row.session_id, "started_at", Some(row.started_at))
            .unwrap_or_else(Utc::now);
        let completed_at = parse_timestamp(&row.session_id, "completed_at", row.completed_at);

        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            wave,
            status,
            started_at,
            completed_at,
            error_message: row.error_message,
            retry_count: u32::try_from(row.retry_count).unwrap_or_default(),
            processing_duration_ms: row.processing_duration_ms,
        })
    }
}
