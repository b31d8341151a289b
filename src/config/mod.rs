use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::pipeline::RetryPolicy;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub pipeline: PipelineConfig,
    pub request: RequestConfig,
    /// Present only when `LANGBASE_API_KEY` is set.
    pub langbase: Option<LangbaseConfig>,
    pub pipes: AnalyzerPipeConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Retry, backoff and timeout settings for analyzer attempts
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub backoff_unit_ms: u64,
    pub timeout_secs: u64,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
}

/// Langbase pipe name per analyzer
#[derive(Debug, Clone)]
pub struct AnalyzerPipeConfig {
    pub mood: String,
    pub topics: String,
    pub breakthrough: String,
    pub action_summary: String,
    pub deep: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = env::var("LANGBASE_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|api_key| LangbaseConfig {
                api_key,
                base_url: env::var("LANGBASE_BASE_URL")
                    .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
            });

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/analysis.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let pipeline = PipelineConfig {
            max_retries: parse_env("PIPELINE_MAX_RETRIES", 3),
            backoff_multiplier: parse_env("PIPELINE_BACKOFF_MULTIPLIER", 2.0),
            backoff_unit_ms: parse_env("PIPELINE_BACKOFF_UNIT_MS", 1000),
            timeout_secs: parse_env("PIPELINE_TIMEOUT_SECS", 300),
        };
        pipeline.validate()?;

        let request = RequestConfig {
            timeout_ms: parse_env("REQUEST_TIMEOUT_MS", 60000),
        };

        let pipes = AnalyzerPipeConfig {
            mood: env::var("PIPE_MOOD").unwrap_or_else(|_| "session-mood-v1".to_string()),
            topics: env::var("PIPE_TOPICS").unwrap_or_else(|_| "session-topics-v1".to_string()),
            breakthrough: env::var("PIPE_BREAKTHROUGH")
                .unwrap_or_else(|_| "session-breakthrough-v1".to_string()),
            action_summary: env::var("PIPE_ACTION_SUMMARY")
                .unwrap_or_else(|_| "session-action-summary-v1".to_string()),
            deep: env::var("PIPE_DEEP").unwrap_or_else(|_| "session-deep-synthesis-v1".to_string()),
        };

        Ok(Config {
            database,
            logging,
            pipeline,
            request,
            langbase,
            pipes,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Reject settings the retry runner cannot honor.
    pub fn validate(&self) -> AppResult<()> {
        if self.max_retries == 0 {
            return Err(AppError::Config {
                message: "PIPELINE_MAX_RETRIES must be at least 1".to_string(),
            });
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(AppError::Config {
                message: "PIPELINE_BACKOFF_MULTIPLIER must be >= 1".to_string(),
            });
        }
        Ok(())
    }

    /// Build the retry policy handed to the orchestrator.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_multiplier: self.backoff_multiplier,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_multiplier: 2.0,
            backoff_unit_ms: 1000,
            timeout_secs: 300,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 60000 }
    }
}
