//! Integration tests for the Langbase client and pipe-backed analyzers
//!
//! HTTP behavior is mocked with wiremock.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use session_analysis_pipeline::analyzers::{Analyzer, PipeAnalyzer};
use session_analysis_pipeline::config::{AnalyzerPipeConfig, LangbaseConfig, RequestConfig};
use session_analysis_pipeline::error::{AnalyzerError, LangbaseError};
use session_analysis_pipeline::langbase::{LangbaseClient, Message, PipeRequest};
use session_analysis_pipeline::pipeline::{RetryPolicy, WaveOrchestrator};
use session_analysis_pipeline::storage::{
    AnalysisStatus, AnalysisTask, ProgressLog, Session, SessionStore, SqliteStorage,
};

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str) -> LangbaseClient {
    let config = LangbaseConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
    };

    LangbaseClient::new(&config, RequestConfig { timeout_ms: 5000 })
        .expect("Failed to create client")
}

async fn create_test_storage() -> Arc<SqliteStorage> {
    let storage = Arc::new(
        SqliteStorage::new_in_memory()
            .await
            .expect("Failed to create in-memory storage"),
    );
    storage
        .create_session(
            &Session::with_id("S1").with_transcript(json!({"text": "I finally shipped it"})),
        )
        .await
        .expect("Failed to create session");
    storage
}

fn completion(body: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "completion": body.to_string(),
        "raw": {
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150}
        }
    }))
}

mod client_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_pipe_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(header("Content-Type", "application/json"))
            .and(body_partial_json(json!({
                "name": "session-mood-v1",
                "stream": false,
                "variables": {"session_id": "S1"}
            })))
            .respond_with(completion(json!({"mood": "calm"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let request = PipeRequest::new("session-mood-v1", vec![Message::user("hello")])
            .with_variable("session_id", "S1");

        let response = client.call_pipe(&request).await.unwrap();
        assert!(response.success);
        assert_eq!(response.completion_json(), json!({"mood": "calm"}));
        let usage = response.raw.and_then(|r| r.usage).unwrap();
        assert_eq!(usage.total_tokens, Some(150));
    }

    #[tokio::test]
    async fn test_api_error_is_surfaced() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let err = client
            .call_pipe(&PipeRequest::new("p", vec![Message::user("x")]))
            .await
            .unwrap_err();

        match err {
            LangbaseError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri());
        let err = client
            .call_pipe(&PipeRequest::new("p", vec![Message::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LangbaseError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(
                completion(json!({})).set_delay(std::time::Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let config = LangbaseConfig {
            api_key: "test-api-key".to_string(),
            base_url: mock_server.uri(),
        };
        let client = LangbaseClient::new(&config, RequestConfig { timeout_ms: 50 }).unwrap();

        let err = client
            .call_pipe(&PipeRequest::new("p", vec![Message::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LangbaseError::Timeout { timeout_ms: 50 }));
    }
}

mod analyzer_tests {
    use super::*;

    #[tokio::test]
    async fn test_pipe_analyzer_stores_output() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({"name": "session-mood-v1"})))
            .and(body_string_contains("I finally shipped it"))
            .respond_with(completion(json!({"mood": "proud", "score": 0.9})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let storage = create_test_storage().await;
        let analyzer = PipeAnalyzer::new(
            AnalysisTask::Mood,
            "session-mood-v1",
            create_test_client(&mock_server.uri()),
            storage.clone(),
        );

        analyzer.analyze("S1", false).await.unwrap();

        let session = storage.get_session("S1").await.unwrap().unwrap();
        assert_eq!(
            session.mood_output,
            Some(json!({"mood": "proud", "score": 0.9}))
        );
        assert!(session.mood_analyzed_at.is_some());
    }

    #[tokio::test]
    async fn test_pipe_analyzer_skips_completed_task() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(completion(json!({"mood": "new"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let storage = create_test_storage().await;
        let original_at = Utc::now();
        storage
            .record_task_output("S1", AnalysisTask::Mood, &json!({"mood": "old"}), original_at)
            .await
            .unwrap();

        let analyzer = PipeAnalyzer::new(
            AnalysisTask::Mood,
            "session-mood-v1",
            create_test_client(&mock_server.uri()),
            storage.clone(),
        );

        analyzer.analyze("S1", false).await.unwrap();
        let session = storage.get_session("S1").await.unwrap().unwrap();
        assert_eq!(session.mood_output, Some(json!({"mood": "old"})));
        assert_eq!(session.mood_analyzed_at, Some(original_at));

        analyzer.analyze("S1", true).await.unwrap();
        let session = storage.get_session("S1").await.unwrap().unwrap();
        assert_eq!(session.mood_output, Some(json!({"mood": "new"})));
    }

    #[tokio::test]
    async fn test_action_summary_requires_topics() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(completion(json!({})))
            .expect(0)
            .mount(&mock_server)
            .await;

        let storage = create_test_storage().await;
        let analyzer = PipeAnalyzer::new(
            AnalysisTask::ActionSummary,
            "session-action-summary-v1",
            create_test_client(&mock_server.uri()),
            storage.clone(),
        );

        let err = analyzer.analyze("S1", false).await.unwrap_err();
        match err {
            AnalyzerError::MissingInput { task, dependency } => {
                assert_eq!(task, "action_summary");
                assert_eq!(dependency, "topics");
            }
            other => panic!("expected MissingInput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reported_failure_leaves_task_incomplete() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "completion": ""
            })))
            .mount(&mock_server)
            .await;

        let storage = create_test_storage().await;
        let analyzer = PipeAnalyzer::new(
            AnalysisTask::Topics,
            "session-topics-v1",
            create_test_client(&mock_server.uri()),
            storage.clone(),
        );

        let err = analyzer.analyze("S1", false).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::Execution { .. }));

        let session = storage.get_session("S1").await.unwrap().unwrap();
        assert!(session.topics_extracted_at.is_none());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let mock_server = MockServer::start().await;
        let storage = create_test_storage().await;
        let analyzer = PipeAnalyzer::new(
            AnalysisTask::Mood,
            "session-mood-v1",
            create_test_client(&mock_server.uri()),
            storage,
        );

        let err = analyzer.analyze("missing", false).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::SessionNotFound { .. }));
    }
}

mod pipeline_tests {
    use super::*;

    fn pipes() -> AnalyzerPipeConfig {
        AnalyzerPipeConfig {
            mood: "session-mood-v1".to_string(),
            topics: "session-topics-v1".to_string(),
            breakthrough: "session-breakthrough-v1".to_string(),
            action_summary: "session-action-summary-v1".to_string(),
            deep: "session-deep-synthesis-v1".to_string(),
        }
    }

    async fn mount_pipe(server: &MockServer, name: &str, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({ "name": name })))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_multiplier: 2.0,
            backoff_unit: std::time::Duration::from_millis(1),
            timeout: std::time::Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_full_pipeline_over_http() {
        let mock_server = MockServer::start().await;
        mount_pipe(&mock_server, "session-mood-v1", completion(json!({"mood": "hopeful"}))).await;
        mount_pipe(&mock_server, "session-topics-v1", completion(json!({"topics": ["work"]}))).await;
        mount_pipe(
            &mock_server,
            "session-breakthrough-v1",
            completion(json!({"breakthrough": true})),
        )
        .await;
        mount_pipe(
            &mock_server,
            "session-action-summary-v1",
            completion(json!({"actions": ["rest"]})),
        )
        .await;
        mount_pipe(
            &mock_server,
            "session-deep-synthesis-v1",
            completion(json!({"synthesis": "growth"})),
        )
        .await;

        let storage = create_test_storage().await;
        let analyzers = PipeAnalyzer::set_from_config(
            &pipes(),
            create_test_client(&mock_server.uri()),
            storage.clone(),
        );
        let orchestrator = WaveOrchestrator::new(storage.clone(), storage.clone(), analyzers, policy());

        let status = orchestrator
            .process_session_full_pipeline("S1", false)
            .await
            .unwrap();

        assert_eq!(status.analysis_status, AnalysisStatus::Complete);
        let session = storage.get_session("S1").await.unwrap().unwrap();
        assert_eq!(session.topics_output, Some(json!({"topics": ["work"]})));
        assert_eq!(session.action_summary_output, Some(json!({"actions": ["rest"]})));
        assert_eq!(session.deep_output, Some(json!({"synthesis": "growth"})));
        assert_eq!(storage.get_progress("S1").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_provider_outage_fails_wave1() {
        let mock_server = MockServer::start().await;
        mount_pipe(&mock_server, "session-mood-v1", completion(json!({"mood": "ok"}))).await;
        mount_pipe(&mock_server, "session-topics-v1", ResponseTemplate::new(503)).await;
        mount_pipe(
            &mock_server,
            "session-breakthrough-v1",
            completion(json!({"breakthrough": false})),
        )
        .await;

        let storage = create_test_storage().await;
        let analyzers = PipeAnalyzer::set_from_config(
            &pipes(),
            create_test_client(&mock_server.uri()),
            storage.clone(),
        );
        let orchestrator = WaveOrchestrator::new(storage.clone(), storage.clone(), analyzers, policy());

        let err = orchestrator
            .process_session_full_pipeline("S1", false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("topics"));

        let session = storage.get_session("S1").await.unwrap().unwrap();
        assert_eq!(session.analysis_status, AnalysisStatus::Failed);
        assert!(session.mood_analyzed_at.is_some());
        assert!(session.deep_analyzed_at.is_none());

        let progress = storage.get_progress("S1").await.unwrap();
        let topics_attempts = progress
            .iter()
            .filter(|e| e.wave == AnalysisTask::Topics)
            .count();
        assert_eq!(topics_attempts, 2);
    }
}
