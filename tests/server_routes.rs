//! HTTP routes served against in-memory services.

mod common;

use serde_json::{json, Value};
use std::net::SocketAddr;

use common::*;
use deep_research_agent::research::ResearchOptions;
use deep_research_agent::server::{router, AppState};
use deep_research_agent::services::ExtractionService;
use deep_research_agent::{ChatBridge, Summarizer};
use std::sync::Arc;

async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

fn state(analyses: Vec<String>) -> AppState {
    let completion = MockCompletion::new(analyses).arc();
    let orchestrator = orchestrator(
        MockSearch::returning(default_hits()),
        MockExtractor::new(),
        completion.clone(),
        ResearchOptions::default(),
    );
    AppState::new(orchestrator, ChatBridge::new(completion))
}

/// Payloads of every `data:` line, in order.
fn data_frames(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_health() {
    let addr = spawn_server(state(Vec::new())).await;
    let body: Value = reqwest::get(format!("http://{addr}/api/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_research_streams_events_then_result_then_done() {
    let addr = spawn_server(state(vec![analysis_json("done", &[], false)])).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/research"))
        .json(&json!({"topic": "statin side effects", "maxDepth": 2}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body = response.text().await.unwrap();

    let frames = data_frames(&body);
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));

    let first: Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(first, json!({"type": "progress-init", "content": {"maxDepth": 2, "totalSteps": 10}}));

    let finish: Value = serde_json::from_str(&frames[frames.len() - 3]).unwrap();
    assert_eq!(finish, json!({"type": "finish", "content": "final report"}));

    assert!(body.contains("event: result"));
    let result: Value = serde_json::from_str(&frames[frames.len() - 2]).unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["data"]["analysis"], "final report");
    assert_eq!(result["data"]["findings"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_research_rejects_empty_topic() {
    let addr = spawn_server(state(Vec::new())).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/research"))
        .json(&json!({"topic": "   "}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("topic"));
}

#[tokio::test]
async fn test_chat_streams_reply() {
    let addr = spawn_server(state(vec!["Hello there".to_string()])).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/chat"))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    let body = response.text().await.unwrap();
    let frames = data_frames(&body);

    assert_eq!(frames.len(), 3);
    let assistant: Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(assistant["type"], "assistant-message");
    assert_eq!(assistant["content"]["role"], "assistant");
    let text: Value = serde_json::from_str(&frames[1]).unwrap();
    assert_eq!(text, json!({"type": "text", "content": "Hello there"}));
    assert_eq!(frames[2], "[DONE]");
}

#[tokio::test]
async fn test_chat_failure_emits_error_event() {
    // Empty analysis queue: the mock completion answers with an error
    let addr = spawn_server(state(Vec::new())).await;

    let body = reqwest::Client::new()
        .post(format!("http://{addr}/api/chat"))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let frames = data_frames(&body);

    let error: Value = serde_json::from_str(&frames[1]).unwrap();
    assert_eq!(error["type"], "error");
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
}

#[tokio::test]
async fn test_chat_rejects_empty_messages() {
    let addr = spawn_server(state(Vec::new())).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/chat"))
        .json(&json!({"messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json_is_a_json_400() {
    let addr = spawn_server(state(Vec::new())).await;
    let client = reqwest::Client::new();

    for route in ["research", "chat", "summarize"] {
        let response = client
            .post(format!("http://{addr}/api/{route}"))
            .header("content-type", "application/json")
            .body("{\"topic\": ")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST, "{route}");
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].is_string(), "{route}: {body}");
    }
}

#[tokio::test]
async fn test_missing_body_or_field_is_a_json_400() {
    let addr = spawn_server(state(Vec::new())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/research"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    let response = client
        .post(format!("http://{addr}/api/chat"))
        .json(&json!({"messages": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_chat_offers_deep_research_only_when_asked() {
    let caller = ToolCaller::new("deepResearch", json!({"topic": "statins"}));
    let research_completion = MockCompletion::new(vec![analysis_json("done", &[], false)]).arc();
    let orchestrator = orchestrator(
        MockSearch::returning(default_hits()),
        MockExtractor::new(),
        research_completion,
        ResearchOptions::default(),
    );
    let addr = spawn_server(AppState::new(orchestrator, ChatBridge::new(caller.clone()))).await;
    let client = reqwest::Client::new();

    let body = client
        .post(format!("http://{addr}/api/chat"))
        .json(&json!({"messages": [{"role": "user", "content": "research statins"}]}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(!body.contains("progress-init"));
    assert_eq!(caller.offered()[0], vec!["search", "extract", "scrape"]);

    let body = client
        .post(format!("http://{addr}/api/chat"))
        .json(&json!({
            "messages": [{"role": "user", "content": "research statins"}],
            "experimental_deepResearch": true
        }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let frames = data_frames(&body);
    let types: Vec<String> = frames
        .iter()
        .filter_map(|f| serde_json::from_str::<Value>(f).ok())
        .map(|v| v["type"].as_str().unwrap_or_default().to_string())
        .collect();

    assert_eq!(types.first().map(String::as_str), Some("assistant-message"));
    let position = |name: &str| types.iter().position(|t| t == name).unwrap();
    assert!(position("tool-call") < position("progress-init"));
    assert!(position("finish") < position("tool-result"));
    assert_eq!(types.last().map(String::as_str), Some("text"));
    assert_eq!(frames.last().map(String::as_str), Some("[DONE]"));
    assert!(caller.offered()[1].contains(&"deepResearch".to_string()));
}

#[tokio::test]
async fn test_summarize_falls_back_to_second_extractor() {
    let long_page = format!("{} ", "Trial results for a new statin.".repeat(8));
    let completion = MockCompletion::new(vec!["A short summary.".to_string()]).arc();
    let primary: Arc<dyn ExtractionService> = MockExtractor::failing_on(&["https://news.org/a"]);
    let fallback: Arc<dyn ExtractionService> = Arc::new(FixedText(long_page.clone()));
    let summarizer = Summarizer::new(vec![primary, fallback], completion);

    let addr = spawn_server(state(Vec::new()).with_summarizer(summarizer)).await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/summarize"))
        .json(&json!({"url": "news.org/a"}))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["summary"], "A short summary.");
    assert_eq!(body["originalContent"], long_page.as_str());
    assert_eq!(body["source"], "https://news.org/a");
}

#[tokio::test]
async fn test_summarize_errors() {
    let summarizer = Summarizer::new(
        vec![MockExtractor::failing_on(&["https://news.org/a"]) as Arc<dyn ExtractionService>],
        MockCompletion::new(Vec::new()).arc(),
    );
    let addr = spawn_server(state(Vec::new()).with_summarizer(summarizer)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/api/summarize"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "URL is required");

    let response = client
        .post(format!("http://{addr}/api/summarize"))
        .json(&json!({"url": "https://news.org/a"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("news.org/a"));
    assert!(body["suggestion"].is_string());
}

/// Returns the same text for every URL.
struct FixedText(String);

#[async_trait::async_trait]
impl ExtractionService for FixedText {
    async fn extract(
        &self,
        url: &str,
    ) -> Result<deep_research_agent::services::Finding, deep_research_agent::ServiceError> {
        Ok(deep_research_agent::services::Finding::new(self.0.as_str(), url))
    }
}
