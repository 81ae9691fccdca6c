//! # HTTP Server
//!
//! Exposes research runs and chat replies as Server-Sent Event streams.
//!
//! | route               | method | body                                   |
//! |---------------------|--------|----------------------------------------|
//! | `/api/health`       | GET    |                                        |
//! | `/api/research`     | POST   | `{ topic, maxDepth?, timeBudgetSecs? }` |
//! | `/api/chat`         | POST   | `{ messages, experimental_deepResearch? }` |
//! | `/api/summarize`    | POST   | `{ url }`                              |
//!
//! Every progress event is sent as one `data: {json}` frame. A research
//! stream then sends a `result` event with the outcome, and both streams end
//! with `data: [DONE]`. Chat replies may call the `search`, `extract` and
//! `scrape` tools, plus `deepResearch` when the request opts in; a deep
//! research run streams its progress into the chat.
//!
//! A body that is not valid JSON for the route is answered with
//! `400 {"error": ...}`, like any other bad request.
//!
//! Each request runs in its own task. When the client goes away the response
//! stream is dropped, which cancels the run.

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::chat::ChatBridge;
use crate::config::Config;
use crate::error::SummarizeError;
use crate::research::{ChannelSink, ProgressEvent, ProgressSink, ResearchOrchestrator};
use crate::services::ChatMessage;
use crate::summarize::{Summarizer, Summary, SUGGESTED_URL};
use crate::tools::{ChatTools, DeepResearchTool};

/// Terminal frame of every stream.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ResearchOrchestrator,
    pub chat: ChatBridge,
    pub tools: ChatTools,
    pub summarizer: Summarizer,
}

impl AppState {
    /// Chat tools and summaries reuse the orchestrator's services.
    pub fn new(orchestrator: ResearchOrchestrator, chat: ChatBridge) -> Self {
        let tools = ChatTools::new(orchestrator.search_service(), orchestrator.extraction_service());
        let summarizer = Summarizer::new(
            vec![orchestrator.extraction_service()],
            orchestrator.completion_service(),
        );
        Self {
            orchestrator,
            chat,
            tools,
            summarizer,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.orchestrator()?, config.chat_bridge()?).with_summarizer(config.summarizer()?))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchRequest {
    pub topic: String,
    #[serde(default)]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub time_budget_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Offer the `deepResearch` tool for this reply.
    #[serde(default, rename = "experimental_deepResearch", alias = "experimentalDeepResearch")]
    pub experimental_deep_research: bool,
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
struct SummarizeResponse {
    success: bool,
    #[serde(flatten)]
    summary: Summary,
}

type ErrorResponse = (StatusCode, Json<Value>);

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/research", post(research))
        .route("/api/chat", post(chat))
        .route("/api/summarize", post(summarize))
        .with_state(state)
        .layer(cors)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: &Config) -> Result<()> {
    let state = AppState::from_config(config)?;
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    info!(address = %address, provider = %config.provider, "Server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn research(
    State(state): State<AppState>,
    payload: Result<Json<ResearchRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ErrorResponse> {
    let Json(payload) = payload.map_err(invalid_body)?;
    let topic = payload.topic.trim().to_string();
    if topic.is_empty() {
        return Err(bad_request("Missing required field: topic"));
    }

    let mut options = state.orchestrator.options().clone();
    if let Some(max_depth) = payload.max_depth {
        if max_depth == 0 {
            return Err(bad_request("maxDepth must be at least 1"));
        }
        options.max_depth = max_depth;
    }
    if let Some(secs) = payload.time_budget_secs {
        if secs == 0 {
            return Err(bad_request("timeBudgetSecs must be greater than 0"));
        }
        options.time_budget = Duration::from_secs(secs);
    }

    info!(topic = %topic, max_depth = options.max_depth, "Research request");

    let orchestrator = state.orchestrator.with_options(options);
    let (sink, mut rx) = ChannelSink::channel();
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let run = tokio::spawn(async move {
        orchestrator
            .run_with_cancellation(&topic, &sink, &cancel)
            .await
    });

    let stream = async_stream::stream! {
        let _guard = guard;

        while let Some(event) = rx.recv().await {
            if let Some(frame) = event_frame(&event) {
                yield Ok(frame);
            }
        }

        match run.await {
            Ok(outcome) => match Event::default().event("result").json_data(&outcome) {
                Ok(frame) => {
                    yield Ok(frame);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to encode research result");
                }
            },
            Err(e) => {
                error!(error = %e, "Research task panicked");
            }
        }

        yield Ok(Event::default().data(DONE_MARKER));
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ErrorResponse> {
    let Json(payload) = payload.map_err(invalid_body)?;
    if payload.messages.is_empty() {
        return Err(bad_request("Missing required field: messages"));
    }

    info!(
        messages = payload.messages.len(),
        deep_research = payload.experimental_deep_research,
        "Chat request"
    );

    let bridge = state.chat;
    let messages = payload.messages;
    let (sink, mut rx) = ChannelSink::channel();
    let sink = Arc::new(sink);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let mut tools = state.tools;
    if payload.experimental_deep_research {
        let research_sink: Arc<dyn ProgressSink> = sink.clone();
        tools = tools.with_deep_research(DeepResearchTool::new(
            state.orchestrator,
            research_sink,
            cancel.clone(),
        ));
    }

    tokio::spawn(async move {
        let reply = bridge.stream_reply_with_tools(&messages, &tools, sink.as_ref(), |transcript| {
            debug!(messages = transcript.len(), "Chat transcript complete");
        });
        tokio::select! {
            _ = cancel.cancelled() => debug!("Chat client disconnected"),
            // Failures were already reported on the stream
            _ = reply => {}
        }
    });

    let stream = async_stream::stream! {
        let _guard = guard;

        while let Some(event) = rx.recv().await {
            if let Some(frame) = event_frame(&event) {
                yield Ok(frame);
            }
        }

        yield Ok(Event::default().data(DONE_MARKER));
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn summarize(
    State(state): State<AppState>,
    payload: Result<Json<SummarizeRequest>, JsonRejection>,
) -> Result<Json<SummarizeResponse>, ErrorResponse> {
    let Json(payload) = payload.map_err(invalid_body)?;
    let url = payload.url.unwrap_or_default();

    info!(url = %url, "Summarize request");

    match state.summarizer.summarize(&url).await {
        Ok(summary) => Ok(Json(SummarizeResponse {
            success: true,
            summary,
        })),
        Err(e @ SummarizeError::MissingUrl) => Err(bad_request(&e.to_string())),
        Err(e @ SummarizeError::Extraction { .. }) => {
            warn!(error = %e, "Summarize scrape failed");
            Err((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": e.to_string(),
                    "suggestion": format!(
                        "Try a different URL or check that the content is publicly accessible, e.g. {SUGGESTED_URL}"
                    ),
                })),
            ))
        }
        Err(e) => {
            error!(error = %e, "Summarize failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": e.to_string(),
                    "suggestion": "Please check the URL and try again.",
                })),
            ))
        }
    }
}

fn event_frame(event: &ProgressEvent) -> Option<Event> {
    match Event::default().json_data(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(event = event.name(), error = %e, "Failed to encode event");
            None
        }
    }
}

fn bad_request(message: &str) -> ErrorResponse {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

/// Missing, malformed or mistyped JSON body.
fn invalid_body(rejection: JsonRejection) -> ErrorResponse {
    debug!(status = %rejection.status(), "Rejected request body");
    bad_request(&rejection.body_text())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_research_request_accepts_camel_case() {
        let request: ResearchRequest =
            serde_json::from_str(r#"{"topic": "rust", "maxDepth": 2, "timeBudgetSecs": 30}"#).unwrap();
        assert_eq!(request.topic, "rust");
        assert_eq!(request.max_depth, Some(2));
        assert_eq!(request.time_budget_secs, Some(30));

        let request: ResearchRequest = serde_json::from_str(r#"{"topic": "rust"}"#).unwrap();
        assert_eq!(request.max_depth, None);
    }

    #[test]
    fn test_chat_request_roles() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"messages": [{"role": "user", "content": "hi"}]}"#).unwrap();
        assert_eq!(request.messages, vec![ChatMessage::user("hi")]);
        assert!(!request.experimental_deep_research);

        let request: ChatRequest = serde_json::from_str(
            r#"{"messages": [{"role": "user", "content": "hi"}], "experimental_deepResearch": true}"#,
        )
        .unwrap();
        assert!(request.experimental_deep_research);
    }
}
