//! # Service Boundary
//!
//! The research loop only talks to the outside world through three narrow
//! traits. Each adapter in this module implements one or more of them:
//!
//! | trait                   | adapters                                   |
//! |-------------------------|--------------------------------------------|
//! | [`SearchService`]       | [`FirecrawlClient`], [`DuckDuckGoSearch`]  |
//! | [`ExtractionService`]   | [`FirecrawlClient`], [`WebPageExtractor`]  |
//! | [`TextCompletionService`] | [`OpenAiCompatibleClient`], [`OllamaCompletion`] |
//!
//! Payloads are typed on both sides of the boundary; vendor envelopes are
//! converted into `Result` inside the adapters.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use rig::completion::ToolDefinition;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::ServiceError;

pub mod duckduckgo;
pub mod firecrawl;
pub mod ollama;
pub mod openai;
pub mod web;

pub use duckduckgo::DuckDuckGoSearch;
pub use firecrawl::FirecrawlClient;
pub use ollama::OllamaCompletion;
pub use openai::{OpenAiCompatibleClient, ProviderPreset};
pub use web::WebPageExtractor;

// =============================================================================
// SEARCH
// =============================================================================

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub description: String,
}

#[async_trait]
pub trait SearchService: Send + Sync {
    /// Run a text query and return hits in rank order.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, ServiceError>;
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// Content extracted from a single URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub text: String,
    pub source: String,
}

impl Finding {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
        }
    }
}

#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Fetch a page and return its readable text.
    async fn extract(&self, url: &str) -> Result<Finding, ServiceError>;
}

// =============================================================================
// TEXT COMPLETION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A function call requested by the model, in the OpenAI wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ToolCallKind,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallKind {
    #[default]
    Function,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them.
    pub arguments: String,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ToolCallKind::Function,
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// An assistant turn that asked for tools to run.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// The output of one tool call, answered back to the model.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// A single completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Default completion budget for short calls.
    pub const DEFAULT_MAX_TOKENS: u32 = 1024;

    /// Build a request from a prompt and an optional system message.
    pub fn prompt(prompt: impl Into<String>, system: Option<&str>) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));
        Self {
            messages,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// All system messages joined, for providers that take a separate preamble.
    pub fn system_preamble(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// Content of the most recent user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rfind(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Incremental text chunks of a streaming completion.
pub struct CompletionStream {
    inner: Pin<Box<dyn Stream<Item = Result<String, ServiceError>> + Send>>,
}

impl CompletionStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<String, ServiceError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Wrap an already complete reply as a one-chunk stream.
    pub fn from_complete(text: String) -> Self {
        Self::new(futures::stream::once(async move { Ok(text) }))
    }

    pub fn into_inner(self) -> Pin<Box<dyn Stream<Item = Result<String, ServiceError>> + Send>> {
        self.inner
    }
}

/// One piece of a model turn that may call tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnChunk {
    Text(String),
    /// Every call of the turn, sent once the turn is complete.
    ToolCalls(Vec<ToolCall>),
}

/// Streaming model turn with function calling.
pub struct TurnStream {
    inner: Pin<Box<dyn Stream<Item = Result<TurnChunk, ServiceError>> + Send>>,
}

impl TurnStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<TurnChunk, ServiceError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    pub fn into_inner(self) -> Pin<Box<dyn Stream<Item = Result<TurnChunk, ServiceError>> + Send>> {
        self.inner
    }
}

impl From<CompletionStream> for TurnStream {
    fn from(stream: CompletionStream) -> Self {
        Self::new(stream.into_inner().map(|chunk| chunk.map(TurnChunk::Text)))
    }
}

#[async_trait]
pub trait TextCompletionService: Send + Sync {
    /// Non-streaming completion; returns the full reply text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError>;

    /// Streaming completion.
    ///
    /// Falls back to [`complete`](Self::complete) as a single chunk for
    /// providers without native streaming.
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, ServiceError> {
        let text = self.complete(request).await?;
        Ok(CompletionStream::from_complete(text))
    }

    /// Streaming completion that may answer with tool calls.
    ///
    /// Providers without function calling ignore `tools` and stream plain
    /// text, so the turn never asks for a tool.
    async fn stream_turn(
        &self,
        request: &CompletionRequest,
        tools: &[ToolDefinition],
    ) -> Result<TurnStream, ServiceError> {
        let _ = tools;
        Ok(self.stream(request).await?.into())
    }

    /// Provider name for logging.
    fn name(&self) -> &str;
}
