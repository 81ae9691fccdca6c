//! OpenAI-compatible chat completions (Groq, OpenRouter, OpenAI).
//!
//! Non-streaming calls read `choices[0].message.content`; streaming calls
//! parse the `data: {...}` server-sent-event lines and yield every
//! non-empty `choices[0].delta.content` until `data: [DONE]`.
//!
//! The event stream is buffered as bytes and only complete lines are
//! decoded, since a multi-byte character can straddle two network reads.
//! Tool-call deltas are merged by index and handed out once the turn ends.

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use rig::completion::ToolDefinition;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    ChatMessage, CompletionRequest, CompletionStream, TextCompletionService, ToolCall, TurnChunk,
    TurnStream,
};
use crate::error::{status_error, ServiceError};

/// Completions can take a while for long syntheses.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Tool-call deltas with a higher index are dropped.
const MAX_TOOL_CALLS: usize = 16;

/// Known OpenAI-compatible providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPreset {
    Groq,
    OpenRouter,
    OpenAi,
}

impl ProviderPreset {
    pub fn base_url(&self) -> &'static str {
        match self {
            ProviderPreset::Groq => "https://api.groq.com/openai/v1",
            ProviderPreset::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderPreset::OpenAi => "https://api.openai.com/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderPreset::Groq => "llama-3.3-70b-versatile",
            ProviderPreset::OpenRouter => "meta-llama/llama-3.3-70b-instruct",
            ProviderPreset::OpenAi => "gpt-4o-mini",
        }
    }

    pub fn api_key_var(&self) -> &'static str {
        match self {
            ProviderPreset::Groq => "GROQ_API_KEY",
            ProviderPreset::OpenRouter => "OPENROUTER_API_KEY",
            ProviderPreset::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderPreset::Groq => "groq",
            ProviderPreset::OpenRouter => "openrouter",
            ProviderPreset::OpenAi => "openai",
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    max_completion_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool<'a>>,
}

/// `{"type": "function", "function": {name, description, parameters}}`
#[derive(Debug, Serialize)]
struct FunctionTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

/// A fragment of one tool call. The id and name arrive first, the
/// arguments in pieces after.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// One parsed SSE line.
#[derive(Debug, PartialEq)]
enum SseLine {
    Text(String),
    ToolCalls(Vec<ToolCallDelta>),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, ServiceError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    let chunk: ChunkResponse =
        serde_json::from_str(data).map_err(|e| ServiceError::Parse(e.to_string()))?;
    let Some(delta) = chunk.choices.into_iter().next().and_then(|c| c.delta) else {
        return Ok(SseLine::Skip);
    };
    if !delta.tool_calls.is_empty() {
        return Ok(SseLine::ToolCalls(delta.tool_calls));
    }
    match delta.content {
        Some(content) if !content.is_empty() => Ok(SseLine::Text(content)),
        _ => Ok(SseLine::Skip),
    }
}

/// Byte buffer that hands out complete lines.
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, piece: &[u8]) {
        self.bytes.extend_from_slice(piece);
    }

    /// The next `\n`-terminated line, if one is buffered.
    fn next_line(&mut self) -> Option<Result<String, ServiceError>> {
        let end = self.bytes.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=end).collect();
        Some(decode_line(line))
    }

    /// Whatever is left after the body ended without a final newline.
    fn take_rest(&mut self) -> Option<Result<String, ServiceError>> {
        if self.bytes.is_empty() {
            return None;
        }
        Some(decode_line(std::mem::take(&mut self.bytes)))
    }
}

fn decode_line(line: Vec<u8>) -> Result<String, ServiceError> {
    String::from_utf8(line).map_err(|e| ServiceError::Stream(format!("invalid UTF-8 in event stream: {e}")))
}

/// Tool calls of the current turn, assembled from their deltas.
#[derive(Debug, Default)]
struct PendingToolCalls {
    calls: Vec<ToolCall>,
}

impl PendingToolCalls {
    fn apply(&mut self, deltas: Vec<ToolCallDelta>) {
        for delta in deltas {
            if delta.index >= MAX_TOOL_CALLS {
                warn!(index = delta.index, "Dropping tool call delta");
                continue;
            }
            while self.calls.len() <= delta.index {
                self.calls.push(ToolCall::function("", "", ""));
            }
            let call = &mut self.calls[delta.index];
            if let Some(id) = delta.id {
                call.id = id;
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    call.function.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    call.function.arguments.push_str(&arguments);
                }
            }
        }
    }

    fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter(|call| !call.function.name.is_empty())
            .collect()
    }
}

/// Turn a streaming response body into text chunks and, at the end, the
/// turn's tool calls.
fn event_stream(response: reqwest::Response) -> impl Stream<Item = Result<TurnChunk, ServiceError>> + Send + 'static {
    let mut bytes = response.bytes_stream();

    stream! {
        let mut lines = LineBuffer::default();
        let mut pending = PendingToolCalls::default();
        let mut body_done = false;

        loop {
            let line = match lines.next_line() {
                Some(line) => line,
                None if body_done => match lines.take_rest() {
                    Some(rest) => rest,
                    None => break,
                },
                None => {
                    match bytes.next().await {
                        Some(Ok(piece)) => lines.push(&piece),
                        Some(Err(e)) => {
                            yield Err(ServiceError::Stream(e.to_string()));
                            return;
                        }
                        None => body_done = true,
                    }
                    continue;
                }
            };

            match line.and_then(|line| parse_sse_line(&line)) {
                Ok(SseLine::Text(text)) => {
                    yield Ok(TurnChunk::Text(text));
                }
                Ok(SseLine::ToolCalls(deltas)) => pending.apply(deltas),
                Ok(SseLine::Skip) => {}
                Ok(SseLine::Done) => break,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        let calls = pending.finish();
        if !calls.is_empty() {
            debug!(calls = calls.len(), "Model requested tools");
            yield Ok(TurnChunk::ToolCalls(calls));
        }
    }
}

/// Client for any endpoint speaking the OpenAI chat-completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    top_p: f32,
}

impl OpenAiCompatibleClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.5,
            top_p: 1.0,
        })
    }

    pub fn from_preset(
        preset: ProviderPreset,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        Self::new(preset.name(), preset.base_url(), api_key, model)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        tools: &[ToolDefinition],
        stream: bool,
    ) -> Result<reqwest::Response, ServiceError> {
        let body = ChatCompletionBody {
            model: &self.model,
            messages: &request.messages,
            temperature: self.temperature,
            top_p: self.top_p,
            max_completion_tokens: request.max_tokens,
            stream,
            tools: tools
                .iter()
                .map(|function| FunctionTool {
                    kind: "function",
                    function,
                })
                .collect(),
        };

        info!(
            provider = %self.name,
            model = %self.model,
            stream,
            tools = tools.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text));
        }
        Ok(response)
    }
}

#[async_trait]
impl TextCompletionService for OpenAiCompatibleClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let response: ChatCompletionResponse = self.send(request, &[], false).await?.json().await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();
        debug!(chars = text.len(), "Completion received");
        Ok(text)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream, ServiceError> {
        let response = self.send(request, &[], true).await?;
        let text = event_stream(response).filter_map(|chunk| {
            futures::future::ready(match chunk {
                Ok(TurnChunk::Text(text)) => Some(Ok(text)),
                Ok(TurnChunk::ToolCalls(_)) => None,
                Err(e) => Some(Err(e)),
            })
        });
        Ok(CompletionStream::new(text))
    }

    async fn stream_turn(
        &self,
        request: &CompletionRequest,
        tools: &[ToolDefinition],
    ) -> Result<TurnStream, ServiceError> {
        let response = self.send(request, tools, true).await?;
        Ok(TurnStream::new(event_stream(response)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
