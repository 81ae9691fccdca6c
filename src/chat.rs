//! # Streaming Chat Bridge
//!
//! Forwards a streaming completion to a [`ProgressSink`] chunk by chunk.
//!
//! The event order for a plain reply is fixed:
//!
//! ```text
//! assistant-message { id, role }  →  text* (one per non-empty chunk)
//! ```
//!
//! With [`ChatTools`] the model may stop a turn to call tools. Each call is
//! reported as `tool-call`, run, reported as `tool-result`, and its output is
//! sent back for the next turn. Text from every turn streams as it arrives.
//! After [`DEFAULT_MAX_TOOL_STEPS`] tool turns the model is asked once more
//! without tools, so a reply always ends in text.
//!
//! On any failure a single `error` event ends the reply. There is no retry;
//! the caller decides whether to ask again.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::research::progress::{AssistantMessage, ProgressEvent, ProgressSink, ToolInvocation, ToolResult};
use crate::services::{ChatMessage, CompletionRequest, TextCompletionService, ToolCall, TurnChunk};
use crate::tools::{failure_output, ChatTools};

/// System prompt prepended to every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly research assistant. \
Keep your responses concise and helpful. \
When you state facts that came from a source, say where they came from.";

/// Completion budget for a chat reply.
pub const DEFAULT_CHAT_MAX_TOKENS: u32 = 4096;

/// Tool turns allowed before the model must answer in text.
pub const DEFAULT_MAX_TOOL_STEPS: usize = 5;

#[derive(Clone)]
pub struct ChatBridge {
    completion: Arc<dyn TextCompletionService>,
    system_prompt: String,
    max_tokens: u32,
    max_tool_steps: usize,
}

/// Text and tool calls of one model turn.
#[derive(Default)]
struct Turn {
    text: String,
    tool_calls: Vec<ToolCall>,
}

impl ChatBridge {
    pub fn new(completion: Arc<dyn TextCompletionService>) -> Self {
        Self {
            completion,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: DEFAULT_CHAT_MAX_TOKENS,
            max_tool_steps: DEFAULT_MAX_TOOL_STEPS,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_tool_steps(mut self, max_tool_steps: usize) -> Self {
        self.max_tool_steps = max_tool_steps;
        self
    }

    /// Stream a reply to `messages` into `sink`.
    ///
    /// On success `on_finish` receives the transcript (the input messages plus
    /// the assistant reply) exactly once, and the full reply text is returned.
    /// On failure `on_finish` is never called.
    pub async fn stream_reply<F>(
        &self,
        messages: &[ChatMessage],
        sink: &dyn ProgressSink,
        on_finish: F,
    ) -> Result<String, ServiceError>
    where
        F: FnOnce(&[ChatMessage]),
    {
        self.reply(messages, None, sink, on_finish).await
    }

    /// Like [`stream_reply`](Self::stream_reply), but the model may call
    /// `tools` along the way. The transcript then also holds the tool-call
    /// turns and the tool outputs, in order.
    pub async fn stream_reply_with_tools<F>(
        &self,
        messages: &[ChatMessage],
        tools: &ChatTools,
        sink: &dyn ProgressSink,
        on_finish: F,
    ) -> Result<String, ServiceError>
    where
        F: FnOnce(&[ChatMessage]),
    {
        self.reply(messages, Some(tools), sink, on_finish).await
    }

    async fn reply<F>(
        &self,
        messages: &[ChatMessage],
        tools: Option<&ChatTools>,
        sink: &dyn ProgressSink,
        on_finish: F,
    ) -> Result<String, ServiceError>
    where
        F: FnOnce(&[ChatMessage]),
    {
        let mut conversation = Vec::with_capacity(messages.len() + 1);
        conversation.push(ChatMessage::system(self.system_prompt.as_str()));
        conversation.extend(messages.iter().cloned());

        let definitions = match tools {
            Some(tools) => tools.definitions().await,
            None => Vec::new(),
        };

        let id = Uuid::new_v4().to_string();
        info!(
            provider = self.completion.name(),
            message_id = %id,
            messages = messages.len(),
            tools = definitions.len(),
            "Streaming chat reply"
        );
        sink.emit(ProgressEvent::AssistantMessage(AssistantMessage {
            id,
            role: "assistant".to_string(),
        }));

        let mut transcript = messages.to_vec();
        let mut reply = String::new();
        let mut step = 0;

        loop {
            // Out of tool turns: the last request offers no tools
            let offered = if step < self.max_tool_steps { definitions.as_slice() } else { &[] };
            let request = CompletionRequest::with_messages(conversation.clone()).with_max_tokens(self.max_tokens);
            let turn = match self.turn(&request, offered, sink).await {
                Ok(turn) => turn,
                Err(e) => return Err(fail(sink, e)),
            };
            reply.push_str(&turn.text);

            let (Some(tools), false) = (tools, turn.tool_calls.is_empty()) else {
                transcript.push(ChatMessage::assistant(turn.text));
                break;
            };

            step += 1;
            debug!(step, calls = turn.tool_calls.len(), "Running chat tools");
            let calls = turn.tool_calls.clone();
            let assistant = ChatMessage::assistant_tool_calls(turn.text, turn.tool_calls);
            conversation.push(assistant.clone());
            transcript.push(assistant);

            for call in calls {
                let answer = run_tool(tools, &call, sink).await;
                conversation.push(answer.clone());
                transcript.push(answer);
            }
        }

        debug!(chars = reply.len(), tool_steps = step, "Chat reply complete");
        on_finish(&transcript);

        Ok(reply)
    }

    /// Stream one model turn, forwarding its text as it arrives.
    async fn turn(
        &self,
        request: &CompletionRequest,
        tools: &[rig::completion::ToolDefinition],
        sink: &dyn ProgressSink,
    ) -> Result<Turn, ServiceError> {
        let mut chunks = self.completion.stream_turn(request, tools).await?.into_inner();
        let mut turn = Turn::default();
        while let Some(chunk) = chunks.next().await {
            match chunk? {
                TurnChunk::Text(text) if text.is_empty() => continue,
                TurnChunk::Text(text) => {
                    turn.text.push_str(&text);
                    sink.emit(ProgressEvent::Text(text));
                }
                TurnChunk::ToolCalls(calls) => turn.tool_calls.extend(calls),
            }
        }
        Ok(turn)
    }
}

/// Run one tool call and build the `tool` message that answers it. A failed
/// tool is reported to the model, not to the caller.
async fn run_tool(tools: &ChatTools, call: &ToolCall, sink: &dyn ProgressSink) -> ChatMessage {
    sink.emit(ProgressEvent::ToolCall(ToolInvocation {
        tool_call_id: call.id.clone(),
        tool_name: call.function.name.clone(),
        args: call.function.arguments.clone(),
    }));

    let (output, success) = match tools.call(&call.function.name, &call.function.arguments).await {
        Ok(output) => (output, true),
        Err(e) => {
            warn!(tool = %call.function.name, error = %e, "Chat tool failed");
            (failure_output(&e), false)
        }
    };

    sink.emit(ProgressEvent::ToolResult(ToolResult {
        tool_call_id: call.id.clone(),
        tool_name: call.function.name.clone(),
        success,
    }));
    ChatMessage::tool(call.id.as_str(), output)
}

fn fail(sink: &dyn ProgressSink, e: ServiceError) -> ServiceError {
    error!(error = %e, "Chat stream failed");
    sink.emit(ProgressEvent::Error(e.to_string()));
    e
}
