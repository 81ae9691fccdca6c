//! Progress events and the sinks that carry them to the caller.
//!
//! Every event serializes as `{"type": "<kebab-name>", "content": <payload>}`,
//! the same frame shape a browser client reads off the event stream.
//!
//! Emission is fire-and-forget: [`ProgressSink::emit`] returns nothing, and a
//! sink whose consumer has gone away silently drops events.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::services::SearchHit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Search,
    Extract,
    Analyze,
    Reasoning,
    Synthesis,
    Thought,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Pending,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub status: ActivityStatus,
    pub message: String,
    pub timestamp: String,
    pub depth: u32,
    pub completed_steps: u32,
    pub total_steps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInit {
    pub max_depth: u32,
    pub total_steps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthProgress {
    pub current: u32,
    pub max: u32,
    pub completed_steps: u32,
    pub total_steps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub id: String,
    pub role: String,
}

/// A chat tool the model asked to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Arguments as the model sent them (JSON text).
    pub args: String,
}

/// What a chat tool answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
}

/// Everything a research run or a chat reply reports while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "kebab-case")]
pub enum ProgressEvent {
    ProgressInit(ProgressInit),
    DepthDelta(DepthProgress),
    SourceDelta(SearchHit),
    ActivityDelta(Activity),
    Finish(String),
    AssistantMessage(AssistantMessage),
    Text(String),
    ToolCall(ToolInvocation),
    ToolResult(ToolResult),
    Error(String),
}

impl ProgressEvent {
    /// Wire name of the event, as it appears in the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::ProgressInit(_) => "progress-init",
            ProgressEvent::DepthDelta(_) => "depth-delta",
            ProgressEvent::SourceDelta(_) => "source-delta",
            ProgressEvent::ActivityDelta(_) => "activity-delta",
            ProgressEvent::Finish(_) => "finish",
            ProgressEvent::AssistantMessage(_) => "assistant-message",
            ProgressEvent::Text(_) => "text",
            ProgressEvent::ToolCall(_) => "tool-call",
            ProgressEvent::ToolResult(_) => "tool-result",
            ProgressEvent::Error(_) => "error",
        }
    }
}

/// Current time as an RFC 3339 timestamp with millisecond precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Ordered, fire-and-forget event emitter.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events into an unbounded channel.
///
/// Once the receiver is dropped, events are discarded without error.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Records events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far, in order.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for MemorySink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_progress_init_wire_format() {
        let event = ProgressEvent::ProgressInit(ProgressInit {
            max_depth: 7,
            total_steps: 35,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "progress-init", "content": {"maxDepth": 7, "totalSteps": 35}})
        );
    }

    #[test]
    fn test_activity_wire_format() {
        let event = ProgressEvent::ActivityDelta(Activity {
            kind: ActivityKind::Search,
            status: ActivityStatus::Complete,
            message: "Found 3 relevant results".into(),
            timestamp: "2026-10-18T10:00:00.000Z".into(),
            depth: 1,
            completed_steps: 1,
            total_steps: 10,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "activity-delta",
                "content": {
                    "type": "search",
                    "status": "complete",
                    "message": "Found 3 relevant results",
                    "timestamp": "2026-10-18T10:00:00.000Z",
                    "depth": 1,
                    "completedSteps": 1,
                    "totalSteps": 10
                }
            })
        );
    }

    #[test]
    fn test_finish_and_source_wire_format() {
        let finish = serde_json::to_value(ProgressEvent::Finish("report".into())).unwrap();
        assert_eq!(finish, json!({"type": "finish", "content": "report"}));

        let source = serde_json::to_value(ProgressEvent::SourceDelta(SearchHit {
            url: "https://a.org".into(),
            title: "A".into(),
            description: "d".into(),
        }))
        .unwrap();
        assert_eq!(
            source,
            json!({"type": "source-delta", "content": {"url": "https://a.org", "title": "A", "description": "d"}})
        );
    }

    #[test]
    fn test_event_name_matches_serialized_type() {
        let event = ProgressEvent::DepthDelta(DepthProgress {
            current: 1,
            max: 2,
            completed_steps: 0,
            total_steps: 10,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.name());
    }

    #[test]
    fn test_tool_events_wire_format() {
        let call = serde_json::to_value(ProgressEvent::ToolCall(ToolInvocation {
            tool_call_id: "call_1".into(),
            tool_name: "search".into(),
            args: r#"{"query":"statins"}"#.into(),
        }))
        .unwrap();
        assert_eq!(
            call,
            json!({
                "type": "tool-call",
                "content": {"toolCallId": "call_1", "toolName": "search", "args": "{\"query\":\"statins\"}"}
            })
        );

        let result = ProgressEvent::ToolResult(ToolResult {
            tool_call_id: "call_1".into(),
            tool_name: "search".into(),
            success: false,
        });
        assert_eq!(serde_json::to_value(&result).unwrap()["type"], result.name());
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[tokio::test]
    async fn test_channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.emit(ProgressEvent::Text("lost".into()));
    }

    #[test]
    fn test_memory_sink_preserves_order() {
        let sink = MemorySink::new();
        sink.emit(ProgressEvent::Text("a".into()));
        sink.emit(ProgressEvent::Text("b".into()));
        assert_eq!(
            sink.events(),
            vec![ProgressEvent::Text("a".into()), ProgressEvent::Text("b".into())]
        );
    }
}
