//! Agent-level streaming events.
//!
//! `AgentStreamEvent` lifts provider deltas and dispatcher activity into
//! events a front end can render as they happen (the CLI prints chunks to
//! stdout). They travel over an optional `mpsc` channel handed to
//! [`AgentLoop::run_stream`](crate::AgentLoop::run_stream).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use taskloom_core::agent::TerminalState;
use taskloom_core::message::Usage;

/// Events emitted by the agent during a streaming run.
///
/// - `chunk`       partial text from the model
/// - `tool_call`   the agent is invoking a tool
/// - `tool_result` tool execution completed
/// - `turn_start`  a new model call is starting
/// - `done`        the run reached a terminal state
/// - `error`       the model failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text from the model.
    Chunk { content: String },

    /// A new turn is about to call the model.
    TurnStart { index: u32 },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: Map<String, Value>,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },

    /// The run is over.
    Done {
        session_id: String,
        outcome: TerminalState,
        usage: Option<Usage>,
        turns: u32,
        tool_calls_made: usize,
    },

    /// The model failed mid-run.
    Error { message: String },
}

impl AgentStreamEvent {
    /// Stable event name, matching the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::TurnStart { .. } => "turn_start",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serialization() {
        let event = AgentStreamEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn done_serialization() {
        let event = AgentStreamEvent::Done {
            session_id: "abc".into(),
            outcome: TerminalState::MaxTurnsExceeded,
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 20,
                ..Usage::default()
            }),
            turns: 2,
            tool_calls_made: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"done""#));
        assert!(json.contains(r#""outcome":"max_turns_exceeded""#));
        assert!(json.contains(r#""turns":2"#));
    }

    #[test]
    fn event_type_matches_tag() {
        let events = [
            AgentStreamEvent::Chunk { content: "x".into() },
            AgentStreamEvent::TurnStart { index: 0 },
            AgentStreamEvent::ToolCall {
                id: "a".into(),
                name: "b".into(),
                input: Map::new(),
            },
            AgentStreamEvent::ToolResult {
                id: "a".into(),
                name: "b".into(),
                output: "c".into(),
                is_error: false,
            },
            AgentStreamEvent::Error { message: "x".into() },
        ];
        for event in events {
            let json: Value = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn deserializes_tool_result() {
        let json = r#"{"type":"tool_result","id":"c1","name":"read","output":"ok","is_error":true}"#;
        match serde_json::from_str::<AgentStreamEvent>(json).unwrap() {
            AgentStreamEvent::ToolResult { id, is_error, .. } => {
                assert_eq!(id, "c1");
                assert!(is_error);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
