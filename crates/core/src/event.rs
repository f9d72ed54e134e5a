//! Lifecycle events: immutable snapshots published on the extension bus.
//!
//! The agent loop publishes one of these at each fixed point of a run.
//! Handlers subscribe per [`EventKind`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::TerminalState;
use crate::message::SessionId;

/// The event types handlers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    AgentStart,
    AgentEnd,
    TurnStart,
    TurnEnd,
    ToolCall,
    ToolResult,
    UserInput,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        Self::SessionStart,
        Self::SessionEnd,
        Self::AgentStart,
        Self::AgentEnd,
        Self::TurnStart,
        Self::TurnEnd,
        Self::ToolCall,
        Self::ToolResult,
        Self::UserInput,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::AgentStart => "agent_start",
            Self::AgentEnd => "agent_end",
            Self::TurnStart => "turn_start",
            Self::TurnEnd => "turn_end",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::UserInput => "user_input",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All lifecycle events in the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A session handle issued its first prompt
    SessionStart { session_id: SessionId },

    /// A session handle was closed
    SessionEnd { session_id: SessionId },

    /// A run began for this prompt
    AgentStart { prompt: String },

    /// A run reached a terminal state
    AgentEnd {
        outcome: TerminalState,
        text: String,
        turns: u32,
    },

    /// A turn is about to call the model
    TurnStart { index: u32 },

    /// A turn finished (tools dispatched, if any)
    TurnEnd { index: u32 },

    /// A tool call is about to execute
    ToolCall {
        call_id: String,
        name: String,
        arguments: Map<String, Value>,
    },

    /// A tool call finished
    ToolResult {
        call_id: String,
        name: String,
        result: String,
        is_error: bool,
    },

    /// The caller supplied input
    UserInput { text: String },
}

impl Event {
    /// The subscription key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SessionStart { .. } => EventKind::SessionStart,
            Self::SessionEnd { .. } => EventKind::SessionEnd,
            Self::AgentStart { .. } => EventKind::AgentStart,
            Self::AgentEnd { .. } => EventKind::AgentEnd,
            Self::TurnStart { .. } => EventKind::TurnStart,
            Self::TurnEnd { .. } => EventKind::TurnEnd,
            Self::ToolCall { .. } => EventKind::ToolCall,
            Self::ToolResult { .. } => EventKind::ToolResult,
            Self::UserInput { .. } => EventKind::UserInput,
        }
    }
}
