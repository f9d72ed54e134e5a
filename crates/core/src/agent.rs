//! Agent loop configuration, state, and outcome types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::provider::DEFAULT_MAX_TOKENS;

pub const DEFAULT_MAX_TURNS: u32 = 10;
pub const DEFAULT_MAX_TOOL_CALLS_PER_TURN: usize = 20;

/// Configuration for one agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Model identifier sent with every request
    pub model: String,

    /// Directory tools resolve relative paths against
    pub working_dir: PathBuf,

    /// Model calls allowed per run
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Tool calls executed per turn; the rest are skipped
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls_per_turn: usize,

    /// Optional system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Maximum tokens per model call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_turns() -> u32 {
    DEFAULT_MAX_TURNS
}
fn default_max_tool_calls() -> usize {
    DEFAULT_MAX_TOOL_CALLS_PER_TURN
}
fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl LoopConfig {
    pub fn new(model: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            working_dir: working_dir.into(),
            max_turns: DEFAULT_MAX_TURNS,
            max_tool_calls_per_turn: DEFAULT_MAX_TOOL_CALLS_PER_TURN,
            system_prompt: None,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_tool_calls_per_turn(mut self, max: usize) -> Self {
        self.max_tool_calls_per_turn = max;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// The model answered without requesting tools
    Completed,
    /// The turn limit was reached
    MaxTurnsExceeded,
    /// The caller cancelled
    Aborted,
    /// The model capability failed
    ModelError,
}

impl TerminalState {
    /// Stable machine-readable reason code.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::MaxTurnsExceeded => "max_turns_exceeded",
            Self::Aborted => "aborted",
            Self::ModelError => "model_error",
        }
    }
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason_code())
    }
}

/// The loop's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    TurnActive,
    AwaitingModel,
    DispatchingTools,
    Terminal(TerminalState),
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// What a run hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub outcome: TerminalState,

    /// Final answer, or best-effort partial text
    pub text: String,

    /// Model calls made
    pub turns: u32,

    pub tool_calls_executed: usize,
    pub tool_calls_skipped: usize,
}
