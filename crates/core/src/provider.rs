//! Model capability: the abstraction over language-model backends.
//!
//! A provider takes the conversation so far plus the tool schema and returns
//! a lazy, finite stream of deltas. The agent loop consumes that stream to
//! completion and folds it into one assistant message.
//!
//! Implementations: OpenAI-compatible SSE, scripted replay for tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::content::ToolCallRequest;
use crate::error::ProviderError;
use crate::message::{Message, Usage};

/// Default cap on tokens generated per model call.
pub const DEFAULT_MAX_TOKENS: u32 = 16_384;

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Everything the model needs for one call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Model identifier (e.g., "gpt-4o")
    pub model: String,

    /// Optional system prompt, sent ahead of the history
    pub system_prompt: Option<String>,

    /// Full session history
    pub messages: Vec<Message>,

    /// Tools the model may call, in registration order
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens to generate
    pub max_tokens: u32,
}

impl ModelRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            messages,
            tools: Vec::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// One incremental piece of a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// A fragment of assistant text
    Text(String),
    /// A fully assembled tool-call request
    ToolCall(ToolCallRequest),
    /// Token accounting, usually last
    Usage(Usage),
}

/// The stream a provider hands back. Finite and non-restartable.
pub type DeltaStream = BoxStream<'static, Result<Delta, ProviderError>>;

/// The core model capability.
///
/// An error from `stream` or from any item of the returned stream ends the
/// current run in the `ModelError` state.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name (for logging).
    fn name(&self) -> &str;

    /// Start a streaming completion.
    async fn stream(&self, request: ModelRequest) -> Result<DeltaStream, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_defaults() {
        let req = ModelRequest::new("gpt-4o", vec![Message::user("hi")]);
        assert_eq!(req.max_tokens, DEFAULT_MAX_TOKENS);
        assert!(req.system_prompt.is_none());
        assert!(req.tools.is_empty());

        let req = req
            .with_system_prompt(Some("be brief".into()))
            .with_max_tokens(256)
            .with_tools(vec![ToolDefinition {
                name: "read".into(),
                description: "Read a file".into(),
                parameters: serde_json::json!({ "type": "object" }),
            }]);
        assert_eq!(req.system_prompt.as_deref(), Some("be brief"));
        assert_eq!(req.max_tokens, 256);
        assert_eq!(req.tools[0].name, "read");
    }
}
