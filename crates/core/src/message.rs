//! Message and Session domain types.
//!
//! These are the core value objects that flow through the engine:
//! the caller adds a user message → the agent loop streams an assistant
//! message → tool results come back as tool messages → the session store
//! receives each one as it is finalized.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::content::{ContentBlock, ContentDecodeError, ToolCallRequest, ToolCallResult};

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    fn parse(s: &str) -> Result<Self, ContentDecodeError> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(ContentDecodeError::InvalidRole(other.to_string())),
        }
    }

    /// Whether a block with the given tag may appear on this role.
    fn allows(&self, block: &ContentBlock) -> bool {
        match block {
            ContentBlock::ToolCall(_) => *self == Role::Assistant,
            ContentBlock::ToolResult(_) => *self == Role::Tool,
            ContentBlock::Text(_) | ContentBlock::Image(_) => true,
        }
    }
}

/// Token usage reported by the model for one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_read_tokens: u32,
    #[serde(default)]
    pub cache_write_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Fold another report into this one.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
    }
}

/// A single message in a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// Ordered content blocks
    pub content: Vec<ContentBlock>,

    /// Creation time
    pub timestamp: DateTime<Utc>,

    /// Token usage, when the model reported it
    pub usage: Option<Usage>,
}

impl Message {
    fn with_role(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
            usage: None,
        }
    }

    /// Create a new user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, vec![ContentBlock::Text(text.into())])
    }

    /// Create a user message from arbitrary text/image blocks.
    pub fn user_blocks(content: Vec<ContentBlock>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create an assistant message holding only text.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, vec![ContentBlock::Text(text.into())])
    }

    /// Create an assistant message from accumulated blocks.
    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a tool message carrying one result.
    pub fn tool_result(result: ToolCallResult) -> Self {
        Self::with_role(Role::Tool, vec![ContentBlock::ToolResult(result)])
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content.iter().filter_map(ContentBlock::as_text).collect()
    }

    /// Tool-call requests in the order the model emitted them.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }

    /// Tool-call results carried by this message.
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolCallResult> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolResult(result) => Some(result),
            _ => None,
        })
    }

    /// Check that every block is allowed for this message's role.
    pub fn validate(&self) -> Result<(), ContentDecodeError> {
        match self.content.iter().find(|b| !self.role.allows(b)) {
            Some(block) => Err(ContentDecodeError::RoleMismatch {
                role: self.role.as_str().to_string(),
                tag: block.tag().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Canonical serialized form.
    ///
    /// A lone text block collapses to a bare string; anything else becomes an
    /// ordered list of tagged blocks.
    pub fn encode(&self) -> Value {
        let content = match self.content.as_slice() {
            [ContentBlock::Text(text)] => Value::String(text.clone()),
            blocks => Value::Array(blocks.iter().map(ContentBlock::encode).collect()),
        };

        let mut encoded = json!({
            "role": self.role.as_str(),
            "content": content,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        });
        if let Some(usage) = &self.usage {
            encoded["usage"] = json!({
                "input_tokens": usage.input_tokens,
                "output_tokens": usage.output_tokens,
                "cache_read_tokens": usage.cache_read_tokens,
                "cache_write_tokens": usage.cache_write_tokens,
            });
        }
        encoded
    }

    /// Recover a message from its canonical form.
    pub fn decode(value: &Value) -> Result<Self, ContentDecodeError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ContentDecodeError::InvalidShape("message must be an object".into()))?;

        let role = obj
            .get("role")
            .and_then(Value::as_str)
            .ok_or_else(|| ContentDecodeError::InvalidShape("message is missing 'role'".into()))
            .and_then(Role::parse)?;

        let content = match obj.get("content") {
            Some(Value::String(text)) => vec![ContentBlock::Text(text.clone())],
            Some(Value::Array(blocks)) => blocks
                .iter()
                .map(ContentBlock::decode)
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(ContentDecodeError::InvalidShape(
                    "'content' must be a string or a list of blocks".into(),
                ));
            }
            None => return Err(ContentDecodeError::InvalidShape("message is missing 'content'".into())),
        };

        let timestamp = obj
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| ContentDecodeError::InvalidShape("message is missing 'timestamp'".into()))?;
        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|e| ContentDecodeError::InvalidShape(format!("bad timestamp '{timestamp}': {e}")))?
            .with_timezone(&Utc);

        let usage = match obj.get("usage") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                Usage::deserialize(raw).map_err(|e| ContentDecodeError::InvalidShape(format!("bad usage: {e}")))?,
            ),
        };

        let message = Self {
            role,
            content,
            timestamp,
            usage,
        };
        message.validate()?;
        Ok(message)
    }

    /// Encode to a single JSON line.
    pub fn to_json_string(&self) -> String {
        self.encode().to_string()
    }

    /// Decode from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ContentDecodeError> {
        let value: Value = serde_json::from_str(s).map_err(|e| ContentDecodeError::Json(e.to_string()))?;
        Self::decode(&value)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.encode().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::decode(&value).map_err(serde::de::Error::custom)
    }
}

/// A session is the ordered, append-only record of one conversation.
///
/// Only the agent loop appends; everyone else reads through [`Session::messages`].
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session ID
    pub id: SessionId,

    /// Directory tools resolve relative paths against
    pub working_dir: PathBuf,

    /// Model identifier this session talks to
    pub model: String,

    /// When this session was created
    pub created_at: DateTime<Utc>,

    messages: Vec<Message>,
}

impl Session {
    /// Create a new empty session.
    pub fn new(working_dir: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self::with_id(SessionId::new(), working_dir, model)
    }

    /// Create an empty session with a caller-chosen ID.
    pub fn with_id(id: SessionId, working_dir: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            id,
            working_dir: working_dir.into(),
            model: model.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Rebuild a session from previously persisted messages.
    ///
    /// Fails if any message breaks a role invariant or answers a tool call
    /// that was never requested.
    pub fn restore(
        id: SessionId,
        working_dir: impl Into<PathBuf>,
        model: impl Into<String>,
        messages: Vec<Message>,
    ) -> Result<Self, ContentDecodeError> {
        validate_history(&messages)?;
        let created_at = messages.first().map(|m| m.timestamp).unwrap_or_else(Utc::now);
        Ok(Self {
            id,
            working_dir: working_dir.into(),
            model: model.into(),
            created_at,
            messages,
        })
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// All messages in conversation order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Total tokens across every message that reported usage.
    pub fn total_usage(&self) -> Usage {
        let mut total = Usage::default();
        for usage in self.messages.iter().filter_map(|m| m.usage.as_ref()) {
            total.add(usage);
        }
        total
    }
}

/// Check role invariants and that every tool result answers an earlier request.
pub fn validate_history(messages: &[Message]) -> Result<(), ContentDecodeError> {
    let mut requested: HashSet<&str> = HashSet::new();
    for message in messages {
        message.validate()?;
        for call in message.tool_calls() {
            requested.insert(call.id.as_str());
        }
        for result in message.tool_results() {
            if !requested.contains(result.call_id.as_str()) {
                return Err(ContentDecodeError::OrphanToolResult {
                    call_id: result.call_id.clone(),
                });
            }
        }
    }
    Ok(())
}
