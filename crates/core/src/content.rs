//! Content blocks: the typed units that make up a message.
//!
//! Every block carries an explicit `type` tag on the wire. Decoding dispatches
//! on that tag and nothing else, so two blocks that happen to share field
//! names can never be confused for one another.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Wire tag for a text block.
pub const TAG_TEXT: &str = "text";
/// Wire tag for an image block.
pub const TAG_IMAGE: &str = "image";
/// Wire tag for a tool-call request block.
pub const TAG_TOOL_CALL: &str = "tool_call";
/// Wire tag for a tool-call result block.
pub const TAG_TOOL_RESULT: &str = "tool_result";

/// Failure to reconstruct content from its serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentDecodeError {
    #[error("unrecognized content block tag '{0}'")]
    UnknownTag(String),

    #[error("content block is missing its 'type' tag")]
    MissingTag,

    #[error("malformed '{tag}' block: {reason}")]
    Malformed { tag: String, reason: String },

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("unknown message role '{0}'")]
    InvalidRole(String),

    #[error("'{tag}' block is not allowed on a {role} message")]
    RoleMismatch { role: String, tag: String },

    #[error("tool result '{call_id}' has no matching tool call request")]
    OrphanToolResult { call_id: String },

    #[error("invalid JSON: {0}")]
    Json(String),
}

/// A model-issued request to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON object
    #[serde(default)]
    pub arguments: Map<String, Value>,

    /// The raw argument text, when the model sent something that is not a
    /// JSON object. Such a call is answered with an error, never executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_arguments: Option<String>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            invalid_arguments: None,
        }
    }

    /// A request whose arguments could not be read as a JSON object.
    pub fn malformed(id: impl Into<String>, name: impl Into<String>, raw_arguments: impl Into<String>) -> Self {
        Self {
            invalid_arguments: Some(raw_arguments.into()),
            ..Self::new(id, name, Map::new())
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.invalid_arguments.is_some()
    }
}

/// The outcome of one tool call, matched to its request by `call_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// The call ID this result answers
    pub call_id: String,

    /// Name of the tool that was (or would have been) invoked
    pub name: String,

    /// Output text, or the error description when `is_error` is set
    pub content: String,

    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn success(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// Where image bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Inline bytes (base64 on the wire)
    Bytes(Vec<u8>),
    /// A reference the model service can resolve (URL, file id)
    Url(String),
}

/// An image attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageContent {
    pub source: ImageSource,
    pub mime_type: String,
}

/// One typed unit of message content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    Image(ImageContent),
    ToolCall(ToolCallRequest),
    ToolResult(ToolCallResult),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The wire tag for this block.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Text(_) => TAG_TEXT,
            Self::Image(_) => TAG_IMAGE,
            Self::ToolCall(_) => TAG_TOOL_CALL,
            Self::ToolResult(_) => TAG_TOOL_RESULT,
        }
    }

    /// Encode as a tagged JSON object.
    pub fn encode(&self) -> Value {
        match self {
            Self::Text(text) => json!({ "type": TAG_TEXT, "text": text }),
            Self::Image(image) => {
                let source = match &image.source {
                    ImageSource::Bytes(bytes) => json!({ "kind": "base64", "data": BASE64.encode(bytes) }),
                    ImageSource::Url(url) => json!({ "kind": "url", "url": url }),
                };
                json!({ "type": TAG_IMAGE, "source": source, "mime_type": image.mime_type })
            }
            Self::ToolCall(call) => {
                let mut value = json!({
                    "type": TAG_TOOL_CALL,
                    "id": call.id,
                    "name": call.name,
                    "arguments": Value::Object(call.arguments.clone()),
                });
                if let Some(raw) = &call.invalid_arguments {
                    value["invalid_arguments"] = Value::String(raw.clone());
                }
                value
            }
            Self::ToolResult(result) => json!({
                "type": TAG_TOOL_RESULT,
                "call_id": result.call_id,
                "name": result.name,
                "content": result.content,
                "is_error": result.is_error,
            }),
        }
    }

    /// Decode a tagged JSON object.
    pub fn decode(value: &Value) -> Result<Self, ContentDecodeError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ContentDecodeError::InvalidShape("content block must be an object".into()))?;
        let tag = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ContentDecodeError::MissingTag)?;

        match tag {
            TAG_TEXT => {
                let wire: TextWire = payload(tag, value)?;
                Ok(Self::Text(wire.text))
            }
            TAG_IMAGE => {
                let wire: ImageWire = payload(tag, value)?;
                let source = match wire.source {
                    ImageSourceWire::Base64 { data } => {
                        let bytes = BASE64.decode(data.as_bytes()).map_err(|e| ContentDecodeError::Malformed {
                            tag: tag.to_string(),
                            reason: format!("invalid base64 image data: {e}"),
                        })?;
                        ImageSource::Bytes(bytes)
                    }
                    ImageSourceWire::Url { url } => ImageSource::Url(url),
                };
                Ok(Self::Image(ImageContent {
                    source,
                    mime_type: wire.mime_type,
                }))
            }
            TAG_TOOL_CALL => Ok(Self::ToolCall(payload(tag, value)?)),
            TAG_TOOL_RESULT => Ok(Self::ToolResult(payload(tag, value)?)),
            other => Err(ContentDecodeError::UnknownTag(other.to_string())),
        }
    }
}

fn payload<T: DeserializeOwned>(tag: &str, value: &Value) -> Result<T, ContentDecodeError> {
    T::deserialize(value).map_err(|e| ContentDecodeError::Malformed {
        tag: tag.to_string(),
        reason: e.to_string(),
    })
}

// --- Wire payloads (the `type` tag is read separately) ---

#[derive(Deserialize)]
struct TextWire {
    text: String,
}

#[derive(Deserialize)]
struct ImageWire {
    source: ImageSourceWire,
    mime_type: String,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ImageSourceWire {
    Base64 { data: String },
    Url { url: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_block_is_tagged() {
        let encoded = ContentBlock::text("hello").encode();
        assert_eq!(encoded["type"], "text");
        assert_eq!(encoded["text"], "hello");
    }

    #[test]
    fn unknown_tag_is_named_in_error() {
        let err = ContentBlock::decode(&json!({ "type": "video", "url": "x" })).unwrap_err();
        assert_eq!(err, ContentDecodeError::UnknownTag("video".into()));
        assert!(err.to_string().contains("video"));
    }

    #[test]
    fn missing_tag_is_rejected_even_when_shape_matches() {
        // Looks exactly like a text block, minus the tag.
        let err = ContentBlock::decode(&json!({ "text": "hello" })).unwrap_err();
        assert_eq!(err, ContentDecodeError::MissingTag);
    }

    #[test]
    fn tag_wins_over_shape() {
        // Carries tool_result fields but says it is text: the tag decides.
        let err = ContentBlock::decode(&json!({
            "type": "text",
            "call_id": "c1",
            "name": "read",
            "content": "x"
        }))
        .unwrap_err();
        assert!(matches!(err, ContentDecodeError::Malformed { ref tag, .. } if tag == "text"));
    }

    #[test]
    fn image_bytes_travel_as_base64() {
        let block = ContentBlock::Image(ImageContent {
            source: ImageSource::Bytes(vec![0x89, b'P', b'N', b'G']),
            mime_type: "image/png".into(),
        });
        let encoded = block.encode();
        assert_eq!(encoded["source"]["kind"], "base64");
        assert_eq!(encoded["source"]["data"], "iVBORw==");
        assert_eq!(ContentBlock::decode(&encoded).unwrap(), block);
    }

    #[test]
    fn image_reference_decodes() {
        let decoded = ContentBlock::decode(&json!({
            "type": "image",
            "source": { "kind": "url", "url": "https://example.com/cat.jpg" },
            "mime_type": "image/jpeg"
        }))
        .unwrap();
        match decoded {
            ContentBlock::Image(img) => {
                assert_eq!(img.source, ImageSource::Url("https://example.com/cat.jpg".into()));
                assert_eq!(img.mime_type, "image/jpeg");
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn bad_base64_is_malformed() {
        let err = ContentBlock::decode(&json!({
            "type": "image",
            "source": { "kind": "base64", "data": "!!!" },
            "mime_type": "image/png"
        }))
        .unwrap_err();
        assert!(matches!(err, ContentDecodeError::Malformed { .. }));
    }

    #[test]
    fn tool_result_defaults_is_error_to_false() {
        let decoded = ContentBlock::decode(&json!({
            "type": "tool_result",
            "call_id": "c1",
            "name": "read",
            "content": "file body"
        }))
        .unwrap();
        assert_eq!(
            decoded,
            ContentBlock::ToolResult(ToolCallResult::success("c1", "read", "file body"))
        );
    }

    #[test]
    fn malformed_tool_call_keeps_raw_arguments() {
        let call = ToolCallRequest::malformed("c1", "bash", "{\"command\": ");
        assert!(call.is_malformed());
        assert!(call.arguments.is_empty());

        let block = ContentBlock::ToolCall(call);
        let encoded = block.encode();
        assert_eq!(encoded["invalid_arguments"], "{\"command\": ");
        assert_eq!(ContentBlock::decode(&encoded).unwrap(), block);

        let plain = ContentBlock::ToolCall(ToolCallRequest::new("c2", "bash", Map::new())).encode();
        assert!(plain.get("invalid_arguments").is_none());
    }

    #[test]
    fn non_object_block_is_invalid_shape() {
        let err = ContentBlock::decode(&json!(["text", "hi"])).unwrap_err();
        assert!(matches!(err, ContentDecodeError::InvalidShape(_)));
    }
}
