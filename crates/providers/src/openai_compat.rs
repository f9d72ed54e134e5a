//! OpenAI-compatible model provider.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, llama.cpp, and any endpoint
//! exposing `/v1/chat/completions` with SSE streaming and function calling.
//!
//! Text fragments are forwarded as they arrive. Tool-call fragments are
//! accumulated per index and emitted as complete requests once the model
//! finishes, followed by usage when the server reports it.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use taskloom_core::content::{ContentBlock, ImageSource, ToolCallRequest};
use taskloom_core::error::ProviderError;
use taskloom_core::message::{Message, Role, Usage};
use taskloom_core::provider::{Delta, DeltaStream, ModelProvider, ModelRequest, ToolDefinition};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible streaming provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_timeout(name, base_url, api_key, Duration::from_secs(120))
    }

    /// Create a provider with an explicit request timeout.
    pub fn with_timeout(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the chat-completions request body.
    fn request_body(request: &ModelRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(prompt) = &request.system_prompt {
            messages.push(ApiMessage {
                role: "system".into(),
                content: Some(Value::String(prompt.clone())),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        messages.extend(Self::to_api_messages(&request.messages));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !request.tools.is_empty() {
            body["tools"] = json!(Self::to_api_tools(&request.tools));
        }
        body
    }

    /// Convert session messages to OpenAI API format.
    ///
    /// A tool message becomes one API message per result block.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        let mut out = Vec::with_capacity(messages.len());
        for m in messages {
            match m.role {
                Role::User => out.push(ApiMessage {
                    role: "user".into(),
                    content: Some(user_content(&m.content)),
                    tool_calls: None,
                    tool_call_id: None,
                }),
                Role::Assistant => {
                    let calls: Vec<ApiToolCall> = m
                        .tool_calls()
                        .map(|tc| ApiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: tc.name.clone(),
                                arguments: Value::Object(tc.arguments.clone()).to_string(),
                            },
                        })
                        .collect();
                    let text = m.text();
                    out.push(ApiMessage {
                        role: "assistant".into(),
                        content: (!text.is_empty()).then(|| Value::String(text)),
                        tool_calls: (!calls.is_empty()).then_some(calls),
                        tool_call_id: None,
                    });
                }
                Role::Tool => {
                    out.extend(m.tool_results().map(|r| ApiMessage {
                        role: "tool".into(),
                        content: Some(Value::String(r.content.clone())),
                        tool_calls: None,
                        tool_call_id: Some(r.call_id.clone()),
                    }));
                }
            }
        }
        out
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }
}

/// User content: a plain string when text-only, otherwise content parts.
fn user_content(blocks: &[ContentBlock]) -> Value {
    if blocks.iter().all(|b| matches!(b, ContentBlock::Text(_))) {
        let text: String = blocks.iter().filter_map(ContentBlock::as_text).collect();
        return Value::String(text);
    }

    let parts = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text(text) => Some(json!({ "type": "text", "text": text })),
            ContentBlock::Image(image) => {
                let url = match &image.source {
                    ImageSource::Bytes(bytes) => format!("data:{};base64,{}", image.mime_type, BASE64.encode(bytes)),
                    ImageSource::Url(url) => url.clone(),
                };
                Some(json!({ "type": "image_url", "image_url": { "url": url } }))
            }
            _ => None,
        })
        .collect();
    Value::Array(parts)
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ModelRequest) -> Result<DeltaStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            return Err(ProviderError::ModelNotFound(request.model));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new(provider_name);

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };

                for delta in decoder.feed(&bytes) {
                    if tx.send(Ok(delta)).await.is_err() {
                        return; // receiver dropped
                    }
                }
                if decoder.is_done() {
                    return;
                }
            }

            // Stream ended without [DONE]
            for delta in decoder.finish() {
                if tx.send(Ok(delta)).await.is_err() {
                    return;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

// --- SSE decoding ---

/// Turns raw SSE bytes into deltas.
///
/// Fed arbitrary byte-chunk boundaries, which may split a UTF-8 character;
/// only complete lines are decoded and parsed.
struct SseDecoder {
    provider: String,
    buffer: Vec<u8>,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    done: bool,
}

impl SseDecoder {
    fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            buffer: Vec::new(),
            tool_calls: BTreeMap::new(),
            done: false,
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    /// Consume a chunk of the SSE body, returning any deltas it completed.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Delta> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let text = String::from_utf8_lossy(&raw[..line_end]);
            let line = text.trim_end_matches('\r');

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            // "[DONE]" signals end of stream
            if data == "[DONE]" {
                out.extend(self.finish());
                return out;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(chunk) => {
                    if let Some(choice) = chunk.choices.into_iter().next() {
                        if let Some(text) = choice.delta.content.filter(|c| !c.is_empty()) {
                            out.push(Delta::Text(text));
                        }
                        for tc in choice.delta.tool_calls.unwrap_or_default() {
                            let acc = self.tool_calls.entry(tc.index).or_default();
                            if let Some(id) = tc.id {
                                acc.id = id;
                            }
                            if let Some(func) = tc.function {
                                if let Some(name) = func.name {
                                    acc.name = name;
                                }
                                if let Some(args) = func.arguments {
                                    acc.arguments.push_str(&args);
                                }
                            }
                        }
                    }

                    // Usage arrives in the last chunk (stream_options)
                    if let Some(usage) = chunk.usage {
                        out.extend(self.take_tool_calls());
                        out.push(Delta::Usage(Usage {
                            input_tokens: usage.prompt_tokens,
                            output_tokens: usage.completion_tokens,
                            cache_read_tokens: usage
                                .prompt_tokens_details
                                .and_then(|d| d.cached_tokens)
                                .unwrap_or(0),
                            cache_write_tokens: 0,
                        }));
                    }
                }
                Err(e) => {
                    trace!(
                        provider = %self.provider,
                        data = %data,
                        error = %e,
                        "Ignoring unparseable SSE chunk"
                    );
                }
            }
        }
        out
    }

    /// Flush pending tool calls and stop.
    fn finish(&mut self) -> Vec<Delta> {
        self.done = true;
        self.take_tool_calls()
    }

    fn take_tool_calls(&mut self) -> Vec<Delta> {
        std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|acc| Delta::ToolCall(acc.into_request(&self.provider)))
            .collect()
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_request(self, provider: &str) -> ToolCallRequest {
        match parse_arguments(&self.arguments) {
            Ok(arguments) => ToolCallRequest::new(self.id, self.name, arguments),
            Err(reason) => {
                warn!(
                    provider,
                    tool = %self.name,
                    call_id = %self.id,
                    %reason,
                    "Tool call arguments are not a JSON object"
                );
                ToolCallRequest::malformed(self.id, self.name, self.arguments)
            }
        }
    }
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected an object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[allow(dead_code)]
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta: arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u32>,
}
