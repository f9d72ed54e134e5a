//! Scripted provider: replays canned responses.
//!
//! Each call to `stream` takes the next [`ScriptedTurn`] from the script.
//! Used by tests and offline demos; never talks to the network.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde_json::{Map, Value};
use taskloom_core::content::ToolCallRequest;
use taskloom_core::error::ProviderError;
use taskloom_core::message::Usage;
use taskloom_core::provider::{Delta, DeltaStream, ModelProvider, ModelRequest};

/// One scripted model response.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Yield these items in order, then end the stream
    Stream(Vec<Result<Delta, ProviderError>>),
    /// Fail before any delta is produced
    Fail(ProviderError),
}

impl ScriptedTurn {
    /// A plain text answer.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Stream(vec![Ok(Delta::Text(text.into()))])
    }

    /// A text answer split into several fragments.
    pub fn fragments(parts: &[&str]) -> Self {
        Self::Stream(parts.iter().map(|p| Ok(Delta::Text((*p).to_string()))).collect())
    }

    /// A response requesting the given tool calls, with optional lead-in text.
    pub fn tool_calls(text: &str, calls: Vec<ToolCallRequest>) -> Self {
        let mut items = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            items.push(Ok(Delta::Text(text.to_string())));
        }
        items.extend(calls.into_iter().map(|c| Ok(Delta::ToolCall(c))));
        Self::Stream(items)
    }

    /// Append a usage report to a streamed turn.
    pub fn with_usage(self, input_tokens: u32, output_tokens: u32) -> Self {
        match self {
            Self::Stream(mut items) => {
                items.push(Ok(Delta::Usage(Usage {
                    input_tokens,
                    output_tokens,
                    ..Usage::default()
                })));
                Self::Stream(items)
            }
            fail => fail,
        }
    }
}

/// Build a tool-call request from a JSON object literal.
pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    let arguments = match arguments {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ToolCallRequest::new(id, name, arguments)
}

/// A provider that replays a fixed script.
pub struct ScriptedProvider {
    turns: Vec<ScriptedTurn>,
    repeat_last: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns,
            repeat_last: false,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replay the final turn forever once the script runs out.
    pub fn repeating(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(turns)
        }
    }

    /// Number of `stream` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_turn(&self, index: usize) -> Option<ScriptedTurn> {
        match self.turns.get(index) {
            Some(turn) => Some(turn.clone()),
            None if self.repeat_last => self.turns.last().cloned(),
            None => None,
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ModelRequest) -> Result<DeltaStream, ProviderError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        match self.next_turn(index) {
            Some(ScriptedTurn::Stream(items)) => Ok(stream::iter(items).boxed()),
            Some(ScriptedTurn::Fail(err)) => Err(err),
            None => Err(ProviderError::ApiError {
                status_code: 500,
                message: format!("script exhausted after {} responses", self.turns.len()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskloom_core::message::Message;

    fn request() -> ModelRequest {
        ModelRequest::new("mock-model", vec![Message::user("hi")])
    }

    #[tokio::test]
    async fn replays_turns_in_order() {
        let provider = ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls("", vec![tool_call("c1", "read", json!({"path": "a.txt"}))]),
            ScriptedTurn::fragments(&["Hel", "lo"]).with_usage(3, 2),
        ]);

        let first: Vec<_> = provider.stream(request()).await.unwrap().collect().await;
        assert_eq!(first.len(), 1);
        assert!(matches!(first[0], Ok(Delta::ToolCall(ref c)) if c.arguments["path"] == "a.txt"));

        let second: Vec<_> = provider.stream(request()).await.unwrap().collect().await;
        assert_eq!(second.len(), 3);
        assert!(matches!(second[2], Ok(Delta::Usage(u)) if u.total() == 5));

        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_is_an_error() {
        let provider = ScriptedProvider::new(vec![]);
        assert!(provider.stream(request()).await.is_err());
    }

    #[tokio::test]
    async fn repeating_replays_last_turn() {
        let provider = ScriptedProvider::repeating(vec![ScriptedTurn::text("again")]);
        for _ in 0..3 {
            let items: Vec<_> = provider.stream(request()).await.unwrap().collect().await;
            assert!(matches!(items[0], Ok(Delta::Text(ref t)) if t == "again"));
        }
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn fail_turn_returns_error() {
        let provider = ScriptedProvider::new(vec![ScriptedTurn::Fail(ProviderError::Network("down".into()))]);
        let err = provider.stream(request()).await.err().unwrap();
        assert!(matches!(err, ProviderError::Network(_)));
    }
}
