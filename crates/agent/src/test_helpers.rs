//! Shared fixtures for agent tests: tools with known behavior, a recording
//! extension bus, and a tool and a model that cancel their own run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, future, stream};
use serde_json::{Map, Value};
use taskloom_core::error::{ProviderError, ToolError};
use taskloom_core::event::{Event, EventKind};
use taskloom_core::extension::{ExtensionBus, handler_fn};
use taskloom_core::provider::{Delta, DeltaStream, ModelProvider, ModelRequest};
use taskloom_core::tool::{Tool, ToolContext};
use tokio_util::sync::CancellationToken;

// ── Event recording ──────────────────────────────────────────────────────

/// Every event a bus published, in order.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(Event::kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }
}

/// A bus with one recording handler subscribed to every event kind.
pub fn recording_bus() -> (ExtensionBus, EventLog) {
    let log = EventLog::default();
    let mut bus = ExtensionBus::new();
    for kind in EventKind::ALL {
        let sink = log.clone();
        bus.register(
            kind,
            handler_fn("recorder", move |event, _ctx| {
                sink.push(event.clone());
                Ok(())
            }),
        );
    }
    (bus, log)
}

// ── Tools ────────────────────────────────────────────────────────────────

/// Returns its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the input"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>, _ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        Ok(arguments
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

/// Sleeps, then returns its own name.
pub struct SlowTool {
    name: String,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Takes its time"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Map<String, Value>, _ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.name.clone())
    }
}

/// Always returns an execution error.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Map<String, Value>, _ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "fail".into(),
            reason: "always fails".into(),
        })
    }
}

/// Panics when executed.
pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "panic"
    }

    fn description(&self) -> &str {
        "Panics"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Map<String, Value>, _ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        panic!("tool blew up")
    }
}

/// Cancels the given token, then succeeds.
pub struct CancellingTool {
    token: CancellationToken,
}

impl CancellingTool {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl Tool for CancellingTool {
    fn name(&self) -> &str {
        "halt"
    }

    fn description(&self) -> &str {
        "Cancels the run it is part of"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Map<String, Value>, _ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        self.token.cancel();
        Ok("halted".into())
    }
}

// ── Models ───────────────────────────────────────────────────────────────

/// Streams one text delta, then cancels the given token and never yields again.
pub struct CancellingModel {
    token: CancellationToken,
    text: String,
    calls: AtomicUsize,
}

impl CancellingModel {
    pub fn new(token: CancellationToken, text: &str) -> Self {
        Self {
            token,
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for CancellingModel {
    fn name(&self) -> &str {
        "cancelling"
    }

    async fn stream(&self, _request: ModelRequest) -> Result<DeltaStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let token = self.token.clone();
        let first = stream::once(future::ready(Ok(Delta::Text(self.text.clone()))));
        let stall = stream::once(async move {
            token.cancel();
            future::pending::<Result<Delta, ProviderError>>().await
        });
        Ok(first.chain(stall).boxed())
    }
}
