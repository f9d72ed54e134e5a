//! The agent loop implementation.
//!
//! One run drives the state machine
//! `Idle → TurnActive → AwaitingModel → DispatchingTools → TurnActive …`
//! until it reaches a terminal state. Every run publishes `AgentEnd`,
//! whichever way it ends.

use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use taskloom_core::agent::{LoopConfig, LoopState, RunResult, TerminalState};
use taskloom_core::content::{ContentBlock, ToolCallRequest};
use taskloom_core::error::{Error, ProviderError};
use taskloom_core::event::Event;
use taskloom_core::extension::{ExtensionBus, ExtensionContext, Notifier, TracingNotifier};
use taskloom_core::message::{Message, Session, SessionId, Usage};
use taskloom_core::provider::{Delta, ModelProvider, ModelRequest, ToolDefinition};
use taskloom_core::store::SessionStore;
use taskloom_core::tool::ToolRegistry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::ToolDispatcher;
use crate::permission::PermissionRuleset;
use crate::stream_event::AgentStreamEvent;

/// The agent loop: calls the model, dispatches tools, repeats.
pub struct AgentLoop {
    /// The model to call each turn
    model: Arc<dyn ModelProvider>,

    /// Tool registry, fixed for the loop's lifetime
    tools: Arc<ToolRegistry>,

    /// Frozen extension handlers
    extensions: Arc<ExtensionBus>,

    config: LoopConfig,

    /// Optional persistence sink
    store: Option<Arc<dyn SessionStore>>,

    /// Tool-call gate
    permissions: PermissionRuleset,

    /// Where extension notifications go
    notifier: Arc<dyn Notifier>,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        extensions: Arc<ExtensionBus>,
        config: LoopConfig,
    ) -> Self {
        Self {
            model,
            tools,
            extensions,
            config,
            store: None,
            permissions: PermissionRuleset::default(),
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Persist every appended message to this store.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Gate tool calls with these rules.
    pub fn with_permissions(mut self, permissions: PermissionRuleset) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.store.as_ref()
    }

    pub fn extensions(&self) -> &ExtensionBus {
        &self.extensions
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Tool definitions sent to the model, minus tools the gate denies outright.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .definitions()
            .into_iter()
            .filter(|d| self.permissions.is_tool_allowed(&d.name))
            .collect()
    }

    /// An extension context over `session`.
    pub fn extension_context<'a>(&'a self, session: &'a Session) -> ExtensionContext<'a> {
        ExtensionContext::new(session.messages(), &self.config.working_dir, self.notifier.as_ref())
    }

    /// Publish an event outside a run (session lifecycle).
    pub async fn publish(&self, event: Event, session: &Session) {
        self.scope(None).publish(event, session.messages()).await;
    }

    /// Run one prompt to a terminal state.
    ///
    /// Returns `Err` only when the model fails; turn-limit and cancellation
    /// outcomes come back as `Ok` with best-effort partial text.
    pub async fn run(&self, session: &mut Session, prompt: &str, cancel: &CancellationToken) -> Result<RunResult, Error> {
        self.drive(session, prompt, cancel, None).await
    }

    /// Like [`run`](Self::run), forwarding stream events as they happen.
    pub async fn run_stream(
        &self,
        session: &mut Session,
        prompt: &str,
        cancel: &CancellationToken,
        events: mpsc::Sender<AgentStreamEvent>,
    ) -> Result<RunResult, Error> {
        self.drive(session, prompt, cancel, Some(&events)).await
    }

    fn scope<'a>(&'a self, events: Option<&'a mpsc::Sender<AgentStreamEvent>>) -> RunScope<'a> {
        RunScope {
            bus: &self.extensions,
            notifier: self.notifier.as_ref(),
            store: self.store.as_deref(),
            working_dir: &self.config.working_dir,
            events,
        }
    }

    fn build_request(&self, session: &Session, tools: &[ToolDefinition]) -> ModelRequest {
        ModelRequest::new(self.config.model.clone(), session.messages().to_vec())
            .with_system_prompt(self.config.system_prompt.clone())
            .with_tools(tools.to_vec())
            .with_max_tokens(self.config.max_tokens)
    }

    async fn drive(
        &self,
        session: &mut Session,
        prompt: &str,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<AgentStreamEvent>>,
    ) -> Result<RunResult, Error> {
        let scope = self.scope(events);
        let mut state = LoopState::Idle;

        info!(
            session_id = %session.id,
            model = %self.config.model,
            provider = self.model.name(),
            "Agent run started"
        );

        // ── Prologue ──
        scope
            .publish(Event::UserInput { text: prompt.to_string() }, session.messages())
            .await;
        scope.record(session, Message::user(prompt)).await;
        scope
            .publish(Event::AgentStart { prompt: prompt.to_string() }, session.messages())
            .await;

        let definitions = self.tool_definitions();
        let dispatcher = ToolDispatcher::new(&self.tools, &self.permissions, self.config.max_tool_calls_per_turn);
        let mut progress = Progress::default();

        let ended: Result<TerminalState, ProviderError> = loop {
            transition(&mut state, LoopState::TurnActive, &session.id);
            if cancel.is_cancelled() {
                break Ok(TerminalState::Aborted);
            }

            let index = progress.turns;
            scope.publish(Event::TurnStart { index }, session.messages()).await;
            scope.send(AgentStreamEvent::TurnStart { index }).await;

            // ── Model call ──
            transition(&mut state, LoopState::AwaitingModel, &session.id);
            let request = self.build_request(session, &definitions);
            progress.turns += 1;
            debug!(session_id = %session.id, turn = index, messages = session.len(), "Calling model");

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                opened = self.model.stream(request) => Some(opened),
            };
            let mut stream = match opened {
                None => break Ok(TerminalState::Aborted),
                Some(Ok(stream)) => stream,
                Some(Err(e)) => break Err(e),
            };

            let mut turn = TurnBuffer::default();
            let consumed = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break StreamEnd::Cancelled,
                    item = stream.next() => match item {
                        None => break StreamEnd::Finished,
                        Some(Ok(delta)) => turn.apply(delta, &scope).await,
                        Some(Err(e)) => break StreamEnd::Failed(e),
                    },
                }
            };
            match consumed {
                StreamEnd::Finished => {}
                StreamEnd::Cancelled => {
                    progress.push_text(turn.text);
                    break Ok(TerminalState::Aborted);
                }
                StreamEnd::Failed(e) => {
                    progress.push_text(turn.text);
                    break Err(e);
                }
            }

            // ── Assistant message ──
            let message = turn.into_message();
            let text = message.text();
            let calls: Vec<ToolCallRequest> = message.tool_calls().cloned().collect();
            if let Some(usage) = &message.usage {
                progress.usage.add(usage);
            }
            scope.record(session, message).await;
            progress.push_text(text.clone());

            if calls.is_empty() {
                scope.publish(Event::TurnEnd { index }, session.messages()).await;
                progress.answer = Some(text);
                break Ok(TerminalState::Completed);
            }

            // ── Tools ──
            transition(&mut state, LoopState::DispatchingTools, &session.id);
            let dispatched = dispatcher.dispatch(calls, session, &scope, cancel).await;
            progress.executed += dispatched.executed;
            progress.skipped += dispatched.skipped;
            scope.publish(Event::TurnEnd { index }, session.messages()).await;

            if dispatched.was_cancelled() || cancel.is_cancelled() {
                break Ok(TerminalState::Aborted);
            }
            if progress.turns >= self.config.max_turns {
                warn!(
                    session_id = %session.id,
                    max_turns = self.config.max_turns,
                    "Max turns reached, stopping"
                );
                break Ok(TerminalState::MaxTurnsExceeded);
            }
        };

        let outcome = match &ended {
            Ok(outcome) => *outcome,
            Err(_) => TerminalState::ModelError,
        };
        transition(&mut state, LoopState::Terminal(outcome), &session.id);

        let text = match (outcome, progress.answer.take()) {
            (TerminalState::Completed, Some(answer)) => answer,
            _ => progress.partial_text(),
        };

        scope
            .publish(
                Event::AgentEnd {
                    outcome,
                    text: text.clone(),
                    turns: progress.turns,
                },
                session.messages(),
            )
            .await;

        if let Err(e) = &ended {
            warn!(session_id = %session.id, error = %e, "Model call failed, run ended");
            scope.send(AgentStreamEvent::Error { message: e.to_string() }).await;
        }
        scope
            .send(AgentStreamEvent::Done {
                session_id: session.id.to_string(),
                outcome,
                usage: (progress.usage != Usage::default()).then_some(progress.usage),
                turns: progress.turns,
                tool_calls_made: progress.executed,
            })
            .await;

        info!(
            session_id = %session.id,
            outcome = %outcome,
            turns = progress.turns,
            tool_calls = progress.executed,
            "Agent run finished"
        );

        ended?;
        Ok(RunResult {
            outcome,
            text,
            turns: progress.turns,
            tool_calls_executed: progress.executed,
            tool_calls_skipped: progress.skipped,
        })
    }
}

fn transition(state: &mut LoopState, next: LoopState, session_id: &SessionId) {
    debug!(session_id = %session_id, from = ?state, to = ?next, "Loop state");
    *state = next;
}

// ── Run scope ────────────────────────────────────────────────────────────

/// Everything a run touches besides the session itself.
pub(crate) struct RunScope<'a> {
    pub bus: &'a ExtensionBus,
    pub notifier: &'a dyn Notifier,
    pub store: Option<&'a dyn SessionStore>,
    pub working_dir: &'a Path,
    pub events: Option<&'a mpsc::Sender<AgentStreamEvent>>,
}

impl RunScope<'_> {
    /// Publish on the extension bus. Handler failures are logged by the bus.
    pub async fn publish(&self, event: Event, messages: &[Message]) {
        let ctx = ExtensionContext::new(messages, self.working_dir, self.notifier);
        let report = self.bus.publish(&event, &ctx).await;
        if report.failed > 0 {
            debug!(event = %event.kind(), failed = report.failed, "Some handlers failed");
        }
    }

    /// Forward a stream event, if anyone is listening.
    pub async fn send(&self, event: AgentStreamEvent) {
        if let Some(tx) = self.events {
            // A dropped receiver just means nobody is watching anymore
            let _ = tx.send(event).await;
        }
    }

    /// Persist, then append to the session. Persistence is best-effort.
    pub async fn record(&self, session: &mut Session, message: Message) {
        if let Some(store) = self.store
            && let Err(e) = store.append(&session.id, &message).await
        {
            warn!(session_id = %session.id, store = store.name(), error = %e, "Failed to persist message");
        }
        session.push(message);
    }
}

// ── Per-run bookkeeping ──────────────────────────────────────────────────

enum StreamEnd {
    Finished,
    Cancelled,
    Failed(ProviderError),
}

#[derive(Default)]
struct Progress {
    turns: u32,
    executed: usize,
    skipped: usize,
    usage: Usage,
    texts: Vec<String>,
    answer: Option<String>,
}

impl Progress {
    fn push_text(&mut self, text: String) {
        if !text.is_empty() {
            self.texts.push(text);
        }
    }

    fn partial_text(&self) -> String {
        self.texts.join("\n")
    }
}

/// One assistant message being assembled from deltas.
#[derive(Default)]
struct TurnBuffer {
    text: String,
    calls: Vec<ToolCallRequest>,
    usage: Option<Usage>,
}

impl TurnBuffer {
    async fn apply(&mut self, delta: Delta, scope: &RunScope<'_>) {
        match delta {
            Delta::Text(fragment) => {
                self.text.push_str(&fragment);
                scope.send(AgentStreamEvent::Chunk { content: fragment }).await;
            }
            Delta::ToolCall(call) => self.calls.push(call),
            Delta::Usage(usage) => self.usage.get_or_insert_with(Usage::default).add(&usage),
        }
    }

    fn into_message(self) -> Message {
        let mut blocks = Vec::with_capacity(self.calls.len() + 1);
        if !self.text.is_empty() || self.calls.is_empty() {
            blocks.push(ContentBlock::Text(self.text));
        }
        blocks.extend(self.calls.into_iter().map(ContentBlock::ToolCall));
        let mut message = Message::assistant_blocks(blocks);
        message.usage = self.usage;
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use taskloom_config::PermissionAction;
    use taskloom_core::event::EventKind;
    use taskloom_core::extension::handler_fn;
    use taskloom_core::message::{Role, validate_history};
    use taskloom_core::ExtensionError;
    use taskloom_providers::scripted::{ScriptedProvider, ScriptedTurn, tool_call};
    use taskloom_store::InMemoryStore;

    use crate::test_helpers::{CancellingModel, CancellingTool, EchoTool, SlowTool, recording_bus};

    fn config(dir: &Path) -> LoopConfig {
        LoopConfig::new("mock-model", dir)
    }

    fn agent(model: Arc<dyn ModelProvider>, tools: ToolRegistry, bus: ExtensionBus, config: LoopConfig) -> AgentLoop {
        AgentLoop::new(model, Arc::new(tools), Arc::new(bus), config)
    }

    #[tokio::test]
    async fn simple_text_response() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::fragments(&["Hello! ", "How can I help?"]).with_usage(10, 5),
        ]));
        let (bus, log) = recording_bus();
        let agent = agent(provider.clone(), ToolRegistry::new(), bus, config(Path::new(".")));

        let mut session = Session::new(".", "mock-model");
        let result = agent.run(&mut session, "Hello!", &CancellationToken::new()).await.unwrap();

        assert_eq!(result.outcome, TerminalState::Completed);
        assert_eq!(result.text, "Hello! How can I help?");
        assert_eq!(result.turns, 1);
        // User + Assistant
        assert_eq!(session.len(), 2);
        assert_eq!(session.messages()[1].usage.unwrap().total(), 15);

        assert_eq!(
            log.kinds(),
            vec![
                EventKind::UserInput,
                EventKind::AgentStart,
                EventKind::TurnStart,
                EventKind::TurnEnd,
                EventKind::AgentEnd,
            ]
        );
    }

    #[tokio::test]
    async fn request_carries_history_tools_and_settings() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text("ok")]));
        let tools = ToolRegistry::new().with(Box::new(EchoTool));
        let config = config(Path::new("."))
            .with_system_prompt("Be brief.")
            .with_max_tokens(512);
        let agent = agent(provider.clone(), tools, ExtensionBus::new(), config);

        let mut session = Session::new(".", "mock-model");
        session.push(Message::user("earlier"));
        session.push(Message::assistant("reply"));
        agent.run(&mut session, "now", &CancellationToken::new()).await.unwrap();

        let request = &provider.requests()[0];
        assert_eq!(request.model, "mock-model");
        assert_eq!(request.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(request.max_tokens, 512);
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.tools[0].name, "echo");
    }

    #[tokio::test]
    async fn tool_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls("Let me echo.", vec![tool_call("c1", "echo", json!({"text": "pong"}))]),
            ScriptedTurn::text("Done: pong"),
        ]));
        let (bus, log) = recording_bus();
        let tools = ToolRegistry::new().with(Box::new(EchoTool));
        let agent = agent(provider.clone(), tools, bus, config(Path::new(".")));

        let mut session = Session::new(".", "mock-model");
        let result = agent.run(&mut session, "ping", &CancellationToken::new()).await.unwrap();

        assert_eq!(result.outcome, TerminalState::Completed);
        assert_eq!(result.text, "Done: pong");
        assert_eq!(result.turns, 2);
        assert_eq!(result.tool_calls_executed, 1);

        let roles: Vec<Role> = session.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        let tool_result = session.messages()[2].tool_results().next().unwrap();
        assert_eq!(tool_result.call_id, "c1");
        assert_eq!(tool_result.content, "pong");

        // The second request saw the tool result
        assert_eq!(provider.requests()[1].messages.len(), 3);

        assert_eq!(
            log.kinds(),
            vec![
                EventKind::UserInput,
                EventKind::AgentStart,
                EventKind::TurnStart,
                EventKind::ToolCall,
                EventKind::ToolResult,
                EventKind::TurnEnd,
                EventKind::TurnStart,
                EventKind::TurnEnd,
                EventKind::AgentEnd,
            ]
        );
    }

    #[tokio::test]
    async fn results_follow_request_order_regardless_of_latency() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls(
                "",
                vec![
                    tool_call("a", "slow_a", json!({})),
                    tool_call("b", "slow_b", json!({})),
                    tool_call("c", "slow_c", json!({})),
                ],
            ),
            ScriptedTurn::text("finished"),
        ]));
        let tools = ToolRegistry::new()
            .with(Box::new(SlowTool::new("slow_a", Duration::from_millis(60))))
            .with(Box::new(SlowTool::new("slow_b", Duration::from_millis(1))))
            .with(Box::new(SlowTool::new("slow_c", Duration::from_millis(30))));
        let agent = agent(provider, tools, ExtensionBus::new(), config(Path::new(".")));

        let mut session = Session::new(".", "mock-model");
        agent.run(&mut session, "go", &CancellationToken::new()).await.unwrap();

        let ids: Vec<String> = session
            .messages()
            .iter()
            .flat_map(|m| m.tool_results())
            .map(|r| r.call_id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn turn_limit_stops_tool_calling_model() {
        let provider = Arc::new(ScriptedProvider::repeating(vec![ScriptedTurn::tool_calls(
            "working",
            vec![tool_call("c", "echo", json!({"text": "again"}))],
        )]));
        let tools = ToolRegistry::new().with(Box::new(EchoTool));
        let (bus, log) = recording_bus();
        let agent = agent(provider.clone(), tools, bus, config(Path::new(".")).with_max_turns(3));

        let mut session = Session::new(".", "mock-model");
        let result = agent.run(&mut session, "loop", &CancellationToken::new()).await.unwrap();

        assert_eq!(result.outcome, TerminalState::MaxTurnsExceeded);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(result.turns, 3);
        assert_eq!(result.text, "working\nworking\nworking");
        match log.events().last().unwrap() {
            Event::AgentEnd { outcome, turns, .. } => {
                assert_eq!(*outcome, TerminalState::MaxTurnsExceeded);
                assert_eq!(*turns, 3);
            }
            other => panic!("expected AgentEnd, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_call_limit_skips_excess_requests() {
        let calls = (0..5)
            .map(|i| tool_call(&format!("c{i}"), "echo", json!({"text": i.to_string()})))
            .collect();
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls("", calls),
            ScriptedTurn::text("ok"),
        ]));
        let tools = ToolRegistry::new().with(Box::new(EchoTool));
        let (bus, log) = recording_bus();
        let agent = agent(
            provider,
            tools,
            bus,
            config(Path::new(".")).with_max_tool_calls_per_turn(2),
        );

        let mut session = Session::new(".", "mock-model");
        let result = agent.run(&mut session, "many", &CancellationToken::new()).await.unwrap();

        assert_eq!(result.outcome, TerminalState::Completed);
        assert_eq!(result.tool_calls_executed, 2);
        assert_eq!(result.tool_calls_skipped, 3);

        let results: Vec<_> = session.messages().iter().flat_map(|m| m.tool_results()).collect();
        assert_eq!(results.len(), 5);
        assert!(results[..2].iter().all(|r| !r.is_error));
        assert!(results[2..].iter().all(|r| r.is_error && r.content.starts_with("Skipped")));
        assert_eq!(log.count(EventKind::ToolCall), 2);
        assert_eq!(log.count(EventKind::ToolResult), 2);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_tool_result() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls("", vec![tool_call("c1", "echo", json!({"text": "x"}))]),
            ScriptedTurn::text("ok"),
        ]));
        let (mut bus, log) = recording_bus();
        bus.register(
            EventKind::ToolCall,
            handler_fn("broken", |_, _| Err(ExtensionError::failed("broken", "boom"))),
        );
        bus.register(
            EventKind::ToolCall,
            handler_fn("panicky", |_, _| panic!("handler exploded")),
        );
        let tools = ToolRegistry::new().with(Box::new(EchoTool));
        let agent = agent(provider, tools, bus, config(Path::new(".")));

        let mut session = Session::new(".", "mock-model");
        let result = agent.run(&mut session, "go", &CancellationToken::new()).await.unwrap();

        assert_eq!(result.outcome, TerminalState::Completed);
        assert_eq!(log.count(EventKind::ToolResult), 1);
        let tool_result = session.messages()[2].tool_results().next().unwrap();
        assert!(!tool_result.is_error);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_and_loop_continues() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls("", vec![tool_call("c1", "frobnicate", json!({}))]),
            ScriptedTurn::text("sorry"),
        ]));
        let agent = agent(provider.clone(), ToolRegistry::new(), ExtensionBus::new(), config(Path::new(".")));

        let mut session = Session::new(".", "mock-model");
        let result = agent.run(&mut session, "go", &CancellationToken::new()).await.unwrap();

        assert_eq!(result.outcome, TerminalState::Completed);
        assert_eq!(provider.call_count(), 2);
        let tool_result = session.messages()[2].tool_results().next().unwrap();
        assert!(tool_result.is_error);
        assert!(tool_result.content.contains("frobnicate"));
    }

    #[tokio::test]
    async fn cancellation_while_awaiting_delta() {
        let cancel = CancellationToken::new();
        let model = Arc::new(CancellingModel::new(cancel.clone(), "thinking"));
        let (bus, log) = recording_bus();
        let tools = ToolRegistry::new().with(Box::new(EchoTool));
        let agent = agent(model.clone(), tools, bus, config(Path::new(".")));

        let mut session = Session::new(".", "mock-model");
        session.push(Message::user("earlier"));
        session.push(Message::assistant("kept"));

        let result = tokio::time::timeout(Duration::from_secs(5), agent.run(&mut session, "go", &cancel))
            .await
            .expect("run should observe cancellation")
            .unwrap();

        assert_eq!(result.outcome, TerminalState::Aborted);
        assert_eq!(result.text, "thinking");
        assert_eq!(model.call_count(), 1);
        // Earlier messages plus the new user prompt; no partial assistant message
        assert_eq!(session.len(), 3);
        assert_eq!(session.messages()[1].text(), "kept");
        assert_eq!(log.count(EventKind::ToolCall), 0);
        assert!(matches!(
            log.events().last(),
            Some(Event::AgentEnd {
                outcome: TerminalState::Aborted,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn cancellation_during_dispatch_answers_remaining_calls() {
        let cancel = CancellationToken::new();
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls(
                "",
                vec![
                    tool_call("a", "halt", json!({})),
                    tool_call("b", "halt", json!({})),
                    tool_call("c", "halt", json!({})),
                ],
            ),
            ScriptedTurn::text("never reached"),
        ]));
        let tools = ToolRegistry::new().with(Box::new(CancellingTool::new(cancel.clone())));
        let (bus, log) = recording_bus();
        let agent = agent(provider.clone(), tools, bus, config(Path::new(".")));

        let mut session = Session::new(".", "mock-model");
        let result = agent.run(&mut session, "go", &cancel).await.unwrap();

        assert_eq!(result.outcome, TerminalState::Aborted);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(result.tool_calls_executed, 1);

        let results: Vec<_> = session
            .messages()
            .iter()
            .flat_map(|m| m.tool_results())
            .cloned()
            .collect();
        let ids: Vec<_> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!results[0].is_error);
        assert_eq!(results[0].content, "halted");
        for skipped in &results[1..] {
            assert!(skipped.is_error);
            assert_eq!(skipped.content, "Cancelled before execution");
        }

        // Every request still has its result
        assert!(validate_history(session.messages()).is_ok());
        assert_eq!(log.count(EventKind::ToolCall), 1);
        assert_eq!(log.count(EventKind::TurnEnd), 1);
        assert_eq!(log.count(EventKind::AgentEnd), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_model_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text("never")]));
        let agent = agent(provider.clone(), ToolRegistry::new(), ExtensionBus::new(), config(Path::new(".")));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut session = Session::new(".", "mock-model");
        let result = agent.run(&mut session, "go", &cancel).await.unwrap();
        assert_eq!(result.outcome, TerminalState::Aborted);
        assert_eq!(provider.call_count(), 0);
        assert_eq!(result.turns, 0);
    }

    #[tokio::test]
    async fn denied_tool_is_not_executed() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls("", vec![tool_call("c1", "echo", json!({"text": "secret"}))]),
            ScriptedTurn::text("ok"),
        ]));
        let tools = ToolRegistry::new().with(Box::new(EchoTool));
        let (bus, log) = recording_bus();
        let permissions = PermissionRuleset::new()
            .with("*", "*", PermissionAction::Allow)
            .with("echo", "*", PermissionAction::Deny);
        let agent = agent(provider.clone(), tools, bus, config(dir.path())).with_permissions(permissions);

        let mut session = Session::new(dir.path(), "mock-model");
        agent.run(&mut session, "go", &CancellationToken::new()).await.unwrap();

        let tool_result = session.messages()[2].tool_results().next().unwrap();
        assert!(tool_result.is_error);
        assert!(tool_result.content.contains("Permission denied"));
        // Denied tools are hidden from the model too
        assert!(provider.requests()[0].tools.is_empty());
        // The ToolCall event still fires
        assert_eq!(log.count(EventKind::ToolCall), 1);
    }

    #[tokio::test]
    async fn model_error_ends_run_with_agent_end() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls("first", vec![tool_call("c1", "echo", json!({"text": "x"}))]),
            ScriptedTurn::Fail(ProviderError::Network("connection reset".into())),
        ]));
        let tools = ToolRegistry::new().with(Box::new(EchoTool));
        let (bus, log) = recording_bus();
        let agent = agent(provider, tools, bus, config(Path::new(".")));

        let mut session = Session::new(".", "mock-model");
        let err = agent.run(&mut session, "go", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::Network(_))));

        match log.events().last().unwrap() {
            Event::AgentEnd { outcome, text, .. } => {
                assert_eq!(*outcome, TerminalState::ModelError);
                assert_eq!(text, "first");
            }
            other => panic!("expected AgentEnd, got {other:?}"),
        }
        // User, assistant with call, tool result survive
        assert_eq!(session.len(), 3);
    }

    #[tokio::test]
    async fn mid_stream_error_is_a_model_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::Stream(vec![
            Ok(Delta::Text("partial".into())),
            Err(ProviderError::Network("dropped".into())),
        ])]));
        let agent = agent(provider, ToolRegistry::new(), ExtensionBus::new(), config(Path::new(".")));

        let mut session = Session::new(".", "mock-model");
        let err = agent.run(&mut session, "go", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(session.len(), 1);
    }

    #[tokio::test]
    async fn messages_are_persisted() {
        let store = InMemoryStore::new();
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls("", vec![tool_call("c1", "echo", json!({"text": "x"}))]),
            ScriptedTurn::text("ok"),
        ]));
        let tools = ToolRegistry::new().with(Box::new(EchoTool));
        let agent = agent(provider, tools, ExtensionBus::new(), config(Path::new(".")))
            .with_store(Arc::new(store.clone()));

        let mut session = Session::new(".", "mock-model");
        agent.run(&mut session, "go", &CancellationToken::new()).await.unwrap();

        let persisted = store.snapshot(&session.id).await.unwrap();
        assert_eq!(persisted, session.messages());
    }

    #[tokio::test]
    async fn stream_events_are_forwarded() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls("", vec![tool_call("c1", "echo", json!({"text": "x"}))]),
            ScriptedTurn::fragments(&["a", "b"]),
        ]));
        let tools = ToolRegistry::new().with(Box::new(EchoTool));
        let agent = agent(provider, tools, ExtensionBus::new(), config(Path::new(".")));

        let (tx, mut rx) = mpsc::channel(64);
        let mut session = Session::new(".", "mock-model");
        agent
            .run_stream(&mut session, "go", &CancellationToken::new(), tx)
            .await
            .unwrap();

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.event_type());
        }
        assert_eq!(
            names,
            vec!["turn_start", "tool_call", "tool_result", "turn_start", "chunk", "chunk", "done"]
        );
    }

    #[tokio::test]
    async fn handlers_see_session_messages() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text("hi")]));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut bus = ExtensionBus::new();
        let sink = seen.clone();
        bus.register(
            EventKind::AgentEnd,
            handler_fn("count", move |_, ctx| {
                sink.lock().unwrap().push(ctx.messages.len());
                Ok(())
            }),
        );
        let agent = agent(provider, ToolRegistry::new(), bus, config(Path::new(".")));

        let mut session = Session::new(".", "mock-model");
        agent.run(&mut session, "hello", &CancellationToken::new()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }
}
