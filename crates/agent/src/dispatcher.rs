//! Tool dispatcher: executes one turn's tool calls in request order.
//!
//! Calls run sequentially. Every call yields exactly one tool-role message,
//! whether the tool succeeded, failed, panicked, was denied, was unknown, or
//! was never run because the per-turn limit or a cancellation cut it off.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use taskloom_core::content::{ToolCallRequest, ToolCallResult};
use taskloom_core::error::ToolError;
use taskloom_core::event::Event;
use taskloom_core::extension::panic_message;
use taskloom_core::message::{Message, Session};
use taskloom_core::tool::{ToolContext, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::loop_runner::RunScope;
use crate::permission::PermissionRuleset;
use crate::stream_event::AgentStreamEvent;

/// What happened to one turn's tool calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Calls handed to a tool (or rejected by the gate / registry)
    pub executed: usize,
    /// Calls over the per-turn limit
    pub skipped: usize,
    /// Calls left unrun because the run was cancelled
    pub cancelled: usize,
}

impl DispatchOutcome {
    pub fn was_cancelled(&self) -> bool {
        self.cancelled > 0
    }
}

/// Executes tool-call requests against a registry.
pub struct ToolDispatcher<'a> {
    tools: &'a ToolRegistry,
    permissions: &'a PermissionRuleset,
    max_calls: usize,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(tools: &'a ToolRegistry, permissions: &'a PermissionRuleset, max_calls: usize) -> Self {
        Self {
            tools,
            permissions,
            max_calls,
        }
    }

    /// Run one call to completion. Never fails: every failure becomes an
    /// `is_error` result. Calls with unparseable arguments are answered
    /// without touching the tool.
    pub async fn invoke(&self, call: &ToolCallRequest, ctx: &ToolContext<'_>) -> ToolCallResult {
        if let Err(e) = self.permissions.check(&call.name, &call.arguments) {
            warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool call denied");
            return ToolCallResult::error(&call.id, &call.name, format!("Error: {e}"));
        }

        if let Some(raw) = &call.invalid_arguments {
            let e = ToolError::InvalidArguments(format!(
                "tool '{}' expects a JSON object, received: {raw}",
                call.name
            ));
            warn!(tool = %call.name, call_id = %call.id, "Tool call arguments did not parse, not executing");
            return ToolCallResult::error(&call.id, &call.name, format!("Error: {e}"));
        }

        let Some(tool) = self.tools.get(&call.name) else {
            let e = ToolError::NotFound(call.name.clone());
            warn!(tool = %call.name, call_id = %call.id, "Unknown tool requested");
            return ToolCallResult::error(&call.id, &call.name, format!("Error: {e}"));
        };

        debug!(tool = %call.name, call_id = %call.id, "Executing tool");
        let outcome = AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(output)) => ToolCallResult::success(&call.id, &call.name, output),
            Ok(Err(e)) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool execution failed");
                ToolCallResult::error(&call.id, &call.name, format!("Error: {e}"))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(tool = %call.name, call_id = %call.id, panic = %message, "Tool panicked");
                ToolCallResult::error(
                    &call.id,
                    &call.name,
                    format!("Error: tool '{}' panicked: {message}", call.name),
                )
            }
        }
    }

    /// Execute `calls` in order, appending one tool message per call.
    pub(crate) async fn dispatch(
        &self,
        calls: Vec<ToolCallRequest>,
        session: &mut Session,
        scope: &RunScope<'_>,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let split = calls.len().min(self.max_calls);
        let (runnable, over_limit) = calls.split_at(split);

        if !over_limit.is_empty() {
            warn!(
                requested = calls.len(),
                limit = self.max_calls,
                "Per-turn tool call limit exceeded, skipping the rest"
            );
        }

        for call in runnable {
            if cancel.is_cancelled() {
                outcome.cancelled += 1;
                let result = ToolCallResult::error(&call.id, &call.name, "Cancelled before execution");
                scope.record(session, Message::tool_result(result)).await;
                continue;
            }

            scope
                .publish(
                    Event::ToolCall {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                    session.messages(),
                )
                .await;
            scope
                .send(AgentStreamEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                })
                .await;

            let result = {
                let ctx = ToolContext::new(&call.id, scope.working_dir, session.messages());
                self.invoke(call, &ctx).await
            };
            outcome.executed += 1;

            scope
                .publish(
                    Event::ToolResult {
                        call_id: result.call_id.clone(),
                        name: result.name.clone(),
                        result: result.content.clone(),
                        is_error: result.is_error,
                    },
                    session.messages(),
                )
                .await;
            scope
                .send(AgentStreamEvent::ToolResult {
                    id: result.call_id.clone(),
                    name: result.name.clone(),
                    output: result.content.clone(),
                    is_error: result.is_error,
                })
                .await;

            scope.record(session, Message::tool_result(result)).await;
        }

        for call in over_limit {
            outcome.skipped += 1;
            let result = ToolCallResult::error(
                &call.id,
                &call.name,
                format!("Skipped: exceeded per-turn tool call limit ({})", self.max_calls),
            );
            scope.record(session, Message::tool_result(result)).await;
        }

        outcome
    }
}
