//! Extension bundled with the CLI: session slash-commands and a run-outcome
//! notice.

use async_trait::async_trait;
use taskloom_core::agent::TerminalState;
use taskloom_core::error::ExtensionError;
use taskloom_core::event::{Event, EventKind};
use taskloom_core::extension::{Extension, ExtensionApi, ExtensionCommand, ExtensionContext, NotifyLevel, handler_fn};
use taskloom_core::message::{Role, Usage};

pub struct BuiltinExtension;

impl Extension for BuiltinExtension {
    fn name(&self) -> &str {
        "builtin"
    }

    fn setup(&self, api: &mut ExtensionApi<'_>) {
        api.register_command(Box::new(StatsCommand));
        api.register_command(Box::new(HistoryCommand));
        api.on(
            EventKind::AgentEnd,
            handler_fn("run-outcome", |event, ctx| {
                if let Event::AgentEnd { outcome, turns, .. } = event
                    && *outcome != TerminalState::Completed
                {
                    ctx.notify(&format!("Run ended: {outcome} after {turns} turn(s)"), NotifyLevel::Warning);
                }
                Ok(())
            }),
        );
    }
}

/// `/stats`: message counts and token usage.
struct StatsCommand;

#[async_trait]
impl ExtensionCommand for StatsCommand {
    fn name(&self) -> &str {
        "stats"
    }

    fn description(&self) -> &str {
        "Show message counts and token usage for this session"
    }

    async fn execute(&self, _args: &str, ctx: &ExtensionContext<'_>) -> Result<String, ExtensionError> {
        let count = |role: Role| ctx.messages.iter().filter(|m| m.role == role).count();
        let mut usage = Usage::default();
        for u in ctx.messages.iter().filter_map(|m| m.usage.as_ref()) {
            usage.add(u);
        }
        Ok(format!(
            "messages: {} (user {}, assistant {}, tool {})\ntokens: {} in / {} out",
            ctx.messages.len(),
            count(Role::User),
            count(Role::Assistant),
            count(Role::Tool),
            usage.input_tokens,
            usage.output_tokens,
        ))
    }
}

/// `/history [n]`: the last `n` messages, one line each.
struct HistoryCommand;

#[async_trait]
impl ExtensionCommand for HistoryCommand {
    fn name(&self) -> &str {
        "history"
    }

    fn description(&self) -> &str {
        "Show the last N messages (default 10)"
    }

    async fn execute(&self, args: &str, ctx: &ExtensionContext<'_>) -> Result<String, ExtensionError> {
        let limit = match args.trim() {
            "" => 10,
            raw => raw.parse::<usize>().map_err(|_| ExtensionError::CommandFailed {
                command: "history".into(),
                reason: format!("'{raw}' is not a number"),
            })?,
        };

        let start = ctx.messages.len().saturating_sub(limit);
        let lines: Vec<String> = ctx.messages[start..]
            .iter()
            .map(|m| {
                let mut summary = m.text().replace('\n', " ");
                for call in m.tool_calls() {
                    summary.push_str(&format!(" [call {}]", call.name));
                }
                for result in m.tool_results() {
                    let status = if result.is_error { "error" } else { "ok" };
                    summary.push_str(&format!("[{} {status}]", result.name));
                }
                if summary.chars().count() > 100 {
                    summary = summary.chars().take(97).collect::<String>() + "...";
                }
                format!("{:>9}: {}", m.role.as_str(), summary.trim())
            })
            .collect();

        if lines.is_empty() {
            Ok("(no messages yet)".into())
        } else {
            Ok(lines.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use taskloom_core::content::ToolCallResult;
    use taskloom_core::extension::{ExtensionBus, TracingNotifier};
    use taskloom_core::message::Message;
    use taskloom_core::tool::ToolRegistry;

    fn bus() -> ExtensionBus {
        let mut bus = ExtensionBus::new();
        bus.load(&BuiltinExtension, &mut ToolRegistry::new());
        bus
    }

    #[tokio::test]
    async fn registers_commands_and_handler() {
        let bus = bus();
        let names: Vec<&str> = bus.commands().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["history", "stats"]);
        assert_eq!(bus.handler_count(EventKind::AgentEnd), 1);
        assert_eq!(bus.extensions(), ["builtin".to_string()]);
    }

    #[tokio::test]
    async fn stats_counts_roles() {
        let bus = bus();
        let mut answer = Message::assistant("hi");
        answer.usage = Some(Usage {
            input_tokens: 7,
            output_tokens: 3,
            ..Usage::default()
        });
        let messages = vec![Message::user("hello"), answer];
        let ctx = ExtensionContext::new(&messages, Path::new("."), &TracingNotifier);

        let out = bus.execute_command("stats", "", &ctx).await.unwrap();
        assert!(out.contains("messages: 2 (user 1, assistant 1, tool 0)"));
        assert!(out.contains("7 in / 3 out"));
    }

    #[tokio::test]
    async fn history_limits_and_validates() {
        let bus = bus();
        let messages = vec![
            Message::user("one"),
            Message::assistant("two"),
            Message::tool_result(ToolCallResult::error("c1", "bash", "boom")),
        ];
        let ctx = ExtensionContext::new(&messages, Path::new("."), &TracingNotifier);

        let out = bus.execute_command("history", "2", &ctx).await.unwrap();
        assert_eq!(out.lines().count(), 2);
        assert!(out.contains("[bash error]"));

        assert!(bus.execute_command("history", "lots", &ctx).await.is_err());
        assert!(matches!(
            bus.execute_command("nope", "", &ctx).await,
            Err(ExtensionError::CommandNotFound(_))
        ));
    }
}
