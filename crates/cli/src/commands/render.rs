//! Terminal rendering of stream events.
//!
//! Model text goes to stdout as it arrives; tool activity and errors go to
//! stderr so piping `taskloom run` captures only the answer.

use std::io::Write;

use serde_json::{Map, Value};
use taskloom_agent::AgentStreamEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Print events until the sender side is dropped.
pub fn spawn_printer(mut rx: mpsc::Receiver<AgentStreamEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        let mut mid_line = false;
        while let Some(event) = rx.recv().await {
            match event {
                AgentStreamEvent::Chunk { content } => {
                    print!("{content}");
                    let _ = stdout.flush();
                    mid_line = !content.ends_with('\n');
                }
                AgentStreamEvent::ToolCall { name, input, .. } => {
                    if mid_line {
                        println!();
                        mid_line = false;
                    }
                    eprintln!("  → {name} {}", summarize(&input));
                }
                AgentStreamEvent::ToolResult { name, is_error, output, .. } => {
                    if is_error {
                        eprintln!("  ✗ {name}: {}", first_line(&output));
                    } else {
                        eprintln!("  ✓ {name}");
                    }
                }
                AgentStreamEvent::Error { message } => eprintln!("  [error] {message}"),
                AgentStreamEvent::Done { .. } => {
                    if mid_line {
                        println!();
                        mid_line = false;
                    }
                }
                AgentStreamEvent::TurnStart { .. } => {}
            }
        }
    })
}

/// One-line rendering of tool arguments.
fn summarize(input: &Map<String, Value>) -> String {
    let text = Value::Object(input.clone()).to_string();
    if text.chars().count() > 80 {
        text.chars().take(77).collect::<String>() + "..."
    } else {
        text
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
