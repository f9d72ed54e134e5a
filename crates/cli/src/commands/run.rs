//! `taskloom run`: one prompt, streamed to stdout.

use std::path::Path;

use taskloom_core::agent::TerminalState;
use tokio::sync::mpsc;

use super::render::spawn_printer;
use super::runtime::{Interrupts, build_agent, load_config, open_session, open_store};

pub async fn run(config_path: Option<&Path>, message: &str, session_id: Option<String>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let agent = build_agent(&config, open_store(&config))?;
    let mut session = open_session(agent, session_id).await?;

    let interrupts = Interrupts::spawn("(finishing up)");
    let cancel = interrupts.arm();
    let (tx, rx) = mpsc::channel(256);
    let printer = spawn_printer(rx);

    let result = session.prompt_stream(message, &cancel, tx).await;
    interrupts.disarm();
    let _ = printer.await;
    session.close().await;

    let result = result?;
    if result.outcome != TerminalState::Completed {
        eprintln!("  [{}] after {} turn(s)", result.outcome, result.turns);
    }
    eprintln!("  session: {}", session.id());
    Ok(())
}
