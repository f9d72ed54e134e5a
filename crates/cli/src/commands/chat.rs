//! `taskloom chat`: interactive session.
//!
//! Lines starting with `/` go to extension commands (`/help` lists them).
//! Ctrl-C cancels the running turn and is ignored at the prompt; Ctrl-D or
//! `exit` quits.

use std::io::Write;
use std::path::Path;

use taskloom_agent::AgentSession;
use taskloom_core::agent::TerminalState;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::render::spawn_printer;
use super::runtime::{Interrupts, build_agent, load_config, open_session, open_store};

pub async fn run(config_path: Option<&Path>, session_id: Option<String>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let agent = build_agent(&config, open_store(&config))?;
    let mut session = open_session(agent, session_id).await?;

    println!();
    println!("  Taskloom interactive mode");
    println!();
    println!("  Model:     {}", config.model);
    println!("  Session:   {} ({} messages)", session.id(), session.session().len());
    println!("  Tools:     {}", session.agent().tools().names().join(", "));
    println!();
    println!("  Type a message and press Enter. /help lists commands.");
    println!("  Ctrl-C cancels a running turn. Ctrl-D or 'exit' quits.");
    println!();

    let interrupts = Interrupts::spawn("(no run in progress; Ctrl-D or 'exit' quits)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit" | "/exit" | "/quit") {
            break;
        }

        if let Some(command) = input.strip_prefix('/') {
            run_command(&session, command).await;
            continue;
        }

        let cancel = interrupts.arm();
        let (tx, rx) = mpsc::channel(256);
        let printer = spawn_printer(rx);

        let result = session.prompt_stream(input, &cancel, tx).await;
        interrupts.disarm();
        let _ = printer.await;

        match result {
            Ok(result) if result.outcome != TerminalState::Completed => {
                eprintln!("  [{}] after {} turn(s)", result.outcome, result.turns);
            }
            Ok(_) => {}
            Err(e) => eprintln!("  [error] {e}"),
        }
        println!();
    }

    session.close().await;
    println!("  Session {} saved.", session.id());
    Ok(())
}

async fn run_command(session: &AgentSession, command: &str) {
    let (name, args) = command.split_once(' ').unwrap_or((command, ""));
    let agent = session.agent();

    if name == "help" {
        println!("  /help               Show this list");
        println!("  /exit               Quit");
        for (name, description) in agent.extensions().commands() {
            println!("  /{name:<18} {description}");
        }
        return;
    }

    let ctx = agent.extension_context(session.session());
    match agent.extensions().execute_command(name, args.trim(), &ctx).await {
        Ok(output) => println!("{output}"),
        Err(e) => eprintln!("  [error] {e}"),
    }
}
