//! Taskloom CLI: the main entry point.
//!
//! Commands:
//! - `init`     Write the default config and session directory
//! - `run`      Run one prompt to completion
//! - `chat`     Interactive session with slash-commands
//! - `sessions` List or delete stored sessions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "taskloom",
    about = "Taskloom: a tool-using agent loop for your terminal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.taskloom/config.toml
    #[arg(long, global = true, env = "TASKLOOM_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Init,

    /// Run a single prompt
    Run {
        /// The prompt to send
        #[arg(short, long)]
        message: String,

        /// Continue (or create) the session with this ID
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Start an interactive chat
    Chat {
        /// Continue (or create) the session with this ID
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Manage stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List stored sessions
    List,

    /// Delete a stored session
    Delete {
        /// Session ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the model's answer
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Init => commands::init::run(config_path).await?,
        Commands::Run { message, session } => commands::run::run(config_path, &message, session).await?,
        Commands::Chat { session } => commands::chat::run(config_path, session).await?,
        Commands::Sessions { action } => match action {
            SessionsAction::List => commands::sessions::list(config_path).await?,
            SessionsAction::Delete { id } => commands::sessions::delete(config_path, &id).await?,
        },
    }

    Ok(())
}
