//! Shared wiring: config loading, store, provider, tools, extensions.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use taskloom_agent::{AgentLoop, AgentSession, PermissionRuleset};
use taskloom_config::AppConfig;
use taskloom_core::extension::ExtensionBus;
use taskloom_core::message::{Session, SessionId};
use taskloom_core::store::SessionStore;
use taskloom_store::JsonlStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::builtin::BuiltinExtension;

/// Load config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        None => AppConfig::load()?,
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
    };
    Ok(config)
}

/// The session store configured for this user.
pub fn open_store(config: &AppConfig) -> Arc<JsonlStore> {
    Arc::new(JsonlStore::new(config.session_dir()))
}

/// Build an agent loop rooted at the current directory.
pub fn build_agent(config: &AppConfig, store: Arc<dyn SessionStore>) -> anyhow::Result<AgentLoop> {
    let provider = taskloom_providers::build_from_config(config)?;

    let mut tools = taskloom_tools::default_registry();
    let mut bus = ExtensionBus::new();
    bus.load(&BuiltinExtension, &mut tools);

    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    debug!(cwd = %cwd.display(), tools = ?tools.names(), "Agent assembled");

    Ok(AgentLoop::new(provider, Arc::new(tools), Arc::new(bus), config.loop_config(cwd))
        .with_store(store)
        .with_permissions(PermissionRuleset::from_config(&config.permissions)))
}

/// Resume `id` if it is stored, start it fresh if not, or start a new session.
pub async fn open_session(agent: AgentLoop, id: Option<String>) -> anyhow::Result<AgentSession> {
    let Some(id) = id else {
        return Ok(AgentSession::new(agent));
    };
    let id = SessionId::from(id.as_str());

    let stored = match agent.store() {
        Some(store) => store.exists(&id).await?,
        None => false,
    };
    if stored {
        return AgentSession::resume(agent, id.clone())
            .await
            .with_context(|| format!("Failed to resume session {id}"));
    }

    let config = agent.config();
    let session = Session::with_id(id, config.working_dir.clone(), config.model.clone());
    Ok(AgentSession::with_session(agent, session))
}

// ── Ctrl-C ──

/// Routes Ctrl-C to whichever run is armed.
///
/// One per process: once the first `ctrl_c` listener starts, tokio keeps its
/// SIGINT handler installed, so Ctrl-C never falls through to the default.
pub struct Interrupts {
    active: watch::Sender<Option<CancellationToken>>,
    listener: Option<JoinHandle<()>>,
}

impl Interrupts {
    fn new() -> Self {
        let (active, _) = watch::channel(None);
        Self { active, listener: None }
    }

    /// Start listening. `idle_hint` is printed when Ctrl-C arrives between runs.
    pub fn spawn(idle_hint: &'static str) -> Self {
        let mut interrupts = Self::new();
        let active = interrupts.active.subscribe();
        interrupts.listener = Some(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !interrupt(&active) {
                    eprintln!("\n  {idle_hint}");
                }
            }
        }));
        interrupts
    }

    /// A fresh token that Ctrl-C cancels until the next `arm` or `disarm`.
    pub fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        self.active.send_replace(Some(token.clone()));
        token
    }

    pub fn disarm(&self) {
        self.active.send_replace(None);
    }
}

impl Drop for Interrupts {
    fn drop(&mut self) {
        if let Some(listener) = &self.listener {
            listener.abort();
        }
    }
}

/// Cancel the armed run, if any. Returns whether there was one.
fn interrupt(active: &watch::Receiver<Option<CancellationToken>>) -> bool {
    match active.borrow().as_ref() {
        Some(token) => {
            debug!("Ctrl-C received, cancelling run");
            token.cancel();
            true
        }
        None => false,
    }
}
