//! High-level session handle.
//!
//! `AgentSession` owns one [`Session`] and the [`AgentLoop`] that drives it.
//! It publishes `SessionStart` before the first prompt and `SessionEnd` on
//! close, and can rebuild a session from the loop's store.

use std::path::PathBuf;

use taskloom_core::agent::RunResult;
use taskloom_core::error::{Error, StoreError};
use taskloom_core::event::Event;
use taskloom_core::message::{Session, SessionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::loop_runner::AgentLoop;
use crate::stream_event::AgentStreamEvent;

/// One conversation driven by one agent loop.
pub struct AgentSession {
    agent: AgentLoop,
    session: Session,
    started: bool,
    closed: bool,
}

impl AgentSession {
    /// Start a fresh session in the loop's working directory.
    pub fn new(agent: AgentLoop) -> Self {
        let session = Session::new(agent.config().working_dir.clone(), agent.config().model.clone());
        Self::with_session(agent, session)
    }

    /// Drive an existing session.
    pub fn with_session(agent: AgentLoop, session: Session) -> Self {
        Self {
            agent,
            session,
            started: false,
            closed: false,
        }
    }

    /// Rebuild a persisted session through the loop's store.
    ///
    /// Fails if no store is configured, the session does not exist, or any
    /// stored message does not decode.
    pub async fn resume(agent: AgentLoop, id: SessionId) -> Result<Self, Error> {
        let store = agent.store().ok_or_else(|| Error::Config {
            message: "cannot resume a session without a session store".into(),
        })?;

        let messages = match store.load(&id).await {
            Ok(messages) => messages,
            Err(StoreError::Corrupted {
                session_id,
                line,
                source,
            }) => {
                warn!(session_id = %session_id, line, error = %source, "Stored session is corrupted");
                return Err(Error::Decode(source));
            }
            Err(e) => return Err(e.into()),
        };

        let working_dir: PathBuf = agent.config().working_dir.clone();
        let model = agent.config().model.clone();
        let session = Session::restore(id, working_dir, model, messages)?;
        info!(session_id = %session.id, messages = session.len(), "Session resumed");
        Ok(Self::with_session(agent, session))
    }

    pub fn id(&self) -> &SessionId {
        &self.session.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn agent(&self) -> &AgentLoop {
        &self.agent
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn start(&mut self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Internal(format!("session {} is closed", self.session.id)));
        }
        if !self.started {
            self.started = true;
            if let Some(store) = self.agent.store()
                && let Err(e) = store.create(&self.session.id).await
            {
                warn!(session_id = %self.session.id, error = %e, "Failed to create session in store");
            }
            self.agent
                .publish(
                    Event::SessionStart {
                        session_id: self.session.id.clone(),
                    },
                    &self.session,
                )
                .await;
        }
        Ok(())
    }

    /// Run one prompt.
    pub async fn prompt(&mut self, text: &str, cancel: &CancellationToken) -> Result<RunResult, Error> {
        self.start().await?;
        self.agent.run(&mut self.session, text, cancel).await
    }

    /// Run one prompt, forwarding stream events.
    pub async fn prompt_stream(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
        events: mpsc::Sender<AgentStreamEvent>,
    ) -> Result<RunResult, Error> {
        self.start().await?;
        self.agent.run_stream(&mut self.session, text, cancel, events).await
    }

    /// Publish `SessionEnd`. Later prompts fail; closing twice is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.agent
            .publish(
                Event::SessionEnd {
                    session_id: self.session.id.clone(),
                },
                &self.session,
            )
            .await;
        info!(session_id = %self.session.id, messages = self.session.len(), "Session closed");
    }
}
